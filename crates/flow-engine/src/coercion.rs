//! Port value coercion
//!
//! Converts values between port brands when they travel along a link or
//! are written from the outside. The accepted conversions are:
//!
//! - numeric strings parse into numbers (and back)
//! - enum/select names are looked up in the target port's option list,
//!   numbers select an option by index
//! - a string holding a JSON array becomes a collection
//! - a scalar becomes a one-element collection
//!
//! Anything else is a [`CoercionError`]; values are never truncated.

use thiserror::Error;

use crate::types::{PortBrand, PortValue, Rectangle, ValueKind};

/// Failure to convert a value to a port brand
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoercionError {
    #[error("Cannot convert {from} to {to}")]
    Unsupported { from: String, to: PortBrand },

    #[error("'{input}' is not a valid {to}")]
    Parse { input: String, to: PortBrand },

    #[error("'{name}' is not one of {options:?}")]
    UnknownOption { name: String, options: Vec<String> },

    #[error("Option index {index} is out of range for {len} options")]
    OptionIndex { index: f64, len: usize },
}

fn describe(value: &PortValue) -> String {
    match value.kind() {
        Some(kind) => kind.to_string(),
        None => "collection".to_string(),
    }
}

fn unsupported(value: &PortValue, to: PortBrand) -> CoercionError {
    CoercionError::Unsupported {
        from: describe(value),
        to,
    }
}

/// Convert `value` to `brand`, using `options` for enum/select lookups
pub fn coerce(
    value: &PortValue,
    brand: PortBrand,
    options: &[String],
) -> Result<PortValue, CoercionError> {
    if !brand.collection {
        return coerce_scalar(value, brand.kind, options);
    }

    match value {
        PortValue::Collection(items) => items
            .iter()
            .map(|item| coerce_scalar(item, brand.kind, options))
            .collect::<Result<Vec<_>, _>>()
            .map(PortValue::Collection),
        PortValue::String(text) if text.trim_start().starts_with('[') => {
            parse_json_collection(text, brand, options)
        }
        scalar => Ok(PortValue::Collection(vec![coerce_scalar(
            scalar, brand.kind, options,
        )?])),
    }
}

fn coerce_scalar(
    value: &PortValue,
    kind: ValueKind,
    options: &[String],
) -> Result<PortValue, CoercionError> {
    use PortValue as V;

    let brand = PortBrand::scalar(kind);
    match kind {
        ValueKind::Numeric => match value {
            V::Numeric(n) => Ok(V::Numeric(*n)),
            V::Boolean(b) => Ok(V::Numeric(if *b { 1.0 } else { 0.0 })),
            V::String(s) | V::Enum(s) | V::Select(s) => parse_numeric(s).map(V::Numeric),
            other => Err(unsupported(other, brand)),
        },
        ValueKind::String => match value {
            V::String(s) | V::Enum(s) | V::Select(s) => Ok(V::String(s.clone())),
            V::Numeric(n) => Ok(V::String(n.to_string())),
            V::Boolean(b) => Ok(V::String(b.to_string())),
            V::Rectangle(_) | V::Collection(_) if !value.contains_image() => {
                Ok(V::String(to_json(value).to_string()))
            }
            other => Err(unsupported(other, brand)),
        },
        ValueKind::Boolean => match value {
            V::Boolean(b) => Ok(V::Boolean(*b)),
            V::Numeric(n) => Ok(V::Boolean(*n != 0.0)),
            V::String(s) => parse_bool(s).map(V::Boolean),
            other => Err(unsupported(other, brand)),
        },
        ValueKind::Image => match value {
            V::Image(image) => Ok(V::Image(image.clone())),
            other => Err(unsupported(other, brand)),
        },
        ValueKind::Rectangle => match value {
            V::Rectangle(rect) => Ok(V::Rectangle(*rect)),
            V::String(s) => serde_json::from_str::<Rectangle>(s)
                .map(V::Rectangle)
                .map_err(|_| CoercionError::Parse {
                    input: s.clone(),
                    to: brand,
                }),
            other => Err(unsupported(other, brand)),
        },
        ValueKind::Enum => match value {
            V::Enum(name) | V::Select(name) | V::String(name) => {
                lookup_option(name, options).map(V::Enum)
            }
            V::Numeric(index) => option_at(*index, options).map(V::Enum),
            other => Err(unsupported(other, brand)),
        },
        ValueKind::Select => match value {
            V::Select(name) | V::Enum(name) | V::String(name) => {
                if options.is_empty() {
                    Ok(V::Select(name.clone()))
                } else {
                    lookup_option(name, options).map(V::Select)
                }
            }
            V::Numeric(index) if !options.is_empty() => option_at(*index, options).map(V::Select),
            other => Err(unsupported(other, brand)),
        },
    }
}

fn parse_numeric(text: &str) -> Result<f64, CoercionError> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| CoercionError::Parse {
            input: text.to_string(),
            to: PortBrand::NUMERIC,
        })
}

fn parse_bool(text: &str) -> Result<bool, CoercionError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(CoercionError::Parse {
            input: text.to_string(),
            to: PortBrand::BOOLEAN,
        }),
    }
}

/// Exact match first, then case-insensitive; returns the canonical option
fn lookup_option(name: &str, options: &[String]) -> Result<String, CoercionError> {
    options
        .iter()
        .find(|option| option.as_str() == name)
        .or_else(|| options.iter().find(|option| option.eq_ignore_ascii_case(name)))
        .cloned()
        .ok_or_else(|| CoercionError::UnknownOption {
            name: name.to_string(),
            options: options.to_vec(),
        })
}

fn option_at(index: f64, options: &[String]) -> Result<String, CoercionError> {
    let out_of_range = || CoercionError::OptionIndex {
        index,
        len: options.len(),
    };
    if index.fract() != 0.0 || index < 0.0 {
        return Err(out_of_range());
    }
    options.get(index as usize).cloned().ok_or_else(out_of_range)
}

fn parse_json_collection(
    text: &str,
    brand: PortBrand,
    options: &[String],
) -> Result<PortValue, CoercionError> {
    let parsed: serde_json::Value =
        serde_json::from_str(text).map_err(|_| CoercionError::Parse {
            input: text.to_string(),
            to: brand,
        })?;
    if !parsed.is_array() {
        return Err(CoercionError::Parse {
            input: text.to_string(),
            to: brand,
        });
    }
    coerce_json(&parsed, brand, options)
}

/// Convert a plain JSON value (config files, control requests) to `brand`
pub fn coerce_json(
    json: &serde_json::Value,
    brand: PortBrand,
    options: &[String],
) -> Result<PortValue, CoercionError> {
    use serde_json::Value as J;

    match json {
        J::Array(items) if brand.collection => items
            .iter()
            .map(|item| coerce_json(item, PortBrand::scalar(brand.kind), options))
            .collect::<Result<Vec<_>, _>>()
            .map(PortValue::Collection),
        J::Array(_) => Err(CoercionError::Unsupported {
            from: "collection".to_string(),
            to: brand,
        }),
        J::Object(map) if map.contains_key("kind") => {
            let value: PortValue =
                serde_json::from_value(json.clone()).map_err(|_| CoercionError::Parse {
                    input: json.to_string(),
                    to: brand,
                })?;
            coerce(&value, brand, options)
        }
        J::Object(_) => {
            let value = match brand.kind {
                ValueKind::Rectangle => serde_json::from_value(json.clone()).map(PortValue::Rectangle),
                ValueKind::Image => serde_json::from_value(json.clone()).map(PortValue::Image),
                _ => {
                    return Err(CoercionError::Unsupported {
                        from: "object".to_string(),
                        to: brand,
                    })
                }
            }
            .map_err(|_| CoercionError::Parse {
                input: json.to_string(),
                to: brand,
            })?;
            coerce(&value, brand, options)
        }
        J::Number(n) => {
            let n = n.as_f64().ok_or_else(|| CoercionError::Parse {
                input: json.to_string(),
                to: brand,
            })?;
            coerce(&PortValue::Numeric(n), brand, options)
        }
        J::String(s) => coerce(&PortValue::String(s.clone()), brand, options),
        J::Bool(b) => coerce(&PortValue::Boolean(*b), brand, options),
        J::Null => Err(CoercionError::Parse {
            input: "null".to_string(),
            to: brand,
        }),
    }
}

/// Plain JSON rendition of a value; images are reduced to their geometry
pub fn to_json(value: &PortValue) -> serde_json::Value {
    use serde_json::json;

    match value {
        PortValue::Numeric(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        PortValue::String(s) | PortValue::Enum(s) | PortValue::Select(s) => json!(s),
        PortValue::Boolean(b) => json!(b),
        PortValue::Rectangle(rect) => json!({
            "x": rect.x,
            "y": rect.y,
            "width": rect.width,
            "height": rect.height,
        }),
        PortValue::Image(image) => json!({
            "width": image.width,
            "height": image.height,
            "channels": image.channels,
        }),
        PortValue::Collection(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect())
        }
    }
}

/// Whether a link from `source` to `target` can ever carry a value
pub fn can_link(source: PortBrand, target: PortBrand) -> bool {
    use ValueKind as K;

    if source.kind == K::Image || target.kind == K::Image {
        return source.kind == target.kind && (target.collection || !source.collection);
    }
    if source.collection && !target.collection {
        return target.kind == K::String;
    }
    match target.kind {
        K::String => true,
        K::Numeric => matches!(
            source.kind,
            K::Numeric | K::String | K::Boolean | K::Enum | K::Select
        ),
        K::Boolean => matches!(source.kind, K::Boolean | K::Numeric | K::String),
        K::Rectangle => matches!(source.kind, K::Rectangle | K::String),
        K::Enum | K::Select => matches!(
            source.kind,
            K::Enum | K::Select | K::String | K::Numeric
        ),
        K::Image => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageData;

    fn options() -> Vec<String> {
        vec!["Low".to_string(), "Medium".to_string(), "High".to_string()]
    }

    #[test]
    fn test_numeric_string_parsing() {
        let value = coerce(&PortValue::String(" 42.5 ".into()), PortBrand::NUMERIC, &[]).unwrap();
        assert_eq!(value, PortValue::Numeric(42.5));
    }

    #[test]
    fn test_bad_numeric_string_is_an_error() {
        let err = coerce(&PortValue::String("42abc".into()), PortBrand::NUMERIC, &[]).unwrap_err();
        assert!(matches!(err, CoercionError::Parse { .. }));
    }

    #[test]
    fn test_number_to_string_has_no_trailing_zero() {
        let value = coerce(&PortValue::Numeric(42.0), PortBrand::STRING, &[]).unwrap();
        assert_eq!(value, PortValue::String("42".into()));
    }

    #[test]
    fn test_enum_name_lookup() {
        let brand = PortBrand::scalar(ValueKind::Enum);
        let exact = coerce(&PortValue::String("High".into()), brand, &options()).unwrap();
        assert_eq!(exact, PortValue::Enum("High".into()));

        let relaxed = coerce(&PortValue::String("medium".into()), brand, &options()).unwrap();
        assert_eq!(relaxed, PortValue::Enum("Medium".into()));

        let missing = coerce(&PortValue::String("Extreme".into()), brand, &options());
        assert!(matches!(missing, Err(CoercionError::UnknownOption { .. })));
    }

    #[test]
    fn test_enum_index_lookup() {
        let brand = PortBrand::scalar(ValueKind::Enum);
        assert_eq!(
            coerce(&PortValue::Numeric(0.0), brand, &options()).unwrap(),
            PortValue::Enum("Low".into())
        );
        assert!(matches!(
            coerce(&PortValue::Numeric(3.0), brand, &options()),
            Err(CoercionError::OptionIndex { .. })
        ));
        assert!(coerce(&PortValue::Numeric(1.5), brand, &options()).is_err());
    }

    #[test]
    fn test_unconstrained_select_accepts_any_name() {
        let brand = PortBrand::scalar(ValueKind::Select);
        let value = coerce(&PortValue::String("cam-2".into()), brand, &[]).unwrap();
        assert_eq!(value, PortValue::Select("cam-2".into()));
    }

    #[test]
    fn test_json_encoded_collection() {
        let brand = PortBrand::collection(ValueKind::Numeric);
        let value = coerce(&PortValue::String("[1, \"2\", 3.5]".into()), brand, &[]).unwrap();
        assert_eq!(
            value,
            PortValue::Collection(vec![
                PortValue::Numeric(1.0),
                PortValue::Numeric(2.0),
                PortValue::Numeric(3.5),
            ])
        );

        let bad = coerce(&PortValue::String("[1, \"x\"]".into()), brand, &[]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_collection_to_scalar_is_rejected() {
        let value = PortValue::Collection(vec![PortValue::Numeric(1.0)]);
        assert!(coerce(&value, PortBrand::NUMERIC, &[]).is_err());
        // String targets receive the JSON encoding instead
        assert_eq!(
            coerce(&value, PortBrand::STRING, &[]).unwrap(),
            PortValue::String("[1.0]".into())
        );
    }

    #[test]
    fn test_scalar_wraps_into_collection() {
        let brand = PortBrand::collection(ValueKind::Boolean);
        let value = coerce(&PortValue::Boolean(true), brand, &[]).unwrap();
        assert_eq!(value, PortValue::Collection(vec![PortValue::Boolean(true)]));
    }

    #[test]
    fn test_plain_string_wraps_into_collection() {
        let brand = PortBrand::collection(ValueKind::Numeric);
        assert!(can_link(PortBrand::STRING, brand));
        let value = coerce(&PortValue::String("5".into()), brand, &[]).unwrap();
        assert_eq!(value, PortValue::Collection(vec![PortValue::Numeric(5.0)]));

        let bad = coerce(&PortValue::String("five".into()), brand, &[]);
        assert!(matches!(bad, Err(CoercionError::Parse { .. })));
    }

    #[test]
    fn test_image_only_to_image() {
        let image = PortValue::Image(ImageData::new(2, 1, 1, vec![1u8, 2]));
        assert!(coerce(&image, PortBrand::IMAGE, &[]).is_ok());
        assert!(coerce(&image, PortBrand::STRING, &[]).is_err());
        assert!(coerce(&PortValue::Numeric(1.0), PortBrand::IMAGE, &[]).is_err());
    }

    #[test]
    fn test_rectangle_from_json_string() {
        let value = coerce(
            &PortValue::String(r#"{"x":1,"y":2,"width":3,"height":4}"#.into()),
            PortBrand::RECTANGLE,
            &[],
        )
        .unwrap();
        assert_eq!(
            value,
            PortValue::Rectangle(Rectangle {
                x: 1.0,
                y: 2.0,
                width: 3.0,
                height: 4.0
            })
        );
    }

    #[test]
    fn test_coerce_json_plain_values() {
        assert_eq!(
            coerce_json(&serde_json::json!(7), PortBrand::NUMERIC, &[]).unwrap(),
            PortValue::Numeric(7.0)
        );
        assert_eq!(
            coerce_json(&serde_json::json!("true"), PortBrand::BOOLEAN, &[]).unwrap(),
            PortValue::Boolean(true)
        );
        assert!(coerce_json(&serde_json::Value::Null, PortBrand::NUMERIC, &[]).is_err());
        assert!(coerce_json(&serde_json::json!([1, 2]), PortBrand::NUMERIC, &[]).is_err());
    }

    #[test]
    fn test_can_link() {
        assert!(can_link(PortBrand::NUMERIC, PortBrand::STRING));
        assert!(can_link(PortBrand::STRING, PortBrand::NUMERIC));
        assert!(can_link(PortBrand::IMAGE, PortBrand::IMAGE));
        assert!(can_link(PortBrand::IMAGE, PortBrand::collection(ValueKind::Image)));
        assert!(!can_link(PortBrand::collection(ValueKind::Image), PortBrand::IMAGE));
        assert!(!can_link(PortBrand::IMAGE, PortBrand::STRING));
        assert!(!can_link(PortBrand::RECTANGLE, PortBrand::NUMERIC));
        assert!(!can_link(
            PortBrand::collection(ValueKind::Numeric),
            PortBrand::NUMERIC
        ));
    }
}
