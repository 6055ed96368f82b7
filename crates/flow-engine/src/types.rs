//! Core types for flow graphs
//!
//! These types define the structure of a flow: ports, their value brands,
//! the values that travel along links, and the links themselves.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unique identifier for a step
pub type StepId = String;

/// Unique identifier for a port
pub type PortId = String;

/// Unique identifier for a link
pub type LinkId = String;

/// Unique identifier for one iteration of the flow
pub type IterationId = uuid::Uuid;

/// Derive the stable identifier of a port from its owner and name
pub fn port_id(step_id: &str, port_name: &str) -> PortId {
    format!("{}/{}", step_id, port_name)
}

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

/// The scalar kind carried by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Floating point number
    Numeric,
    /// Text string
    String,
    /// Boolean value
    Boolean,
    /// Raw pixel buffer
    Image,
    /// Axis-aligned rectangle (region of interest)
    Rectangle,
    /// One of a fixed set of named options
    Enum,
    /// One entry chosen from an option list
    Select,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Numeric => "numeric",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Image => "image",
            Self::Rectangle => "rectangle",
            Self::Enum => "enum",
            Self::Select => "select",
        };
        f.write_str(name)
    }
}

/// The value brand of a port: a scalar kind, optionally as a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBrand {
    pub kind: ValueKind,
    #[serde(default)]
    pub collection: bool,
}

impl PortBrand {
    /// A single-value brand
    pub const fn scalar(kind: ValueKind) -> Self {
        Self {
            kind,
            collection: false,
        }
    }

    /// A collection brand
    pub const fn collection(kind: ValueKind) -> Self {
        Self {
            kind,
            collection: true,
        }
    }

    pub const NUMERIC: Self = Self::scalar(ValueKind::Numeric);
    pub const STRING: Self = Self::scalar(ValueKind::String);
    pub const BOOLEAN: Self = Self::scalar(ValueKind::Boolean);
    pub const IMAGE: Self = Self::scalar(ValueKind::Image);
    pub const RECTANGLE: Self = Self::scalar(ValueKind::Rectangle);

    /// Whether values of this brand are sent out of band as images
    pub fn is_image(&self) -> bool {
        self.kind == ValueKind::Image
    }
}

impl fmt::Display for PortBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.collection {
            write!(f, "{}[]", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

/// Pixel buffer carried by image ports
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    /// Interleaved channels per pixel (1 = mono, 3 = RGB)
    pub channels: u8,
    pub pixels: Arc<[u8]>,
}

impl ImageData {
    pub fn new(width: u32, height: u32, channels: u8, pixels: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            channels,
            pixels: pixels.into(),
        }
    }

    /// Number of pixels (not bytes)
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Expected buffer length for the declared geometry
    pub fn expected_len(&self) -> usize {
        self.pixel_count() as usize * usize::from(self.channels)
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Axis-aligned rectangle in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A value held by a port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PortValue {
    Numeric(f64),
    String(String),
    Boolean(bool),
    Image(ImageData),
    Rectangle(Rectangle),
    Enum(String),
    Select(String),
    Collection(Vec<PortValue>),
}

impl PortValue {
    /// The scalar kind of this value, `None` for collections
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Numeric(_) => Some(ValueKind::Numeric),
            Self::String(_) => Some(ValueKind::String),
            Self::Boolean(_) => Some(ValueKind::Boolean),
            Self::Image(_) => Some(ValueKind::Image),
            Self::Rectangle(_) => Some(ValueKind::Rectangle),
            Self::Enum(_) => Some(ValueKind::Enum),
            Self::Select(_) => Some(ValueKind::Select),
            Self::Collection(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Enum(s) | Self::Select(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageData> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }

    /// Whether this value, or any element of it, is an image
    pub fn contains_image(&self) -> bool {
        match self {
            Self::Image(_) => true,
            Self::Collection(items) => items.iter().any(PortValue::contains_image),
            _ => false,
        }
    }
}

/// Declaration of a port exposed by a step body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    pub name: String,
    pub direction: PortDirection,
    pub brand: PortBrand,
    /// Allowed names for enum/select ports (empty = unconstrained select)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl PortSpec {
    /// Declare an input port
    pub fn input(name: impl Into<String>, brand: PortBrand) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Input,
            brand,
            options: Vec::new(),
        }
    }

    /// Declare an output port
    pub fn output(name: impl Into<String>, brand: PortBrand) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Output,
            brand,
            options: Vec::new(),
        }
    }

    /// Set the option list for enum/select ports
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

/// A typed value cell owned by a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub id: PortId,
    pub step_id: StepId,
    pub name: String,
    pub direction: PortDirection,
    pub brand: PortBrand,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Current value, `None` until first write
    pub value: Option<PortValue>,
    /// Whether any link references this port
    pub connected: bool,
}

impl Port {
    /// Materialize a declared port for a step
    pub fn from_spec(step_id: &str, spec: PortSpec) -> Self {
        Self {
            id: port_id(step_id, &spec.name),
            step_id: step_id.to_string(),
            name: spec.name,
            direction: spec.direction,
            brand: spec.brand,
            options: spec.options,
            value: None,
            connected: false,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }
}

/// A directed edge from an output port to an input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortLink {
    pub id: LinkId,
    pub source: PortId,
    pub target: PortId,
}

impl PortLink {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_id_is_derived_from_step_and_name() {
        let port = Port::from_spec("camera-1", PortSpec::output("frame", PortBrand::IMAGE));
        assert_eq!(port.id, "camera-1/frame");
        assert!(port.value.is_none());
        assert!(!port.connected);
    }

    #[test]
    fn test_brand_display() {
        assert_eq!(PortBrand::NUMERIC.to_string(), "numeric");
        assert_eq!(
            PortBrand::collection(ValueKind::Rectangle).to_string(),
            "rectangle[]"
        );
    }

    #[test]
    fn test_value_serde_shape() {
        let json = serde_json::to_value(PortValue::Numeric(42.0)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "numeric", "value": 42.0}));

        let back: PortValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, PortValue::Numeric(42.0));
    }

    #[test]
    fn test_contains_image() {
        let image = PortValue::Image(ImageData::new(1, 1, 1, vec![0u8]));
        assert!(image.contains_image());
        assert!(PortValue::Collection(vec![image]).contains_image());
        assert!(!PortValue::Numeric(1.0).contains_image());
    }
}
