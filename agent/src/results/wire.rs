//! Wire format of the remote result service
//!
//! A finished iteration becomes one metadata record carrying every
//! non-image value, plus one upload per image. Images inside collections
//! are uploaded element by element as `<result id>#<index>`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use flow_engine::{to_json, ImageData, IterationId, PortBrand, PortValue};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use super::transport::ChunkStream;
use super::WorkflowResult;

/// Non-image port value in the metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePortValue {
    pub result_id: String,
    pub step_id: String,
    pub port_name: String,
    pub brand: PortBrand,
    pub value: serde_json::Value,
}

/// Metadata record committed once per iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResult {
    pub iteration_id: IterationId,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub success: bool,
    pub values: Vec<WirePortValue>,
}

/// Header of a chunked image upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUpload {
    pub iteration_id: IterationId,
    pub result_id: String,
    pub scale: f64,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

/// An image waiting to be streamed
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub upload: ImageUpload,
    pub pixels: Arc<[u8]>,
}

impl ImagePayload {
    fn new(iteration_id: IterationId, result_id: String, scale: f64, image: &ImageData) -> Self {
        Self {
            upload: ImageUpload {
                iteration_id,
                result_id,
                scale,
                width: image.width,
                height: image.height,
                channels: image.channels,
            },
            pixels: Arc::clone(&image.pixels),
        }
    }

    /// Stream the pixel buffer in chunks of at most `chunk_bytes`
    ///
    /// Each chunk is copied out of the shared buffer only when polled.
    pub fn chunk_stream(&self, chunk_bytes: usize) -> ChunkStream {
        let pixels = Arc::clone(&self.pixels);
        let step = chunk_bytes.max(1);
        let len = pixels.len();
        stream::iter((0..len).step_by(step))
            .map(move |start| pixels[start..(start + step).min(len)].to_vec())
            .boxed()
    }
}

/// Translate a finished iteration into its metadata record and uploads
pub fn to_wire(result: &WorkflowResult) -> (WireResult, Vec<ImagePayload>) {
    let mut values = Vec::new();
    let mut images = Vec::new();

    for port in result.results() {
        let scale = port.scale.unwrap_or(1.0);
        match &port.value {
            PortValue::Image(image) => {
                images.push(ImagePayload::new(result.iteration_id, port.id.clone(), scale, image));
            }
            PortValue::Collection(items) if port.value.contains_image() => {
                for (index, item) in items.iter().enumerate() {
                    if let PortValue::Image(image) = item {
                        images.push(ImagePayload::new(
                            result.iteration_id,
                            format!("{}#{}", port.id, index),
                            scale,
                            image,
                        ));
                    }
                }
            }
            value => values.push(WirePortValue {
                result_id: port.id.clone(),
                step_id: port.step_id.clone(),
                port_name: port.port_name.clone(),
                brand: port.brand,
                value: to_json(value),
            }),
        }
    }

    let record = WireResult {
        iteration_id: result.iteration_id,
        agent_id: result.agent_id.clone(),
        started_at: result.started_at,
        stopped_at: result.stopped_at,
        elapsed_ms: result.elapsed_ms,
        success: result.success,
        values,
    };
    (record, images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::PortResult;

    fn port(id: &str, brand: PortBrand, value: PortValue) -> PortResult {
        PortResult {
            id: id.to_string(),
            step_id: id.split('/').next().unwrap_or_default().to_string(),
            port_name: "out".to_string(),
            brand,
            value,
            scale: None,
        }
    }

    #[test]
    fn test_images_are_split_from_metadata() {
        let mut result = WorkflowResult::new(uuid::Uuid::new_v4(), "agent");
        result
            .insert(port("count/out", PortBrand::NUMERIC, PortValue::Numeric(3.0)))
            .unwrap();
        let mut frame = port(
            "cam/out",
            PortBrand::IMAGE,
            PortValue::Image(ImageData::new(2, 2, 1, vec![1u8, 2, 3, 4])),
        );
        frame.scale = Some(0.5);
        result.insert(frame).unwrap();
        result.finish(true);

        let (record, images) = to_wire(&result);
        assert_eq!(record.values.len(), 1);
        assert_eq!(record.values[0].value, serde_json::json!(3.0));
        assert!(record.success);

        assert_eq!(images.len(), 1);
        assert_eq!(images[0].upload.result_id, "cam/out");
        assert_eq!(images[0].upload.scale, 0.5);
        assert_eq!(images[0].upload.iteration_id, result.iteration_id);
    }

    #[test]
    fn test_image_collections_upload_each_element() {
        let mut result = WorkflowResult::new(uuid::Uuid::new_v4(), "agent");
        let crops = PortValue::Collection(vec![
            PortValue::Image(ImageData::new(1, 1, 1, vec![1u8])),
            PortValue::Image(ImageData::new(1, 1, 1, vec![2u8])),
        ]);
        result
            .insert(port("crop/out", PortBrand::collection(flow_engine::ValueKind::Image), crops))
            .unwrap();

        let (record, images) = to_wire(&result);
        assert!(record.values.is_empty());
        let ids: Vec<_> = images.iter().map(|i| i.upload.result_id.as_str()).collect();
        assert_eq!(ids, vec!["crop/out#0", "crop/out#1"]);
    }

    #[tokio::test]
    async fn test_chunk_stream() {
        let payload = ImagePayload {
            upload: ImageUpload {
                iteration_id: uuid::Uuid::new_v4(),
                result_id: "r".to_string(),
                scale: 1.0,
                width: 5,
                height: 1,
                channels: 1,
            },
            pixels: Arc::from(vec![1u8, 2, 3, 4, 5]),
        };
        let chunks: Vec<Vec<u8>> = payload.chunk_stream(2).collect().await;
        assert_eq!(chunks, vec![vec![1u8, 2], vec![3, 4], vec![5]]);

        let whole: Vec<Vec<u8>> = payload.chunk_stream(0).take(2).collect().await;
        assert_eq!(whole, vec![vec![1u8], vec![2]]);
    }
}
