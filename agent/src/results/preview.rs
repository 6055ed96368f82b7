//! Downscaled image previews
//!
//! Large frames are replaced by a nearest-neighbour preview before they are
//! queued, keeping uploads bounded. The preview keeps every `stride`-th
//! pixel in both directions; the result records `scale = 1 / stride`.

use flow_engine::{ImageData, PortValue};

use super::PortResult;

/// Smallest integer stride that brings `image` within `max_pixels`
///
/// Returns 1 when no downscaling is needed or `max_pixels` is 0.
pub fn preview_stride(image: &ImageData, max_pixels: u64) -> u32 {
    if max_pixels == 0 || image.pixel_count() <= max_pixels {
        return 1;
    }
    let mut stride = ((image.pixel_count() as f64 / max_pixels as f64).sqrt().ceil() as u32).max(2);
    while preview_pixels(image, stride) > max_pixels {
        stride += 1;
    }
    stride
}

fn preview_pixels(image: &ImageData, stride: u32) -> u64 {
    u64::from(image.width.div_ceil(stride)) * u64::from(image.height.div_ceil(stride))
}

/// Nearest-neighbour downscale keeping every `stride`-th pixel
///
/// Returns `None` when the buffer is shorter than the declared geometry.
pub fn downscale(image: &ImageData, stride: u32) -> Option<ImageData> {
    if image.pixels.len() < image.expected_len() {
        return None;
    }
    let stride = stride.max(1) as usize;
    let channels = usize::from(image.channels);
    let width = image.width as usize;
    let out_width = width.div_ceil(stride);
    let out_height = (image.height as usize).div_ceil(stride);

    let mut pixels = Vec::with_capacity(out_width * out_height * channels);
    for y in (0..image.height as usize).step_by(stride) {
        let row = y * width;
        for x in (0..width).step_by(stride) {
            let start = (row + x) * channels;
            pixels.extend_from_slice(&image.pixels[start..start + channels]);
        }
    }

    Some(ImageData::new(
        out_width as u32,
        out_height as u32,
        image.channels,
        pixels,
    ))
}

/// Replace oversized images of a result by their previews
///
/// Image collections share one stride, the one their largest element
/// needs, so a single `scale` describes every element.
pub fn apply_preview(mut result: PortResult, max_pixels: u64) -> PortResult {
    let stride = match &result.value {
        PortValue::Image(image) => preview_stride(image, max_pixels),
        PortValue::Collection(items) => items
            .iter()
            .filter_map(PortValue::as_image)
            .map(|image| preview_stride(image, max_pixels))
            .max()
            .unwrap_or(1),
        _ => 1,
    };
    if stride == 1 {
        return result;
    }

    let previewed = match &result.value {
        PortValue::Image(image) => downscale(image, stride).map(PortValue::Image),
        PortValue::Collection(items) => items
            .iter()
            .map(|item| match item {
                PortValue::Image(image) => downscale(image, stride).map(PortValue::Image),
                other => Some(other.clone()),
            })
            .collect::<Option<Vec<_>>>()
            .map(PortValue::Collection),
        _ => None,
    };
    match previewed {
        Some(value) => {
            log::debug!("Result '{}': images previewed at 1/{}", result.id, stride);
            result.value = value;
            result.scale = Some(1.0 / f64::from(stride));
        }
        None => log::warn!(
            "Result '{}': image buffer shorter than its geometry, sending as is",
            result.id
        ),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_engine::PortBrand;

    fn gradient(width: u32, height: u32) -> ImageData {
        let pixels: Vec<u8> = (0..width * height).map(|i| (i % 251) as u8).collect();
        ImageData::new(width, height, 1, pixels)
    }

    #[test]
    fn test_small_images_are_untouched() {
        let image = gradient(10, 10);
        assert_eq!(preview_stride(&image, 100), 1);
        assert_eq!(preview_stride(&image, 0), 1);
    }

    #[test]
    fn test_stride_fits_budget() {
        let image = gradient(1000, 700);
        let stride = preview_stride(&image, 10_000);
        assert!(preview_pixels(&image, stride) <= 10_000);
        assert!(preview_pixels(&image, stride - 1) > 10_000);
    }

    #[test]
    fn test_downscale_picks_nearest_pixels() {
        let image = ImageData::new(4, 2, 1, vec![0u8, 1, 2, 3, 4, 5, 6, 7]);
        let preview = downscale(&image, 2).unwrap();
        assert_eq!((preview.width, preview.height), (2, 1));
        assert_eq!(&preview.pixels[..], &[0u8, 2]);
    }

    #[test]
    fn test_downscale_keeps_channels_together() {
        let image = ImageData::new(2, 1, 3, vec![10u8, 11, 12, 20, 21, 22]);
        let preview = downscale(&image, 2).unwrap();
        assert_eq!(&preview.pixels[..], &[10u8, 11, 12]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let image = ImageData::new(4, 4, 1, vec![0u8; 3]);
        assert!(downscale(&image, 2).is_none());
    }

    #[test]
    fn test_apply_preview_sets_scale() {
        let result = PortResult {
            id: "cam/frame".to_string(),
            step_id: "cam".to_string(),
            port_name: "frame".to_string(),
            brand: PortBrand::IMAGE,
            value: PortValue::Image(gradient(100, 100)),
            scale: None,
        };
        let previewed = apply_preview(result, 2_500);
        assert_eq!(previewed.scale, Some(0.5));
        let image = previewed.value.as_image().unwrap();
        assert_eq!((image.width, image.height), (50, 50));
    }

    #[test]
    fn test_image_collections_share_one_stride() {
        let result = PortResult {
            id: "crop/out".to_string(),
            step_id: "crop".to_string(),
            port_name: "out".to_string(),
            brand: PortBrand::collection(flow_engine::ValueKind::Image),
            value: PortValue::Collection(vec![
                PortValue::Image(gradient(100, 100)),
                PortValue::Image(gradient(10, 10)),
            ]),
            scale: None,
        };
        let previewed = apply_preview(result, 2_500);
        assert_eq!(previewed.scale, Some(0.5));

        let PortValue::Collection(items) = &previewed.value else {
            panic!("expected a collection");
        };
        let sizes: Vec<_> = items
            .iter()
            .map(|item| {
                let image = item.as_image().unwrap();
                (image.width, image.height)
            })
            .collect();
        assert_eq!(sizes, vec![(50, 50), (5, 5)]);
    }

    #[test]
    fn test_small_collections_are_untouched() {
        let result = PortResult {
            id: "crop/out".to_string(),
            step_id: "crop".to_string(),
            port_name: "out".to_string(),
            brand: PortBrand::collection(flow_engine::ValueKind::Image),
            value: PortValue::Collection(vec![PortValue::Image(gradient(10, 10))]),
            scale: None,
        };
        assert_eq!(apply_preview(result.clone(), 2_500), result);
    }
}
