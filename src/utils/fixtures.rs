//! Builders for on-disk model and image fixtures used across the tests.

use crate::common::{HEIGHT, WIDTH};
use image::{Rgb, RgbImage};
use safetensors::{Dtype, tensor::TensorView};
use std::path::Path;

pub fn safetensors_bytes(entries: &[(&str, Vec<usize>, Vec<f32>)]) -> Vec<u8> {
    let raw: Vec<(&str, Dtype, Vec<usize>, Vec<u8>)> = entries
        .iter()
        .map(|(name, shape, values)| {
            let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            (*name, Dtype::F32, shape.clone(), bytes)
        })
        .collect();
    safetensors_raw(&raw)
}

/// Serializes little-endian tensor bytes of any dtype.
pub fn safetensors_raw(entries: &[(&str, Dtype, Vec<usize>, Vec<u8>)]) -> Vec<u8> {
    let views: Vec<(String, TensorView)> = entries
        .iter()
        .map(|(name, dtype, shape, bytes)| {
            let view = TensorView::new(*dtype, shape.clone(), bytes).unwrap();
            (name.to_string(), view)
        })
        .collect();
    safetensors::serialize(views, &None).unwrap()
}

/// A 150x150 RGB classifier: global average pooling, then a softmax dense
/// layer whose kernel column `k` is `class_rgb[k] / 255`.
pub fn tiny_color_model(class_rgb: &[[f32; 3]]) -> (String, Vec<u8>) {
    let topology = format!(
        r#"{{
            "class_name": "Sequential",
            "config": {{"name": "colors", "layers": [
                {{"class_name": "GlobalAveragePooling2D", "config": {{"name": "gap",
                    "batch_input_shape": [null, {HEIGHT}, {WIDTH}, 3]}}}},
                {{"class_name": "Dense", "config": {{"name": "scores", "units": {classes},
                    "activation": "softmax", "use_bias": true}}}}
            ]}},
            "keras_version": "2.2.4",
            "backend": "tensorflow"
        }}"#,
        classes = class_rgb.len()
    );

    let mut kernel = Vec::with_capacity(3 * class_rgb.len());
    for channel in 0..3 {
        kernel.extend(class_rgb.iter().map(|rgb| rgb[channel] / 255.0));
    }
    let weights = safetensors_bytes(&[
        ("scores/kernel", vec![3, class_rgb.len()], kernel),
        ("scores/bias", vec![class_rgb.len()], vec![0.0; class_rgb.len()]),
    ]);
    (topology, weights)
}

pub fn write_solid_image(path: &Path, rgb: [u8; 3], width: u32, height: u32) {
    RgbImage::from_pixel(width, height, Rgb(rgb))
        .save(path)
        .unwrap();
}
