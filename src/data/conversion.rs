use crate::common::CHANNELS;

use burn::{prelude::*, tensor::Tensor};
use image::RgbImage;

/// Lays an RGB image out as a `[1, 3, H, W]` tensor of raw `0..=255`
/// intensities, one plane per channel.
pub fn image_to_tensor<B: Backend>(img: &RgbImage, device: &B::Device) -> Tensor<B, 4> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let hw = height * width;
    let mut buf = vec![0f32; CHANNELS * hw];
    for (x, y, pixel) in img.enumerate_pixels() {
        let idx = y as usize * width + x as usize;
        for (channel, value) in pixel.0.iter().enumerate() {
            buf[channel * hw + idx] = *value as f32;
        }
    }
    Tensor::<B, 3>::from_data(
        TensorData::new(buf, [CHANNELS, height, width]).convert::<B::FloatElem>(),
        device,
    )
    .reshape([1, CHANNELS, height, width])
}
