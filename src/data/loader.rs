use crate::{
    common::{HEIGHT, WIDTH},
    data::{conversion::image_to_tensor, normalize::rescale},
    error,
};

use burn::prelude::*;
use image::{
    ImageReader,
    imageops::{self, FilterType},
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    Nearest,
    Bilinear,
    Bicubic,
    Lanczos,
}

impl From<Interpolation> for FilterType {
    fn from(interpolation: Interpolation) -> Self {
        match interpolation {
            Interpolation::Nearest => FilterType::Nearest,
            Interpolation::Bilinear => FilterType::Triangle,
            Interpolation::Bicubic => FilterType::CatmullRom,
            Interpolation::Lanczos => FilterType::Lanczos3,
        }
    }
}

/// How an input image becomes a model input. The defaults reproduce Keras
/// `load_img(target_size=(150, 150))` followed by `img_to_array`: nearest
/// neighbour resize and no rescaling.
#[derive(Config)]
pub struct ImageConfig {
    #[config(default = "HEIGHT")]
    pub height: usize,

    #[config(default = "WIDTH")]
    pub width: usize,

    #[config(default = "Interpolation::Nearest")]
    pub interpolation: Interpolation,

    #[config(default = 1.0)]
    pub scale: f32,

    #[config(default = 0.0)]
    pub offset: f32,
}

pub fn load_image<B: Backend>(
    path: impl AsRef<Path>,
    config: &ImageConfig,
    device: &B::Device,
) -> error::Result<Tensor<B, 4>> {
    let path = path.as_ref();
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    debug!(
        "Decoded {} ({}x{}), resizing to {}x{}",
        path.display(),
        image.width(),
        image.height(),
        config.width,
        config.height
    );
    let resized = imageops::resize(
        &image.to_rgb8(),
        config.width as u32,
        config.height as u32,
        config.interpolation.into(),
    );
    Ok(rescale(
        image_to_tensor(&resized, device),
        config.scale,
        config.offset,
    ))
}
