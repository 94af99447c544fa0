mod common;
mod data;
mod error;
mod model;
mod utils;

use crate::{
    data::loader::{ImageConfig, load_image},
    model::{
        inference::{Prediction, infer},
        sequential::SequentialModel,
    },
    utils::{app_paths::AppPaths, logging, result_file::write_result},
};
use burn::prelude::*;
use color_eyre::{Result, eyre::WrapErr};
use log::info;

#[cfg(not(feature = "cuda"))]
type InferenceBackend = burn::backend::NdArray<f32>;
#[cfg(feature = "cuda")]
type InferenceBackend = burn::backend::Cuda<f32, i32>;

/// Loads the model, classifies the image and writes the winning class index.
/// Nothing is written unless every step succeeds.
fn predict<B: Backend>(
    paths: &AppPaths,
    config: &ImageConfig,
    device: &B::Device,
) -> Result<Prediction> {
    let model = SequentialModel::<B>::load(&paths.topology_path, &paths.weights_path, device)
        .wrap_err_with(|| {
            format!(
                "Failed to load model from {} and {}",
                paths.topology_path, paths.weights_path
            )
        })?;
    info!(
        "Model {} loaded successfully ({} classes).",
        model.name().unwrap_or("<unnamed>"),
        model.output_classes()
    );

    let image = load_image::<B>(&paths.image_path, config, device)
        .wrap_err_with(|| format!("Failed to read image {}", paths.image_path))?;

    let prediction = infer(&model, image).wrap_err("Inference failed")?;
    info!("Scores: {:?}", prediction.scores);
    info!("Predicted class: {}", prediction.class_index);

    write_result(&paths.result_path, prediction.class_index)
        .wrap_err_with(|| format!("Failed to write result to {}", paths.result_path))?;
    Ok(prediction)
}

fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init();

    let paths = AppPaths::from_env();
    let config = paths
        .image_config()
        .wrap_err("Failed to load image preprocessing config")?;
    let device = Default::default();
    predict::<InferenceBackend>(&paths, &config, &device)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::fixtures::{tiny_color_model, write_solid_image};
    use burn::backend::NdArray;
    use std::{fs, path::Path};

    type B = NdArray<f32>;

    const RGB_CLASSES: [[f32; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    fn workspace(dir: &Path, class_rgb: &[[f32; 3]], pixel: [u8; 3]) -> AppPaths {
        let (topology, weights) = tiny_color_model(class_rgb);
        let paths = AppPaths {
            topology_path: dir.join("model_bike2.json").to_string_lossy().into_owned(),
            weights_path: dir
                .join("model_bike2.safetensors")
                .to_string_lossy()
                .into_owned(),
            image_path: dir.join("image.png").to_string_lossy().into_owned(),
            result_path: dir.join("result").to_string_lossy().into_owned(),
            image_config_path: None,
        };
        fs::write(&paths.topology_path, topology).unwrap();
        fs::write(&paths.weights_path, weights).unwrap();
        write_solid_image(Path::new(&paths.image_path), pixel, 320, 240);
        paths
    }

    #[test]
    fn writes_the_predicted_index() {
        let dir = tempfile::tempdir().unwrap();
        let paths = workspace(dir.path(), &RGB_CLASSES, [20, 30, 220]);

        let prediction = predict::<B>(&paths, &ImageConfig::new(), &Default::default()).unwrap();

        assert_eq!(prediction.class_index, 2);
        let written = fs::read_to_string(&paths.result_path).unwrap();
        assert_eq!(written, "2");
        assert!(written.parse::<usize>().unwrap() < RGB_CLASSES.len());
    }

    #[test]
    fn repeated_runs_write_the_same_index() {
        let dir = tempfile::tempdir().unwrap();
        let paths = workspace(dir.path(), &RGB_CLASSES, [90, 180, 60]);
        let device = Default::default();

        let first = predict::<B>(&paths, &ImageConfig::new(), &device).unwrap();
        let first_written = fs::read_to_string(&paths.result_path).unwrap();
        let second = predict::<B>(&paths, &ImageConfig::new(), &device).unwrap();

        assert_eq!(first, second);
        assert_eq!(first_written, fs::read_to_string(&paths.result_path).unwrap());
    }

    #[test]
    fn swapping_weights_changes_the_answer() {
        let dir = tempfile::tempdir().unwrap();
        let paths = workspace(dir.path(), &RGB_CLASSES, [230, 15, 15]);
        let device = Default::default();
        let red_first = predict::<B>(&paths, &ImageConfig::new(), &device).unwrap();

        // Same topology, classes reordered so red now maps to index 1.
        let (_, swapped) = tiny_color_model(&[[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        fs::write(&paths.weights_path, swapped).unwrap();
        let red_second = predict::<B>(&paths, &ImageConfig::new(), &device).unwrap();

        assert_eq!(red_first.class_index, 0);
        assert_eq!(red_second.class_index, 1);
        assert_eq!(fs::read_to_string(&paths.result_path).unwrap(), "1");
    }

    #[test]
    fn corrupt_image_leaves_no_result() {
        let dir = tempfile::tempdir().unwrap();
        let paths = workspace(dir.path(), &RGB_CLASSES, [0, 0, 0]);
        fs::write(&paths.image_path, b"\x89PNG truncated").unwrap();

        let err = predict::<B>(&paths, &ImageConfig::new(), &Default::default()).unwrap_err();

        assert!(format!("{err:?}").contains("Failed to read image"));
        assert!(!Path::new(&paths.result_path).exists());
    }

    #[test]
    fn input_size_must_match_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let paths = workspace(dir.path(), &RGB_CLASSES, [0, 0, 0]);
        let config = ImageConfig::new().with_height(64).with_width(64);

        assert!(predict::<B>(&paths, &config, &Default::default()).is_err());
        assert!(!Path::new(&paths.result_path).exists());
    }
}
