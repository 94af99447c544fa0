use crate::data::loader::ImageConfig;
use burn::config::{Config, ConfigError};

pub struct AppPaths {
    pub topology_path: String,
    pub weights_path: String,
    pub image_path: String,
    pub result_path: String,
    pub image_config_path: Option<String>,
}

impl AppPaths {
    pub fn from_env() -> Self {
        Self {
            topology_path: std::env::var("MODEL_TOPOLOGY_PATH")
                .unwrap_or_else(|_| "model_bike2.json".into()),
            weights_path: std::env::var("MODEL_WEIGHTS_PATH")
                .unwrap_or_else(|_| "model_bike2.safetensors".into()),
            image_path: std::env::var("IMAGE_PATH").unwrap_or_else(|_| "image.jpg".into()),
            result_path: std::env::var("RESULT_PATH").unwrap_or_else(|_| "result".into()),
            image_config_path: std::env::var("IMAGE_CONFIG_PATH").ok(),
        }
    }

    /// Preprocessing settings, from `IMAGE_CONFIG_PATH` when set.
    pub fn image_config(&self) -> Result<ImageConfig, ConfigError> {
        match &self.image_config_path {
            Some(path) => ImageConfig::load(path),
            None => Ok(ImageConfig::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::Interpolation;

    fn paths(image_config_path: Option<String>) -> AppPaths {
        AppPaths {
            topology_path: "model.json".into(),
            weights_path: "model.safetensors".into(),
            image_path: "image.jpg".into(),
            result_path: "result".into(),
            image_config_path,
        }
    }

    #[test]
    fn image_config_defaults_without_a_file() {
        let config = paths(None).image_config().unwrap();

        assert_eq!((config.height, config.width), (150, 150));
    }

    #[test]
    fn image_config_is_read_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image_config.json");
        ImageConfig::new()
            .with_interpolation(Interpolation::Bilinear)
            .with_scale(0.5)
            .save(&path)
            .unwrap();

        let config = paths(Some(path.to_string_lossy().into_owned()))
            .image_config()
            .unwrap();

        assert_eq!(config.interpolation, Interpolation::Bilinear);
        assert_eq!(config.scale, 0.5);
    }

    #[test]
    fn missing_image_config_is_an_error() {
        assert!(paths(Some("/nonexistent/image_config.json".into()))
            .image_config()
            .is_err());
    }
}
