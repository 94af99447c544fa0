use thiserror::Error;

/// Everything that can go wrong between reading the model files and
/// producing a class index.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed topology JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported model class `{0}`, only Sequential models can be loaded")]
    UnsupportedModel(String),

    #[error("layer `{name}`: unsupported layer type `{class_name}`")]
    UnsupportedLayer { name: String, class_name: String },

    #[error("layer `{layer}`: unsupported activation `{activation}`")]
    UnsupportedActivation { layer: String, activation: String },

    #[error("layer `{layer}`: {reason}")]
    InvalidLayer { layer: String, reason: String },

    #[error("topology does not declare an input shape")]
    MissingInputShape,

    #[error("weights file is not valid safetensors: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error("missing weight tensor `{0}`")]
    MissingWeight(String),

    #[error("weight tensor `{key}` has dtype {dtype}, expected F32 or F64")]
    WeightDtype { key: String, dtype: String },

    #[error("weight tensor `{key}` has shape {actual:?}, expected {expected:?}")]
    WeightShape {
        key: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("could not decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("input tensor has shape {actual:?}, model expects {expected:?}")]
    InputShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("model produced an empty prediction vector")]
    EmptyPrediction,
}

pub type Result<T> = std::result::Result<T, ModelError>;
