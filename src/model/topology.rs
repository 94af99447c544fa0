use crate::error::{ModelError, Result};
use log::debug;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use std::{fs, path::Path};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Softmax,
    Tanh,
}

impl Activation {
    fn parse(layer: &str, name: Option<&str>) -> Result<Self> {
        match name.unwrap_or("linear") {
            "linear" => Ok(Self::Linear),
            "relu" => Ok(Self::Relu),
            "sigmoid" => Ok(Self::Sigmoid),
            "softmax" => Ok(Self::Softmax),
            "tanh" => Ok(Self::Tanh),
            other => Err(ModelError::UnsupportedActivation {
                layer: layer.to_owned(),
                activation: other.to_owned(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Padding {
    Valid,
    /// TensorFlow `same`: output size is `ceil(input / stride)`, extra
    /// padding goes to the bottom/right.
    Same,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LayerKind {
    Conv2d {
        filters: usize,
        kernel: [usize; 2],
        strides: [usize; 2],
        dilation: [usize; 2],
        padding: Padding,
        activation: Activation,
        use_bias: bool,
    },
    MaxPool2d {
        pool: [usize; 2],
        strides: [usize; 2],
        padding: Padding,
    },
    AvgPool2d {
        pool: [usize; 2],
        strides: [usize; 2],
    },
    GlobalAvgPool2d,
    GlobalMaxPool2d,
    Flatten,
    Dense {
        units: usize,
        activation: Activation,
        use_bias: bool,
    },
    Dropout {
        rate: f64,
    },
    Activation(Activation),
    BatchNorm {
        /// Keras axis, counted with the batch dimension; `-1` is the last.
        axis: i64,
        epsilon: f64,
        center: bool,
        scale: bool,
    },
    Rescaling {
        scale: f32,
        offset: f32,
    },
}

impl LayerKind {
    /// Weight tensors this layer reads, relative to its name.
    pub fn parameter_names(&self) -> Vec<&'static str> {
        match *self {
            LayerKind::Conv2d { use_bias, .. } | LayerKind::Dense { use_bias, .. } => {
                if use_bias {
                    vec!["kernel", "bias"]
                } else {
                    vec!["kernel"]
                }
            }
            LayerKind::BatchNorm { center, scale, .. } => {
                let mut names = Vec::with_capacity(4);
                if scale {
                    names.push("gamma");
                }
                if center {
                    names.push("beta");
                }
                names.extend(["moving_mean", "moving_variance"]);
                names
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LayerSpec {
    pub name: String,
    pub kind: LayerKind,
}

/// Layer structure of a Keras `Sequential` model, without any weights.
#[derive(Clone, Debug, PartialEq)]
pub struct Topology {
    pub name: Option<String>,
    /// `(height, width, channels)` of a single input image.
    pub input_shape: [usize; 3],
    pub layers: Vec<LayerSpec>,
}

impl Topology {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawModel = serde_json::from_str(json)?;
        if raw.class_name != "Sequential" {
            return Err(ModelError::UnsupportedModel(raw.class_name));
        }
        let (name, raw_layers) = match raw.config {
            RawModelConfig::Legacy(layers) => (None, layers),
            RawModelConfig::Named { name, layers } => (name, layers),
        };

        let mut input_shape = None;
        let mut layers = Vec::with_capacity(raw_layers.len());
        for (index, raw) in raw_layers.into_iter().enumerate() {
            let layer_name = raw
                .config
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{}_{index}", raw.class_name.to_lowercase()));

            if input_shape.is_none() {
                input_shape = declared_input_shape(&layer_name, &raw.config)?;
            }
            if raw.class_name == "InputLayer" {
                continue;
            }

            let kind = parse_kind(&layer_name, &raw.class_name, raw.config)?;
            debug!("topology layer {layer_name}: {kind:?}");
            layers.push(LayerSpec {
                name: layer_name,
                kind,
            });
        }

        Ok(Topology {
            name,
            input_shape: input_shape.ok_or(ModelError::MissingInputShape)?,
            layers,
        })
    }
}

#[derive(Deserialize)]
struct RawModel {
    class_name: String,
    config: RawModelConfig,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawModelConfig {
    /// Keras < 2.2 stored the layer list directly under `config`.
    Legacy(Vec<RawLayer>),
    Named {
        #[serde(default)]
        name: Option<String>,
        layers: Vec<RawLayer>,
    },
}

#[derive(Deserialize)]
struct RawLayer {
    class_name: String,
    config: Value,
}

#[derive(Clone, Copy, Deserialize)]
#[serde(untagged)]
enum Pair {
    One(usize),
    Two([usize; 2]),
}

impl From<Pair> for [usize; 2] {
    fn from(pair: Pair) -> Self {
        match pair {
            Pair::One(v) => [v, v],
            Pair::Two(v) => v,
        }
    }
}

fn unit_pair() -> Pair {
    Pair::One(1)
}

fn pool_pair() -> Pair {
    Pair::One(2)
}

fn yes() -> bool {
    true
}

#[derive(Deserialize)]
struct Conv2dJson {
    filters: usize,
    kernel_size: Pair,
    #[serde(default = "unit_pair")]
    strides: Pair,
    #[serde(default)]
    padding: Option<String>,
    #[serde(default)]
    data_format: Option<String>,
    #[serde(default = "unit_pair")]
    dilation_rate: Pair,
    #[serde(default)]
    groups: Option<usize>,
    #[serde(default)]
    activation: Option<String>,
    #[serde(default = "yes")]
    use_bias: bool,
}

#[derive(Deserialize)]
struct PoolJson {
    #[serde(default = "pool_pair")]
    pool_size: Pair,
    #[serde(default)]
    strides: Option<Pair>,
    #[serde(default)]
    padding: Option<String>,
    #[serde(default)]
    data_format: Option<String>,
}

#[derive(Deserialize)]
struct FormatJson {
    #[serde(default)]
    data_format: Option<String>,
}

#[derive(Deserialize)]
struct DenseJson {
    units: usize,
    #[serde(default)]
    activation: Option<String>,
    #[serde(default = "yes")]
    use_bias: bool,
}

#[derive(Deserialize)]
struct DropoutJson {
    rate: f64,
}

#[derive(Deserialize)]
struct ActivationJson {
    activation: String,
}

#[derive(Deserialize)]
struct BatchNormJson {
    #[serde(default)]
    axis: Option<Value>,
    #[serde(default = "default_epsilon")]
    epsilon: f64,
    #[serde(default = "yes")]
    center: bool,
    #[serde(default = "yes")]
    scale: bool,
}

fn default_epsilon() -> f64 {
    1e-3
}

#[derive(Deserialize)]
struct RescalingJson {
    scale: f32,
    #[serde(default)]
    offset: f32,
}

fn parse_kind(name: &str, class_name: &str, config: Value) -> Result<LayerKind> {
    let kind = match class_name {
        "Conv2D" | "Convolution2D" => {
            let c: Conv2dJson = layer_config(name, config)?;
            check_channels_last(name, c.data_format.as_deref())?;
            if c.groups.unwrap_or(1) != 1 {
                return Err(invalid(name, "grouped convolutions are not supported"));
            }
            LayerKind::Conv2d {
                filters: c.filters,
                kernel: c.kernel_size.into(),
                strides: c.strides.into(),
                dilation: c.dilation_rate.into(),
                padding: parse_padding(name, c.padding.as_deref())?,
                activation: Activation::parse(name, c.activation.as_deref())?,
                use_bias: c.use_bias,
            }
        }
        "MaxPooling2D" | "MaxPool2D" => {
            let c: PoolJson = layer_config(name, config)?;
            check_channels_last(name, c.data_format.as_deref())?;
            let pool: [usize; 2] = c.pool_size.into();
            LayerKind::MaxPool2d {
                pool,
                strides: c.strides.map(Into::into).unwrap_or(pool),
                padding: parse_padding(name, c.padding.as_deref())?,
            }
        }
        "AveragePooling2D" | "AvgPool2D" => {
            let c: PoolJson = layer_config(name, config)?;
            check_channels_last(name, c.data_format.as_deref())?;
            if parse_padding(name, c.padding.as_deref())? == Padding::Same {
                return Err(invalid(
                    name,
                    "`same` padding is not supported for average pooling",
                ));
            }
            let pool: [usize; 2] = c.pool_size.into();
            LayerKind::AvgPool2d {
                pool,
                strides: c.strides.map(Into::into).unwrap_or(pool),
            }
        }
        "GlobalAveragePooling2D" | "GlobalAvgPool2D" => {
            let c: FormatJson = layer_config(name, config)?;
            check_channels_last(name, c.data_format.as_deref())?;
            LayerKind::GlobalAvgPool2d
        }
        "GlobalMaxPooling2D" | "GlobalMaxPool2D" => {
            let c: FormatJson = layer_config(name, config)?;
            check_channels_last(name, c.data_format.as_deref())?;
            LayerKind::GlobalMaxPool2d
        }
        "Flatten" => {
            let c: FormatJson = layer_config(name, config)?;
            check_channels_last(name, c.data_format.as_deref())?;
            LayerKind::Flatten
        }
        "Dense" => {
            let c: DenseJson = layer_config(name, config)?;
            LayerKind::Dense {
                units: c.units,
                activation: Activation::parse(name, c.activation.as_deref())?,
                use_bias: c.use_bias,
            }
        }
        "Dropout" => {
            let c: DropoutJson = layer_config(name, config)?;
            LayerKind::Dropout { rate: c.rate }
        }
        "Activation" => {
            let c: ActivationJson = layer_config(name, config)?;
            LayerKind::Activation(Activation::parse(name, Some(&c.activation))?)
        }
        "BatchNormalization" => {
            let c: BatchNormJson = layer_config(name, config)?;
            LayerKind::BatchNorm {
                axis: parse_axis(name, c.axis.as_ref())?,
                epsilon: c.epsilon,
                center: c.center,
                scale: c.scale,
            }
        }
        "Rescaling" => {
            let c: RescalingJson = layer_config(name, config)?;
            LayerKind::Rescaling {
                scale: c.scale,
                offset: c.offset,
            }
        }
        other => {
            return Err(ModelError::UnsupportedLayer {
                name: name.to_owned(),
                class_name: other.to_owned(),
            });
        }
    };
    Ok(kind)
}

fn layer_config<T: DeserializeOwned>(name: &str, config: Value) -> Result<T> {
    serde_json::from_value(config).map_err(|err| invalid(name, &err.to_string()))
}

fn invalid(layer: &str, reason: &str) -> ModelError {
    ModelError::InvalidLayer {
        layer: layer.to_owned(),
        reason: reason.to_owned(),
    }
}

fn parse_padding(layer: &str, padding: Option<&str>) -> Result<Padding> {
    match padding.unwrap_or("valid") {
        "valid" => Ok(Padding::Valid),
        "same" => Ok(Padding::Same),
        other => Err(invalid(layer, &format!("unsupported padding `{other}`"))),
    }
}

fn check_channels_last(layer: &str, data_format: Option<&str>) -> Result<()> {
    match data_format {
        None | Some("channels_last") => Ok(()),
        Some(other) => Err(invalid(layer, &format!("unsupported data_format `{other}`"))),
    }
}

/// A single normalization axis; whether it is the channel axis depends on
/// the input rank, which is only known once the model is built.
fn parse_axis(layer: &str, axis: Option<&Value>) -> Result<i64> {
    let single = match axis {
        None | Some(Value::Null) => return Ok(-1),
        Some(Value::Array(axes)) if axes.len() == 1 => &axes[0],
        Some(value) => value,
    };
    single
        .as_i64()
        .ok_or_else(|| invalid(layer, &format!("unsupported batch normalization axis {single}")))
}

/// Reads `batch_input_shape` (Keras 2) or `batch_shape` (Keras 3) off a
/// layer config: `[null, height, width, channels]`.
fn declared_input_shape(layer: &str, config: &Value) -> Result<Option<[usize; 3]>> {
    let Some(shape) = config
        .get("batch_input_shape")
        .or_else(|| config.get("batch_shape"))
    else {
        return Ok(None);
    };
    let dims = shape
        .as_array()
        .filter(|dims| dims.len() == 4)
        .ok_or_else(|| invalid(layer, &format!("expected a rank-4 batch shape, got {shape}")))?;
    let mut out = [0usize; 3];
    for (slot, dim) in out.iter_mut().zip(&dims[1..]) {
        *slot = dim
            .as_u64()
            .filter(|&d| d > 0)
            .ok_or_else(|| invalid(layer, &format!("input dimensions must be fixed, got {shape}")))?
            as usize;
    }
    Ok(Some(out))
}
