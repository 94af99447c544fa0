use crate::{
    data::normalize::rescale,
    error::{ModelError, Result},
    model::{
        topology::{Activation, LayerKind, LayerSpec, Padding},
        weights::WeightStore,
    },
};
use burn::{
    module::Param,
    nn::{
        Linear, LinearConfig, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
        pool::{
            AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
            MaxPool2dConfig,
        },
    },
    prelude::*,
    tensor::{
        ElementConversion,
        activation::{relu, sigmoid, softmax, tanh},
    },
};

/// Per-sample shape of the tensor flowing between layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActShape {
    Spatial {
        height: usize,
        width: usize,
        channels: usize,
    },
    Flat(usize),
}

/// Activations are kept channels-first (`[N, C, H, W]`) while spatial.
#[derive(Clone, Debug)]
pub enum Activations<B: Backend> {
    Spatial(Tensor<B, 4>),
    Flat(Tensor<B, 2>),
}

/// `(left, right, top, bottom)`
type Pad = (usize, usize, usize, usize);

#[derive(Debug)]
pub enum Layer<B: Backend> {
    Conv2d {
        conv: Conv2d<B>,
        pad: Option<Pad>,
        activation: Activation,
    },
    MaxPool2d {
        pool: MaxPool2d,
        pad: Option<Pad>,
    },
    AvgPool2d(AvgPool2d),
    GlobalAvgPool2d(AdaptiveAvgPool2d),
    GlobalMaxPool2d,
    Flatten,
    Dense {
        linear: Linear<B>,
        activation: Activation,
    },
    Activation(Activation),
    BatchNorm {
        scale: Tensor<B, 1>,
        shift: Tensor<B, 1>,
    },
    Rescaling {
        scale: f32,
        offset: f32,
    },
    /// Identity outside of training.
    Dropout,
}

impl<B: Backend> Layer<B> {
    /// Materializes one layer for an input of shape `input`, pulling its
    /// parameters out of `weights`. Returns the layer and its output shape.
    pub fn build(
        spec: &LayerSpec,
        input: ActShape,
        weights: &WeightStore,
        device: &B::Device,
    ) -> Result<(Self, ActShape)> {
        let name = spec.name.as_str();
        match (&spec.kind, input) {
            (
                &LayerKind::Conv2d {
                    filters,
                    kernel,
                    strides,
                    dilation,
                    padding,
                    activation,
                    use_bias,
                },
                ActShape::Spatial {
                    height,
                    width,
                    channels,
                },
            ) => {
                let span = [
                    kernel[0].saturating_sub(1) * dilation[0] + 1,
                    kernel[1].saturating_sub(1) * dilation[1] + 1,
                ];
                let (rows, top, bottom) = window(name, height, span[0], strides[0], padding)?;
                let (cols, left, right) = window(name, width, span[1], strides[1], padding)?;

                let mut conv = Conv2dConfig::new([channels, filters], kernel)
                    .with_stride(strides)
                    .with_dilation(dilation)
                    .with_padding(PaddingConfig2d::Valid)
                    .with_bias(use_bias)
                    .init(device);
                // [kh, kw, in, out] -> [out, in, kh, kw]
                let keras_shape = [kernel[0], kernel[1], channels, filters];
                let kernel_weights = weights
                    .tensor::<B, 4>(name, "kernel", keras_shape, device)?
                    .permute([3, 2, 0, 1]);
                conv.weight = Param::from_tensor(kernel_weights);
                if use_bias {
                    let bias = weights.tensor::<B, 1>(name, "bias", [filters], device)?;
                    conv.bias = Some(Param::from_tensor(bias));
                }

                let layer = Layer::Conv2d {
                    conv,
                    pad: nonzero((left, right, top, bottom)),
                    activation,
                };
                let shape = ActShape::Spatial {
                    height: rows,
                    width: cols,
                    channels: filters,
                };
                Ok((layer, shape))
            }
            (
                &LayerKind::MaxPool2d {
                    pool,
                    strides,
                    padding,
                },
                ActShape::Spatial {
                    height,
                    width,
                    channels,
                },
            ) => {
                let (rows, top, bottom) = window(name, height, pool[0], strides[0], padding)?;
                let (cols, left, right) = window(name, width, pool[1], strides[1], padding)?;
                let pool = MaxPool2dConfig::new(pool)
                    .with_strides(strides)
                    .with_padding(PaddingConfig2d::Valid)
                    .init();
                let layer = Layer::MaxPool2d {
                    pool,
                    pad: nonzero((left, right, top, bottom)),
                };
                let shape = ActShape::Spatial {
                    height: rows,
                    width: cols,
                    channels,
                };
                Ok((layer, shape))
            }
            (
                &LayerKind::AvgPool2d { pool, strides },
                ActShape::Spatial {
                    height,
                    width,
                    channels,
                },
            ) => {
                let (rows, ..) = window(name, height, pool[0], strides[0], Padding::Valid)?;
                let (cols, ..) = window(name, width, pool[1], strides[1], Padding::Valid)?;
                let pool = AvgPool2dConfig::new(pool)
                    .with_strides(strides)
                    .with_padding(PaddingConfig2d::Valid)
                    .init();
                let shape = ActShape::Spatial {
                    height: rows,
                    width: cols,
                    channels,
                };
                Ok((Layer::AvgPool2d(pool), shape))
            }
            (LayerKind::GlobalAvgPool2d, ActShape::Spatial { channels, .. }) => Ok((
                Layer::GlobalAvgPool2d(AdaptiveAvgPool2dConfig::new([1, 1]).init()),
                ActShape::Flat(channels),
            )),
            (LayerKind::GlobalMaxPool2d, ActShape::Spatial { channels, .. }) => {
                Ok((Layer::GlobalMaxPool2d, ActShape::Flat(channels)))
            }
            (
                LayerKind::Flatten,
                ActShape::Spatial {
                    height,
                    width,
                    channels,
                },
            ) => Ok((Layer::Flatten, ActShape::Flat(height * width * channels))),
            (LayerKind::Flatten, ActShape::Flat(n)) => Ok((Layer::Flatten, ActShape::Flat(n))),
            (
                &LayerKind::Dense {
                    units,
                    activation,
                    use_bias,
                },
                ActShape::Flat(features),
            ) => {
                let mut linear = LinearConfig::new(features, units)
                    .with_bias(use_bias)
                    .init(device);
                linear.weight = Param::from_tensor(weights.tensor::<B, 2>(
                    name,
                    "kernel",
                    [features, units],
                    device,
                )?);
                if use_bias {
                    let bias = weights.tensor::<B, 1>(name, "bias", [units], device)?;
                    linear.bias = Some(Param::from_tensor(bias));
                }
                Ok((Layer::Dense { linear, activation }, ActShape::Flat(units)))
            }
            (LayerKind::Dropout { .. }, shape) => Ok((Layer::Dropout, shape)),
            (&LayerKind::Activation(activation), shape) => {
                Ok((Layer::Activation(activation), shape))
            }
            (
                &LayerKind::BatchNorm {
                    axis,
                    epsilon,
                    center,
                    scale,
                },
                shape,
            ) => {
                let (channels, rank) = match shape {
                    ActShape::Spatial { channels, .. } => (channels, 4),
                    ActShape::Flat(n) => (n, 2),
                };
                if axis != -1 && axis != rank - 1 {
                    return Err(ModelError::InvalidLayer {
                        layer: name.to_owned(),
                        reason: format!(
                            "axis {axis} is not the channel axis of a rank-{rank} input"
                        ),
                    });
                }
                let gamma = if scale {
                    weights.tensor::<B, 1>(name, "gamma", [channels], device)?
                } else {
                    Tensor::ones([channels], device)
                };
                let beta = if center {
                    weights.tensor::<B, 1>(name, "beta", [channels], device)?
                } else {
                    Tensor::zeros([channels], device)
                };
                let mean = weights.tensor::<B, 1>(name, "moving_mean", [channels], device)?;
                let variance =
                    weights.tensor::<B, 1>(name, "moving_variance", [channels], device)?;

                // Fold the running statistics into a single affine transform.
                let scale = gamma / variance.add_scalar(epsilon).sqrt();
                let shift = beta - mean * scale.clone();
                Ok((Layer::BatchNorm { scale, shift }, shape))
            }
            (&LayerKind::Rescaling { scale, offset }, shape) => {
                Ok((Layer::Rescaling { scale, offset }, shape))
            }
            (kind, shape) => Err(ModelError::InvalidLayer {
                layer: name.to_owned(),
                reason: format!("{kind:?} cannot take an input of shape {shape:?}"),
            }),
        }
    }

    pub fn forward(&self, input: Activations<B>) -> Activations<B> {
        use Activations::{Flat, Spatial};

        match (self, input) {
            (
                Layer::Conv2d {
                    conv,
                    pad,
                    activation,
                },
                Spatial(x),
            ) => Spatial(activate(*activation, conv.forward(pad_with(x, *pad, 0.0)))),
            (Layer::MaxPool2d { pool, pad }, Spatial(x)) => {
                Spatial(pool.forward(pad_with(x, *pad, f32::NEG_INFINITY)))
            }
            (Layer::AvgPool2d(pool), Spatial(x)) => Spatial(pool.forward(x)),
            (Layer::GlobalAvgPool2d(pool), Spatial(x)) => Flat(pool.forward(x).flatten(1, 3)),
            (Layer::GlobalMaxPool2d, Spatial(x)) => Flat(x.max_dim(3).max_dim(2).flatten(1, 3)),
            // Keras flattens channels-last.
            (Layer::Flatten, Spatial(x)) => Flat(x.permute([0, 2, 3, 1]).flatten(1, 3)),
            (Layer::Flatten, Flat(x)) => Flat(x),
            (Layer::Dense { linear, activation }, Flat(x)) => {
                Flat(activate(*activation, linear.forward(x)))
            }
            (Layer::Activation(activation), Spatial(x)) => Spatial(activate(*activation, x)),
            (Layer::Activation(activation), Flat(x)) => Flat(activate(*activation, x)),
            (Layer::BatchNorm { scale, shift }, Spatial(x)) => {
                let [channels] = scale.dims();
                Spatial(
                    x * scale.clone().reshape([1, channels, 1, 1])
                        + shift.clone().reshape([1, channels, 1, 1]),
                )
            }
            (Layer::BatchNorm { scale, shift }, Flat(x)) => {
                Flat(x * scale.clone().unsqueeze() + shift.clone().unsqueeze())
            }
            (Layer::Rescaling { scale, offset }, Spatial(x)) => {
                Spatial(rescale(x, *scale, *offset))
            }
            (Layer::Rescaling { scale, offset }, Flat(x)) => Flat(rescale(x, *scale, *offset)),
            (Layer::Dropout, x) => x,
            (layer, x) => unreachable!("{layer:?} built for a different rank than {x:?}"),
        }
    }
}

/// Channel axis is 1 in both `[N, C, H, W]` and `[N, C]`.
fn activate<B: Backend, const D: usize>(activation: Activation, x: Tensor<B, D>) -> Tensor<B, D> {
    match activation {
        Activation::Linear => x,
        Activation::Relu => relu(x),
        Activation::Sigmoid => sigmoid(x),
        Activation::Tanh => tanh(x),
        Activation::Softmax => softmax(x, 1),
    }
}

fn pad_with<B: Backend>(x: Tensor<B, 4>, pad: Option<Pad>, value: f32) -> Tensor<B, 4> {
    match pad {
        Some(pad) => x.pad(pad, B::FloatElem::from_elem(value)),
        None => x,
    }
}

fn nonzero(pad: Pad) -> Option<Pad> {
    (pad != (0, 0, 0, 0)).then_some(pad)
}

/// Output length plus `(before, after)` padding along one spatial axis.
fn window(
    layer: &str,
    input: usize,
    span: usize,
    stride: usize,
    padding: Padding,
) -> Result<(usize, usize, usize)> {
    if stride == 0 || span == 0 {
        return Err(ModelError::InvalidLayer {
            layer: layer.to_owned(),
            reason: "window and stride must be positive".to_owned(),
        });
    }
    match padding {
        Padding::Valid if input < span => Err(ModelError::InvalidLayer {
            layer: layer.to_owned(),
            reason: format!("window of {span} does not fit an input of {input}"),
        }),
        Padding::Valid => Ok(((input - span) / stride + 1, 0, 0)),
        Padding::Same => {
            let out = input.div_ceil(stride);
            let total = ((out - 1) * stride + span).saturating_sub(input);
            Ok((out, total / 2, total - total / 2))
        }
    }
}
