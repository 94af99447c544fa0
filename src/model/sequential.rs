use crate::{
    error::{ModelError, Result},
    model::{
        layers::{ActShape, Activations, Layer},
        topology::Topology,
        weights::WeightStore,
    },
};
use burn::prelude::*;
use log::{info, warn};
use std::{collections::HashSet, path::Path};

/// A Keras `Sequential` stack materialized for inference.
#[derive(Debug)]
pub struct SequentialModel<B: Backend> {
    name: Option<String>,
    input_shape: [usize; 3],
    layers: Vec<Layer<B>>,
    classes: usize,
}

impl<B: Backend> SequentialModel<B> {
    pub fn load(
        topology_path: impl AsRef<Path>,
        weights_path: impl AsRef<Path>,
        device: &B::Device,
    ) -> Result<Self> {
        let topology = Topology::load(topology_path)?;
        let weights = WeightStore::open(weights_path)?;
        Self::build(&topology, &weights, device)
    }

    pub fn build(topology: &Topology, weights: &WeightStore, device: &B::Device) -> Result<Self> {
        let [height, width, channels] = topology.input_shape;
        let mut shape = ActShape::Spatial {
            height,
            width,
            channels,
        };
        let mut layers = Vec::with_capacity(topology.layers.len());
        let mut consumed = HashSet::new();

        for spec in &topology.layers {
            let (layer, next) = Layer::build(spec, shape, weights, device)?;
            consumed.extend(
                spec.kind
                    .parameter_names()
                    .into_iter()
                    .map(|param| WeightStore::key(&spec.name, param)),
            );
            layers.push(layer);
            shape = next;
        }

        let ActShape::Flat(classes) = shape else {
            let layer = topology
                .layers
                .last()
                .map(|spec| spec.name.clone())
                .unwrap_or_else(|| "<input>".to_owned());
            return Err(ModelError::InvalidLayer {
                layer,
                reason: format!("model must end in a flat score vector, got {shape:?}"),
            });
        };

        for key in weights.keys().filter(|key| !consumed.contains(*key)) {
            warn!("Unused weight tensor {key}");
        }
        info!(
            "Built model {} with {} layers, {} weight tensors, {} classes",
            topology.name.as_deref().unwrap_or("<unnamed>"),
            layers.len(),
            weights.len(),
            classes
        );

        Ok(SequentialModel {
            name: topology.name.clone(),
            input_shape: topology.input_shape,
            layers,
            classes,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// `(height, width, channels)`
    pub fn input_shape(&self) -> [usize; 3] {
        self.input_shape
    }

    pub fn output_classes(&self) -> usize {
        self.classes
    }

    /// `input` is channels-first, `[N, C, H, W]`; returns `[N, classes]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let output = self
            .layers
            .iter()
            .fold(Activations::Spatial(input), |x, layer| layer.forward(x));
        match output {
            Activations::Flat(x) => x,
            Activations::Spatial(x) => {
                unreachable!("output rank is checked at build time, got {:?}", x.dims())
            }
        }
    }
}
