use crate::error::{ModelError, Result};
use burn::prelude::*;
use log::debug;
use safetensors::{Dtype, SafeTensors};
use std::{collections::HashMap, fs, path::Path};

struct StoredTensor {
    shape: Vec<usize>,
    values: Vec<f32>,
}

/// Learned parameters keyed `"<layer>/<param>"`, e.g. `conv2d_1/kernel`.
///
/// Shapes follow Keras conventions: convolution kernels are
/// `[kh, kw, in, out]`, dense kernels `[in, out]`.
pub struct WeightStore {
    tensors: HashMap<String, StoredTensor>,
}

impl WeightStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let file = SafeTensors::deserialize(bytes)?;
        let mut tensors = HashMap::new();
        for (key, view) in file.tensors() {
            let values: Vec<f32> = match view.dtype() {
                Dtype::F32 => view
                    .data()
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
                Dtype::F64 => view
                    .data()
                    .chunks_exact(8)
                    .map(|b| {
                        let bytes: [u8; 8] = [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]];
                        f64::from_le_bytes(bytes) as f32
                    })
                    .collect(),
                other => {
                    return Err(ModelError::WeightDtype {
                        key,
                        dtype: format!("{other:?}"),
                    });
                }
            };
            debug!("weight {key}: {:?}", view.shape());
            tensors.insert(
                key,
                StoredTensor {
                    shape: view.shape().to_vec(),
                    values,
                },
            );
        }
        Ok(Self { tensors })
    }

    pub fn key(layer: &str, param: &str) -> String {
        format!("{layer}/{param}")
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Fetches `layer/param`, insisting on the exact shape the layer needs.
    pub fn tensor<B: Backend, const D: usize>(
        &self,
        layer: &str,
        param: &str,
        shape: [usize; D],
        device: &B::Device,
    ) -> Result<Tensor<B, D>> {
        let key = Self::key(layer, param);
        let stored = self
            .tensors
            .get(&key)
            .ok_or_else(|| ModelError::MissingWeight(key.clone()))?;
        if stored.shape != shape {
            return Err(ModelError::WeightShape {
                key,
                expected: shape.to_vec(),
                actual: stored.shape.clone(),
            });
        }
        Ok(Tensor::from_data(
            TensorData::new(stored.values.clone(), shape).convert::<B::FloatElem>(),
            device,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::fixtures::{safetensors_bytes, safetensors_raw};
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn loads_tensors_by_layer_and_param() {
        let bytes = safetensors_bytes(&[
            ("dense_1/kernel", vec![2, 3], vec![1., 2., 3., 4., 5., 6.]),
            ("dense_1/bias", vec![3], vec![0.5, 0.5, 0.5]),
        ]);
        let store = WeightStore::from_bytes(&bytes).unwrap();
        let device = Default::default();

        assert_eq!(store.len(), 2);
        let kernel = store
            .tensor::<B, 2>("dense_1", "kernel", [2, 3], &device)
            .unwrap();
        assert_eq!(kernel.dims(), [2, 3]);
        assert_eq!(
            kernel.into_data().iter::<f32>().collect::<Vec<_>>(),
            vec![1., 2., 3., 4., 5., 6.]
        );
    }

    #[test]
    fn missing_and_misshapen_tensors_are_errors() {
        let bytes = safetensors_bytes(&[("dense_1/bias", vec![3], vec![0.; 3])]);
        let store = WeightStore::from_bytes(&bytes).unwrap();
        let device = Default::default();

        assert!(matches!(
            store.tensor::<B, 2>("dense_1", "kernel", [2, 3], &device),
            Err(ModelError::MissingWeight(key)) if key == "dense_1/kernel"
        ));
        assert!(matches!(
            store.tensor::<B, 1>("dense_1", "bias", [4], &device),
            Err(ModelError::WeightShape { expected, actual, .. })
                if expected == vec![4] && actual == vec![3]
        ));
    }

    #[test]
    fn double_precision_is_narrowed_to_f32() {
        let bytes: Vec<u8> = [0.25f64, -1.5, 1e-3]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let store =
            WeightStore::from_bytes(&safetensors_raw(&[("bn/beta", Dtype::F64, vec![3], bytes)]))
                .unwrap();

        let beta = store
            .tensor::<B, 1>("bn", "beta", [3], &Default::default())
            .unwrap();
        assert_eq!(
            beta.into_data().iter::<f32>().collect::<Vec<_>>(),
            vec![0.25, -1.5, 1e-3f64 as f32]
        );
    }

    #[test]
    fn other_dtypes_are_rejected_by_key() {
        // two half-precision ones
        let bytes = vec![0x00, 0x3c, 0x00, 0x3c];
        let raw = safetensors_raw(&[("dense_1/bias", Dtype::F16, vec![2], bytes)]);

        assert!(matches!(
            WeightStore::from_bytes(&raw),
            Err(ModelError::WeightDtype { key, dtype }) if key == "dense_1/bias" && dtype == "F16"
        ));
    }

    #[test]
    fn garbage_is_not_a_weights_file() {
        assert!(matches!(
            WeightStore::from_bytes(b"definitely not safetensors"),
            Err(ModelError::Safetensors(_))
        ));
    }
}
