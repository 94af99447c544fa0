use burn::{prelude::*, tensor::Tensor};

/// `x * scale + offset`, the same transform as a Keras `Rescaling` layer.
pub fn rescale<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    scale: f32,
    offset: f32,
) -> Tensor<B, D> {
    if scale == 1.0 && offset == 0.0 {
        return tensor;
    }
    tensor.mul_scalar(scale).add_scalar(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn maps_bytes_to_unit_range() {
        let pixels = Tensor::<B, 1>::from_data([0.0, 127.5, 255.0], &Default::default());
        let out: Vec<f32> = rescale(pixels, 1.0 / 255.0, 0.0)
            .into_data()
            .iter::<f32>()
            .collect();

        for (actual, expected) in out.iter().zip([0.0f32, 0.5, 1.0]) {
            assert!((actual - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn offset_shifts_after_scaling() {
        let pixels = Tensor::<B, 1>::from_data([0.0, 255.0], &Default::default());
        let out: Vec<f32> = rescale(pixels, 1.0 / 127.5, -1.0)
            .into_data()
            .iter::<f32>()
            .collect();

        for (actual, expected) in out.iter().zip([-1.0f32, 1.0]) {
            assert!((actual - expected).abs() < 1e-6);
        }
    }
}
