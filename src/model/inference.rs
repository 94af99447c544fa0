use crate::{
    error::{ModelError, Result},
    model::sequential::SequentialModel,
};
use burn::prelude::*;

#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub scores: Vec<f32>,
    pub class_index: usize,
}

/// Runs one `[1, C, H, W]` image through `model` and picks the top class.
pub fn infer<B: Backend>(model: &SequentialModel<B>, images: Tensor<B, 4>) -> Result<Prediction> {
    let [height, width, channels] = model.input_shape();
    let [batch, c, h, w] = images.dims();
    if [batch, h, w, c] != [1, height, width, channels] {
        return Err(ModelError::InputShape {
            expected: vec![1, height, width, channels],
            actual: vec![batch, h, w, c],
        });
    }

    let raw_output = model.forward(images);
    let scores: Vec<f32> = raw_output.into_data().iter::<f32>().collect();
    let class_index = argmax(&scores).ok_or(ModelError::EmptyPrediction)?;
    Ok(Prediction {
        scores,
        class_index,
    })
}

/// First index of the largest score, with numpy's ordering: a NaN beats
/// every number, so the first NaN wins.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    if let Some(idx) = scores.iter().position(|score| score.is_nan()) {
        return Some(idx);
    }
    let mut best: Option<(usize, f32)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if top >= score => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(|(idx, _)| idx)
}
