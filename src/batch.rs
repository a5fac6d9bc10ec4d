//! Batch assembly for prompt examples.
//!
//! Variable-length id and feature sequences are right-padded to the batch
//! maximum and stacked into tensors. Output order always matches input order;
//! the driver relies on that to map results back to utterance ids.

use crate::prompt::PromptExample;
use anyhow::Result;
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Int, Tensor, TensorData};

/// Stacked, padded tensors for one or more prompt examples.
#[derive(Debug)]
pub struct Batch<B: Backend> {
    /// `[batch, seq]` token ids, placeholder ids included, padded with the
    /// tokenizer pad id.
    pub input_ids: Tensor<B, 2, Int>,
    /// `[batch, seq]` validity mask: true for real positions, false for
    /// padding.
    pub attention_mask: Tensor<B, 2, Bool>,
    /// `[batch, frames, dim]` feature frames, zero-padded along the frame
    /// axis.
    pub features: Tensor<B, 3>,
    /// Unpadded placeholder count per example.
    pub audio_lengths: Vec<usize>,
    /// Unpadded prompt token count per example.
    pub prompt_lengths: Vec<usize>,
    /// Unpadded feature frame count per example.
    pub feature_lengths: Vec<usize>,
}

impl<B: Backend> Batch<B> {
    /// Number of examples in the batch.
    pub fn len(&self) -> usize {
        self.audio_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.audio_lengths.is_empty()
    }

    /// Padded sequence length.
    pub fn seq_len(&self) -> usize {
        self.input_ids.dims()[1]
    }
}

/// Collate examples into a batch, preserving input order.
pub fn collate<B: Backend>(
    examples: &[PromptExample],
    pad_id: i64,
    device: &B::Device,
) -> Result<Batch<B>> {
    if examples.is_empty() {
        anyhow::bail!("cannot collate an empty batch");
    }

    let batch = examples.len();
    let max_ids = examples
        .iter()
        .map(|e| e.input_ids.len())
        .max()
        .unwrap_or(0);
    let max_frames = examples
        .iter()
        .map(|e| e.features.len())
        .max()
        .unwrap_or(0);
    let dim = examples[0].features.dim();
    if examples.iter().any(|e| e.features.dim() != dim) {
        anyhow::bail!("feature dimension mismatch across batch examples");
    }

    let mut ids = Vec::with_capacity(batch * max_ids);
    let mut mask = Vec::with_capacity(batch * max_ids);
    let mut features = vec![0.0_f32; batch * max_frames * dim];

    for (idx, example) in examples.iter().enumerate() {
        ids.extend_from_slice(&example.input_ids);
        ids.extend(std::iter::repeat(pad_id).take(max_ids - example.input_ids.len()));

        mask.extend_from_slice(&example.attention_mask);
        mask.extend(std::iter::repeat(false).take(max_ids - example.attention_mask.len()));

        let base = idx * max_frames * dim;
        for (frame_idx, frame) in example.features.frames().iter().enumerate() {
            let offset = base + frame_idx * dim;
            features[offset..offset + dim].copy_from_slice(frame);
        }
    }

    Ok(Batch {
        input_ids: Tensor::from_data(TensorData::new(ids, [batch, max_ids]), device),
        attention_mask: Tensor::from_data(TensorData::new(mask, [batch, max_ids]), device),
        features: Tensor::from_data(TensorData::new(features, [batch, max_frames, dim]), device),
        audio_lengths: examples.iter().map(|e| e.audio_length).collect(),
        prompt_lengths: examples.iter().map(|e| e.prompt_length).collect(),
        feature_lengths: examples.iter().map(|e| e.features.len()).collect(),
    })
}
