//! Audio-latent location within teacher-forcing hidden states.
//!
//! Generated output interleaves text with an audio-bearing tail introduced by
//! the audio-start marker. The locator finds that marker inside the generated
//! region and computes the hidden-state span holding audio latents.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use thiserror::Error;

/// Number of fixed control tokens emitted after the audio segment.
///
/// The vocoder never consumes these trailing positions, so they are trimmed
/// from the end of the hidden-state sequence.
pub const TRAILING_CONTROL_TOKENS: usize = 6;

/// Failure to isolate an audio-latent span.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocateError {
    /// The generated ids never produced the audio-start marker.
    #[error("audio start token {token_id} not present in generated output")]
    MissingAudioStart { token_id: i64 },
    /// The span collapsed after trimming trailing control tokens.
    #[error("audio latent span is empty (start {start}, end {end})")]
    EmptySpan { start: usize, end: usize },
}

/// Half-open hidden-state index range holding audio latents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatentSpan {
    pub start: usize,
    pub end: usize,
}

impl LatentSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Locate the audio-latent span for one example.
///
/// The search covers only the generated region: the marker offset is taken
/// relative to `generated_ids` and shifted by `prompt_and_encoding_len`. The
/// span end trims `trailing` control-token positions from the end of the
/// combined sequence (`prompt_and_encoding_len + generated_ids.len()`).
pub fn locate_latents(
    generated_ids: &[i64],
    prompt_and_encoding_len: usize,
    audio_start_id: i64,
    trailing: usize,
) -> Result<LatentSpan, LocateError> {
    let offset = generated_ids
        .iter()
        .position(|&id| id == audio_start_id)
        .ok_or(LocateError::MissingAudioStart {
            token_id: audio_start_id,
        })?;

    let start = prompt_and_encoding_len + offset;
    let total = prompt_and_encoding_len + generated_ids.len();
    let end = total.saturating_sub(trailing);
    if end <= start {
        return Err(LocateError::EmptySpan { start, end });
    }
    Ok(LatentSpan { start, end })
}

/// Slice the located span out of `[batch, seq, hidden]` hidden states.
pub fn slice_latents<B: Backend>(hidden: Tensor<B, 3>, span: LatentSpan) -> Tensor<B, 3> {
    hidden.narrow(1, span.start, span.len())
}
