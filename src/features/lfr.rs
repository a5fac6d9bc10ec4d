//! Low-frame-rate stacking.
//!
//! Stacks `m` consecutive frames into one wide frame every `n` input frames,
//! reducing sequence length by a factor of `n` while multiplying the per-frame
//! dimension by `m`. The first frame is replicated `(m - 1) / 2` times as left
//! context and the last frame is replicated to fill the tail window, so the
//! output length is exactly `ceil(t / n)`.

/// Stacking parameters: `m` frames per output frame, advancing `n` frames.
#[derive(Debug, Clone, Copy)]
pub struct LfrConfig {
    pub m: usize,
    pub n: usize,
}

impl Default for LfrConfig {
    fn default() -> Self {
        Self { m: 7, n: 6 }
    }
}

impl LfrConfig {
    /// Output length for `t` input frames.
    pub fn output_len(&self, t: usize) -> usize {
        t.div_ceil(self.n)
    }
}

/// Apply low-frame-rate stacking to a non-empty frame sequence.
pub fn apply_lfr(frames: &[Vec<f32>], config: LfrConfig) -> Vec<Vec<f32>> {
    let t = frames.len();
    if t == 0 {
        return Vec::new();
    }

    let dim = frames[0].len();
    let t_out = config.output_len(t);
    let left_padding = (config.m - 1) / 2;

    let frame_at = |idx: usize| -> &[f32] {
        if idx < left_padding {
            &frames[0]
        } else if idx - left_padding < t {
            &frames[idx - left_padding]
        } else {
            &frames[t - 1]
        }
    };

    let mut output = Vec::with_capacity(t_out);
    for i in 0..t_out {
        let mut stacked = Vec::with_capacity(config.m * dim);
        for j in 0..config.m {
            stacked.extend_from_slice(frame_at(i * config.n + j));
        }
        output.push(stacked);
    }
    output
}
