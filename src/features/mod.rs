//! Acoustic feature extraction: filter bank, low-frame-rate stacking, and
//! global mean/variance normalization.
//!
//! The extractor turns a 16 kHz mono waveform into the normalized feature
//! sequence the speech encoder consumes.

pub mod cmvn;
pub mod fbank;
pub mod lfr;

use anyhow::Result;

pub use cmvn::Cmvn;
pub use fbank::{Fbank, FbankConfig};
pub use lfr::{apply_lfr, LfrConfig};

/// An ordered sequence of fixed-dimension feature frames.
#[derive(Debug, Clone)]
pub struct FeatureSequence {
    frames: Vec<Vec<f32>>,
    dim: usize,
}

impl FeatureSequence {
    /// Wrap raw frames; every frame must share one dimension and the sequence
    /// must be non-empty.
    pub fn new(frames: Vec<Vec<f32>>) -> Result<Self> {
        let Some(first) = frames.first() else {
            anyhow::bail!("feature sequence must contain at least one frame");
        };
        let dim = first.len();
        if frames.iter().any(|frame| frame.len() != dim) {
            anyhow::bail!("feature frames have inconsistent dimensions");
        }
        Ok(Self { frames, dim })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn frames(&self) -> &[Vec<f32>] {
        &self.frames
    }

    /// Effective length after downsampling by `rate`.
    pub fn downsampled_len(&self, rate: usize) -> usize {
        self.frames.len() / rate
    }
}

/// Waveform-to-features pipeline: fbank, LFR stacking, then normalization.
#[derive(Debug)]
pub struct FeatureExtractor {
    fbank: Fbank,
    lfr: LfrConfig,
    cmvn: Cmvn,
}

impl FeatureExtractor {
    /// Assemble the extractor, checking that the statistics match the stacked
    /// feature dimension.
    pub fn new(fbank_config: FbankConfig, lfr: LfrConfig, cmvn: Cmvn) -> Result<Self> {
        let fbank = Fbank::new(fbank_config);
        let stacked_dim = fbank.num_bins() * lfr.m;
        if cmvn.dim() != stacked_dim {
            anyhow::bail!(
                "cmvn dimension {} does not match stacked feature dimension {}",
                cmvn.dim(),
                stacked_dim
            );
        }
        Ok(Self { fbank, lfr, cmvn })
    }

    /// Stacked feature dimension consumed by the encoder.
    pub fn output_dim(&self) -> usize {
        self.fbank.num_bins() * self.lfr.m
    }

    /// Extract normalized features from a 16 kHz mono waveform.
    pub fn extract(&self, samples: &[f32]) -> Result<FeatureSequence> {
        let mel = self.fbank.compute(samples)?;
        let mut stacked = apply_lfr(&mel, self.lfr);
        self.cmvn.apply(&mut stacked)?;
        FeatureSequence::new(stacked)
    }
}

#[cfg(test)]
mod tests {
    use super::{Cmvn, FbankConfig, FeatureExtractor, FeatureSequence, LfrConfig};

    fn extractor() -> FeatureExtractor {
        let lfr = LfrConfig::default();
        let dim = 80 * lfr.m;
        let cmvn = Cmvn::new(vec![0.0; dim], vec![1.0; dim]).expect("cmvn");
        FeatureExtractor::new(FbankConfig::default(), lfr, cmvn).expect("extractor")
    }

    #[test]
    fn extracts_stacked_normalized_features() {
        let extractor = extractor();
        let samples: Vec<f32> = (0..16000).map(|i| (i as f32 * 0.01).sin()).collect();
        let features = extractor.extract(&samples).expect("extract");

        // 1 s at 16 kHz -> 98 mel frames -> ceil(98 / 6) stacked frames.
        assert_eq!(features.len(), 17);
        assert_eq!(features.dim(), 560);
        assert_eq!(features.downsampled_len(2), 8);
    }

    #[test]
    fn rejects_mismatched_statistics() {
        let cmvn = Cmvn::new(vec![0.0; 10], vec![1.0; 10]).expect("cmvn");
        let err =
            FeatureExtractor::new(FbankConfig::default(), LfrConfig::default(), cmvn).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn empty_sequence_is_rejected() {
        assert!(FeatureSequence::new(Vec::new()).is_err());
    }

    #[test]
    fn too_short_waveform_is_an_extraction_error() {
        let err = extractor().extract(&[0.0; 100]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }
}
