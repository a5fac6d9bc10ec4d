//! Run configuration.
//!
//! Configuration is loaded from a YAML file with [`load_config`]; every field
//! has a default, so a config file only needs to state what it changes. CLI
//! flags override the checkpoint paths after loading.

use crate::features::{FbankConfig, LfrConfig};
use crate::locator::TRAILING_CONTROL_TOKENS;
use crate::model::GenerationConfig;
use crate::prompt::PromptTemplate;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Compute precision the model components are loaded with.
///
/// Threaded explicitly through the model facade rather than kept as ambient
/// device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Float32,
    Float16,
    BFloat16,
}

impl Default for Precision {
    fn default() -> Self {
        Precision::BFloat16
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
/// Acoustic front-end parameters.
pub struct FeatureSettings {
    /// Mel bins per filter-bank frame.
    pub num_mel_bins: usize,
    /// Frames stacked per low-frame-rate window.
    pub lfr_m: usize,
    /// Frame stride of the low-frame-rate transform.
    pub lfr_n: usize,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            num_mel_bins: 80,
            lfr_m: 7,
            lfr_n: 6,
        }
    }
}

impl FeatureSettings {
    pub fn fbank_config(&self) -> FbankConfig {
        FbankConfig {
            num_bins: self.num_mel_bins,
            ..FbankConfig::default()
        }
    }

    pub fn lfr_config(&self) -> LfrConfig {
        LfrConfig {
            m: self.lfr_m,
            n: self.lfr_n,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
/// Checkpoint and asset locations. Paths may use the `hf://` scheme.
pub struct ModelPaths {
    /// Normalization statistics file.
    pub cmvn_path: Option<String>,
    /// SentencePiece model; defaults to `tokenizer.model` next to the LLM
    /// checkpoint.
    pub tokenizer_path: Option<String>,
    /// Speech encoder checkpoint.
    pub encoder_path: Option<String>,
    /// Modality adapter checkpoint.
    pub adapter_path: Option<String>,
    /// Language model checkpoint.
    pub llm_path: Option<String>,
    /// Optional LoRA delta checkpoint.
    pub lora_path: Option<String>,
    /// Vocoder checkpoint.
    pub vocoder_path: Option<String>,
    /// Speaker encoder checkpoint.
    pub spk_encoder_path: Option<String>,
    /// Prompt voice sample used for the run-wide speaker embedding.
    pub prompt_wav_path: Option<String>,
}

impl ModelPaths {
    /// Fetch a required path, failing with the owning flag name.
    pub fn require(&self, field: &str) -> Result<&str> {
        let value = match field {
            "cmvn_path" => &self.cmvn_path,
            "tokenizer_path" => &self.tokenizer_path,
            "encoder_path" => &self.encoder_path,
            "adapter_path" => &self.adapter_path,
            "llm_path" => &self.llm_path,
            "vocoder_path" => &self.vocoder_path,
            "spk_encoder_path" => &self.spk_encoder_path,
            "prompt_wav_path" => &self.prompt_wav_path,
            other => anyhow::bail!("unknown path field {other:?}"),
        };
        value
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing required path: {field}"))
    }

    /// Tokenizer path, defaulting to a `tokenizer.model` sibling of the LLM
    /// checkpoint.
    pub fn tokenizer_or_default(&self) -> Result<String> {
        if let Some(path) = &self.tokenizer_path {
            return Ok(path.clone());
        }
        let llm = self.require("llm_path")?;
        let sibling = Path::new(llm)
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("tokenizer.model");
        Ok(sibling.to_string_lossy().into_owned())
    }
}

/// Top-level pipeline configuration.
///
/// # Example YAML
///
/// ```yaml
/// paths:
///   cmvn_path: assets/global.mvn
///   encoder_path: hf://acme/speech-s2st/encoder.safetensors
///   llm_path: models/llm.safetensors
/// generation:
///   max_new_tokens: 500
///   temperature: 0.9
/// adapter_downsample_rate: 2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Checkpoint and asset locations.
    pub paths: ModelPaths,
    /// Acoustic front-end parameters.
    pub features: FeatureSettings,
    /// Sequence downsampling factor applied by the modality adapter.
    pub adapter_downsample_rate: usize,
    /// Decoding parameters.
    pub generation: GenerationConfig,
    /// Compute precision for model components.
    pub load_dtype: Precision,
    /// Chat template used for prompt construction.
    pub prompt_template: PromptTemplate,
    /// Vocoder output sample rate in Hz.
    pub vocoder_sample_rate: u32,
    /// Control tokens trimmed from the end of the audio-latent span.
    pub trailing_control_tokens: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: ModelPaths::default(),
            features: FeatureSettings::default(),
            adapter_downsample_rate: 2,
            generation: GenerationConfig::default(),
            load_dtype: Precision::default(),
            prompt_template: PromptTemplate::default(),
            vocoder_sample_rate: 24000,
            trailing_control_tokens: TRAILING_CONTROL_TOKENS,
        }
    }
}

/// Load a configuration from a YAML file.
///
/// # Errors
///
/// Returns an error if the file does not exist or contains invalid YAML.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        anyhow::bail!("config file not found: {}", path.display());
    }
    let data = fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&data)?;
    Ok(config)
}
