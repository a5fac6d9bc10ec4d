//! # tolk — speech-to-speech translation and spoken chat inference
//!
//! This crate orchestrates a pretrained multimodal speech-language-model
//! stack: raw waveform in, translated (or conversational) speech out.
//!
//! ## Pipeline
//!
//! 1. **Features** ([`features`]): waveform → log-mel filter bank →
//!    low-frame-rate stacking → global mean/variance normalization.
//! 2. **Prompt** ([`prompt`]): a task instruction rendered into a chat
//!    template, tokenized, and prefixed with one placeholder id per audio
//!    position.
//! 3. **Batch** ([`batch`]): order-preserving right-padded collation.
//! 4. **Model facade** ([`model`]): encoder + adapter + LLM behind capability
//!    traits; multimodal embedding, text generation, and a teacher-forcing
//!    forward pass that recovers hidden states.
//! 5. **Latent location** ([`locator`]): the hidden-state span between the
//!    audio-start marker and the trailing control tokens.
//! 6. **Synthesis** ([`model::synth`]): a speaker-conditioned vocoder driven
//!    by a run-wide speaker embedding.
//!
//! The encoder, adapter, language model, vocoder and speaker encoder are
//! external components behind traits; `model::linear` ships weight-backed
//! reference implementations so the pipeline runs end to end from safetensors
//! checkpoints.
//!
//! ## Quick start
//!
//! ```no_run
//! use burn_ndarray::{NdArray, NdArrayDevice};
//! use tolk::{load_config, PipelineContext, Task, Utterance};
//!
//! let config = load_config("config.yaml").unwrap();
//! let device = NdArrayDevice::default();
//! let ctx = PipelineContext::<NdArray<f32>>::load(config, Task::S2sTrans, &device).unwrap();
//!
//! let group = vec![Utterance::from_wav_path("demo.wav")];
//! let report = ctx.process_group(&group, std::path::Path::new("response_wavs"));
//! for utterance in &report.reports {
//!     match &utterance.result {
//!         Ok(output) => println!("{}: {}", utterance.id, output.text),
//!         Err(err) => eprintln!("{} failed: {err}", utterance.id),
//!     }
//! }
//! ```

// Public modules - these are part of the stable API
pub mod audio;
pub mod batch;
pub mod config;
pub mod download;
pub mod features;
pub mod locator;
pub mod manifest;
pub mod model;
pub mod prompt;
pub mod runtime;
pub mod weights;

// Re-exports forming the public API
pub use config::{load_config, Config, Precision};
pub use manifest::{parse_manifest, Utterance};
pub use model::{GenerationConfig, GenerationResult, SpeechLmModel, SynthesisPipeline};
pub use prompt::{PromptBuilder, Task, Tokenizer};
pub use runtime::{PipelineContext, StageError, UtteranceReport};
