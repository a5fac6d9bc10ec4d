//! Task prompts and multimodal prompt construction.
//!
//! A prompt is the task instruction substituted into a role-structured chat
//! template, tokenized, and prefixed with one placeholder id per (downsampled)
//! audio position.

pub mod text;

use crate::features::FeatureSequence;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use text::{SpmTokenizer, Tokenizer};

/// Sentinel id standing in for not-yet-embedded audio positions.
pub const AUDIO_PLACEHOLDER_ID: i64 = -1;

/// Vocabulary piece marking the start of audio-latent content in generated
/// output.
pub const AUDIO_START_TOKEN: &str = "<|audio_start|>";

/// Supported inference tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Speech recognition.
    Asr,
    /// Speech-to-text translation.
    Ast,
    /// Speech-to-speech translation.
    S2sTrans,
    /// Spoken chat.
    S2sChat,
}

impl Task {
    /// The fixed instruction phrase substituted into the chat template.
    pub fn instruction(&self) -> &'static str {
        match self {
            Task::Asr => "Transcribe speech to text. ",
            Task::Ast => "Translate speech to english text. ",
            Task::S2sTrans => "Translate speech to english speech. ",
            Task::S2sChat => "Answer my question with speech. ",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Asr => "asr",
            Task::Ast => "ast",
            Task::S2sTrans => "s2s_trans",
            Task::S2sChat => "s2s_chat",
        }
    }
}

impl FromStr for Task {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "asr" => Ok(Task::Asr),
            "ast" => Ok(Task::Ast),
            "s2s_trans" => Ok(Task::S2sTrans),
            "s2s_chat" => Ok(Task::S2sChat),
            other => anyhow::bail!("unknown task {other:?} (expected asr/ast/s2s_trans/s2s_chat)"),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-structured chat template with one instruction slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    Qwen,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        PromptTemplate::Qwen
    }
}

impl PromptTemplate {
    fn layout(&self) -> &'static str {
        match self {
            PromptTemplate::Qwen => {
                "<|im_start|>system\nYou are a helpful assistant.<|im_end|>\n\
                 <|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n"
            }
        }
    }

    /// Substitute the instruction into the template, exactly once.
    pub fn render(&self, instruction: &str) -> String {
        self.layout().replacen("{}", instruction, 1)
    }
}

/// One prompt-plus-features example ready for collation.
#[derive(Debug, Clone)]
pub struct PromptExample {
    /// Placeholder ids followed by prompt token ids.
    pub input_ids: Vec<i64>,
    /// Per-position attention mask (pre-padding).
    pub attention_mask: Vec<bool>,
    /// Normalized acoustic features.
    pub features: FeatureSequence,
    /// Number of placeholder (audio) positions.
    pub audio_length: usize,
    /// Number of prompt token positions.
    pub prompt_length: usize,
}

/// Builds multimodal prompt examples for a fixed task.
pub struct PromptBuilder {
    tokenizer: Box<dyn Tokenizer>,
    template: PromptTemplate,
    task: Task,
}

impl PromptBuilder {
    pub fn new(tokenizer: Box<dyn Tokenizer>, template: PromptTemplate, task: Task) -> Self {
        Self {
            tokenizer,
            template,
            task,
        }
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    /// The rendered prompt text for this builder's task.
    pub fn prompt_text(&self) -> String {
        self.template.render(self.task.instruction())
    }

    /// Id of the audio-start marker in the shared vocabulary.
    ///
    /// A vocabulary without the marker cannot drive synthesis, so absence is a
    /// configuration error.
    pub fn audio_start_id(&self) -> Result<i64> {
        self.tokenizer
            .token_id(AUDIO_START_TOKEN)
            .ok_or_else(|| anyhow::anyhow!("vocabulary does not define {AUDIO_START_TOKEN}"))
    }

    /// Build a prompt example for one utterance's features.
    ///
    /// The audio placeholder run is `floor(frames / downsample_rate)` ids long,
    /// matching the adapter's output length for the same features.
    pub fn build(&self, features: FeatureSequence, downsample_rate: usize) -> Result<PromptExample> {
        let audio_length = features.downsampled_len(downsample_rate);
        let prompt_ids = self.tokenizer.encode(&self.prompt_text())?;
        let prompt_length = prompt_ids.len();

        let mut input_ids = vec![AUDIO_PLACEHOLDER_ID; audio_length];
        input_ids.extend(prompt_ids);

        // Every real id is >= -1, as is the placeholder itself, so this mask
        // is all-true before padding; padding added by the collator is the
        // only masked-out region.
        let attention_mask = input_ids
            .iter()
            .map(|&id| id >= AUDIO_PLACEHOLDER_ID)
            .collect();

        Ok(PromptExample {
            input_ids,
            attention_mask,
            features,
            audio_length,
            prompt_length,
        })
    }
}
