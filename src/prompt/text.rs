//! Tokenizer seam and the SentencePiece implementation.

use anyhow::Result;
use sentencepiece::SentencePieceProcessor;
use std::path::Path;

/// Shared-vocabulary tokenizer used for prompt encoding and output decoding.
///
/// Kept behind a trait because the vocabulary ships with the language model;
/// the pipeline only needs encode/decode and a handful of reserved ids.
pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids.
    fn encode(&self, text: &str) -> Result<Vec<i64>>;

    /// Decode token ids back into text.
    fn decode(&self, ids: &[i64]) -> Result<String>;

    /// Id of a vocabulary piece, if present.
    fn token_id(&self, piece: &str) -> Option<i64>;

    /// Padding id used by the batch assembler.
    fn pad_id(&self) -> i64;

    /// Beginning-of-sequence id, if the vocabulary defines one.
    fn bos_id(&self) -> Option<i64>;

    /// End-of-sequence id, if the vocabulary defines one.
    fn eos_id(&self) -> Option<i64>;
}

/// SentencePiece-backed tokenizer.
#[derive(Debug)]
pub struct SpmTokenizer {
    sp: SentencePieceProcessor,
}

impl SpmTokenizer {
    /// Load a SentencePiece model from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let sp = SentencePieceProcessor::open(path)?;
        Ok(Self { sp })
    }
}

impl Tokenizer for SpmTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i64>> {
        let pieces = self.sp.encode(text)?;
        Ok(pieces.into_iter().map(|piece| piece.id as i64).collect())
    }

    fn decode(&self, ids: &[i64]) -> Result<String> {
        let ids: Vec<u32> = ids
            .iter()
            .filter(|&&id| id >= 0)
            .map(|&id| id as u32)
            .collect();
        Ok(self.sp.decode_piece_ids(&ids)?)
    }

    fn token_id(&self, piece: &str) -> Option<i64> {
        self.sp.piece_to_id(piece).ok().flatten().map(i64::from)
    }

    fn pad_id(&self) -> i64 {
        self.sp.pad_id().map(i64::from).unwrap_or(0)
    }

    fn bos_id(&self) -> Option<i64> {
        self.sp.bos_id().map(i64::from)
    }

    fn eos_id(&self) -> Option<i64> {
        self.sp.eos_id().map(i64::from)
    }
}
