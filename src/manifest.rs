//! Utterance manifests.
//!
//! Batch runs are driven by a whitespace-separated two-column manifest,
//! `<utterance_id> <wav_path>` per line. Order in the file is the order
//! utterances are processed and reported.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// One input utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub id: String,
    pub wav_path: PathBuf,
}

impl Utterance {
    /// Derive an utterance from a bare wav path, using the file stem as id.
    pub fn from_wav_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "utterance".to_string());
        Self {
            id,
            wav_path: path.to_path_buf(),
        }
    }
}

/// Parse a manifest file, preserving line order.
///
/// Blank lines are skipped; a line without exactly two columns is a fatal
/// error (the manifest is a critical startup asset).
pub fn parse_manifest(path: impl AsRef<Path>) -> Result<Vec<Utterance>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;

    let mut utterances = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut columns = line.split_whitespace();
        let (Some(id), Some(wav_path), None) = (columns.next(), columns.next(), columns.next())
        else {
            anyhow::bail!(
                "malformed manifest line {} in {}: expected `<utt_id> <wav_path>`, got {line:?}",
                line_no + 1,
                path.display()
            );
        };
        utterances.push(Utterance {
            id: id.to_string(),
            wav_path: PathBuf::from(wav_path),
        });
    }

    if utterances.is_empty() {
        anyhow::bail!("manifest {} contains no utterances", path.display());
    }
    Ok(utterances)
}

#[cfg(test)]
mod tests {
    use super::{parse_manifest, Utterance};
    use std::io::Write;

    fn write_manifest(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(content.as_bytes()).expect("write");
        file
    }

    #[test]
    fn parses_two_columns_in_order() {
        let file = write_manifest("utt_a /wavs/a.wav\n\nutt_b /wavs/b.wav\nutt_c /wavs/c.wav\n");
        let utterances = parse_manifest(file.path()).expect("parse");
        let ids: Vec<&str> = utterances.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["utt_a", "utt_b", "utt_c"]);
        assert_eq!(utterances[1].wav_path.to_str(), Some("/wavs/b.wav"));
    }

    #[test]
    fn malformed_line_is_fatal() {
        let file = write_manifest("utt_a /wavs/a.wav extra\n");
        let err = parse_manifest(file.path()).unwrap_err();
        assert!(err.to_string().contains("malformed manifest line 1"));
    }

    #[test]
    fn single_column_is_fatal() {
        let file = write_manifest("utt_a\n");
        assert!(parse_manifest(file.path()).is_err());
    }

    #[test]
    fn empty_manifest_is_fatal() {
        let file = write_manifest("\n\n");
        let err = parse_manifest(file.path()).unwrap_err();
        assert!(err.to_string().contains("no utterances"));
    }

    #[test]
    fn utterance_id_comes_from_the_file_stem() {
        let utterance = Utterance::from_wav_path("/data/demo.wav");
        assert_eq!(utterance.id, "demo");
    }
}
