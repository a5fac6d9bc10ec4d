//! Resolution of `hf://` checkpoint URLs to local cached files.

use anyhow::Result;
use hf_hub::api::sync::Api;
use std::path::PathBuf;

/// Resolve a weight path, downloading `hf://owner/repo/file` URLs through the
/// HuggingFace cache. Plain filesystem paths pass through untouched.
pub fn resolve_weights_path(path: &str) -> Result<PathBuf> {
    if let Some(stripped) = path.strip_prefix("hf://") {
        let (repo_id, filename, revision) = parse_hf_path(stripped)?;
        let api = Api::new()?;
        let repo = match revision {
            Some(rev) => api.repo(hf_hub::Repo::with_revision(
                repo_id,
                hf_hub::RepoType::Model,
                rev,
            )),
            None => api.repo(hf_hub::Repo::model(repo_id)),
        };
        return Ok(repo.get(&filename)?);
    }

    if path.starts_with("http://") || path.starts_with("https://") {
        anyhow::bail!("plain HTTP(S) weight URLs are not supported: {path}");
    }

    Ok(PathBuf::from(path))
}

/// Split `owner/repo/path/to/file[@revision]` into its parts.
fn parse_hf_path(path: &str) -> Result<(String, String, Option<String>)> {
    let mut parts = path.split('/').collect::<Vec<_>>();
    if parts.len() < 3 {
        anyhow::bail!("invalid hf:// path: {path}");
    }

    let repo_id = format!("{}/{}", parts.remove(0), parts.remove(0));
    let filename = parts.join("/");

    if let Some((file, rev)) = filename.split_once('@') {
        return Ok((repo_id, file.to_string(), Some(rev.to_string())));
    }
    Ok((repo_id, filename, None))
}
