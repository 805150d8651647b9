//! Classification of user-supplied model references.
//!
//! The local filesystem is checked first: an input that names an existing
//! entry is local even if it also looks like a `org/name` repository id.

use std::path::Path;

use tracing::debug;

use super::types::{SourceKind, SourceSpec};
use crate::error::{MlxqError, Result};

/// Name used when nothing usable can be derived from the input.
const FALLBACK_NAME: &str = "model";

/// Classify `raw_input` as a local directory, local file, or remote repo id.
///
/// Performs a single read-only `stat`; never touches the network.
pub fn classify(raw_input: &str) -> Result<SourceSpec> {
    let trimmed = raw_input.trim();
    if trimmed.is_empty() {
        return Err(MlxqError::InvalidSource {
            message: "Please specify a model path or Hugging Face repository id".to_string(),
        });
    }

    let path = Path::new(trimmed);
    let (kind, name) = match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => (SourceKind::LocalDirectory, directory_name(path)),
        Ok(_) => (
            SourceKind::LocalFile,
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
        Err(_) => (SourceKind::RemoteRepoId, trimmed.to_string()),
    };

    let spec = SourceSpec {
        raw_input: trimmed.to_string(),
        kind,
        derived_name: sanitize_name(&name),
    };
    debug!(
        "Classified '{}' as {} ({})",
        spec.raw_input, spec.kind, spec.derived_name
    );
    Ok(spec)
}

/// Last component of a directory path, resolving `.` and `..` when needed.
fn directory_name(path: &Path) -> String {
    if let Some(name) = path.file_name() {
        return name.to_string_lossy().into_owned();
    }
    path.canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default()
}

/// Make `name` safe to use as a single path component.
pub(crate) fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => FALLBACK_NAME.to_string(),
        _ => cleaned,
    }
}
