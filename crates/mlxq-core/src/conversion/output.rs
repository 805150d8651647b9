//! Output path allocation.
//!
//! Only the base directory is ever created here. The final output directory
//! belongs to mlx_lm, which refuses to write into a directory that already
//! exists, so the allocated path must still be absent when the tool starts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Local, NaiveDateTime};
use tracing::debug;

use super::source::sanitize_name;
use super::types::OutputAllocation;
use crate::config::PathsConfig;
use crate::error::{MlxqError, Result};

/// Hands out output paths that exist neither on disk nor in live reservations.
///
/// Paths returned by `allocate` stay reserved until released, so two
/// identical requests get distinct paths even before the tool has created
/// the first. The manager releases a path when its job ends.
#[derive(Debug, Default)]
pub struct OutputAllocator {
    reserved: Mutex<HashSet<PathBuf>>,
}

impl OutputAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an output path, stamped with the local time if requested.
    pub fn allocate(
        &self,
        base_dir: &Path,
        derived_name: &str,
        use_timestamp: bool,
    ) -> Result<OutputAllocation> {
        let timestamp = use_timestamp.then(|| Local::now().naive_local());
        self.allocate_at(base_dir, derived_name, timestamp)
    }

    /// Allocate an output path using an explicit timestamp.
    ///
    /// # Postconditions
    /// - `base_dir` exists.
    /// - `candidate_path` does not exist and is not currently reserved.
    pub fn allocate_at(
        &self,
        base_dir: &Path,
        derived_name: &str,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<OutputAllocation> {
        self.pick(base_dir, derived_name, timestamp, true)
    }

    /// Compute the path `allocate` would return, without reserving it.
    pub fn preview(
        &self,
        base_dir: &Path,
        derived_name: &str,
        use_timestamp: bool,
    ) -> Result<OutputAllocation> {
        let timestamp = use_timestamp.then(|| Local::now().naive_local());
        self.pick(base_dir, derived_name, timestamp, false)
    }

    /// Forget a reservation whose job has ended or never started.
    pub fn release(&self, path: &Path) {
        if let Ok(mut reserved) = self.reserved.lock() {
            reserved.remove(path);
        }
    }

    fn pick(
        &self,
        base_dir: &Path,
        derived_name: &str,
        timestamp: Option<NaiveDateTime>,
        reserve: bool,
    ) -> Result<OutputAllocation> {
        let base_dir = absolute_base(base_dir)?;
        std::fs::create_dir_all(&base_dir).map_err(|e| MlxqError::Allocation {
            path: base_dir.clone(),
            message: e.to_string(),
            source: Some(e),
        })?;

        let stamp = timestamp.map(|t| t.format(PathsConfig::TIMESTAMP_FORMAT).to_string());
        let name = sanitize_name(derived_name);
        let stem = match &stamp {
            Some(stamp) => format!("{name}_{stamp}"),
            None => name,
        };

        let mut reserved = self
            .reserved
            .lock()
            .map_err(|_| MlxqError::Other("output allocator lock poisoned".to_string()))?;

        let mut candidate = base_dir.join(&stem);
        let mut counter = 1u32;
        while is_taken(&candidate, &reserved) {
            candidate = base_dir.join(format!("{stem}_{counter}"));
            counter += 1;
        }
        if reserve {
            reserved.insert(candidate.clone());
            debug!("Allocated output path {}", candidate.display());
        }

        Ok(OutputAllocation {
            base_dir,
            candidate_path: candidate,
            timestamp: stamp,
        })
    }
}

fn absolute_base(base_dir: &Path) -> Result<PathBuf> {
    if base_dir.as_os_str().is_empty() {
        return Err(MlxqError::Allocation {
            path: base_dir.to_path_buf(),
            message: "output base directory is empty".to_string(),
            source: None,
        });
    }
    if base_dir.is_absolute() {
        return Ok(base_dir.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| MlxqError::Allocation {
        path: base_dir.to_path_buf(),
        message: format!("cannot resolve relative path: {e}"),
        source: Some(e),
    })?;
    Ok(cwd.join(base_dir))
}

fn is_taken(candidate: &Path, reserved: &HashSet<PathBuf>) -> bool {
    // symlink_metadata also catches dangling symlinks.
    reserved.contains(candidate) || std::fs::symlink_metadata(candidate).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn noon_new_year() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_creates_base_but_not_candidate() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("nested").join("out");
        let allocator = OutputAllocator::new();

        let alloc = allocator.allocate(&base, "model", false).unwrap();

        assert!(base.is_dir());
        assert!(!alloc.candidate_path.exists());
        assert_eq!(alloc.candidate_path, base.join("model"));
        assert_eq!(alloc.timestamp, None);
    }

    #[test]
    fn test_timestamped_name() {
        let temp = TempDir::new().unwrap();
        let allocator = OutputAllocator::new();

        let alloc = allocator
            .allocate_at(temp.path(), "meta-llama_Llama-3.2-3B", Some(noon_new_year()))
            .unwrap();

        assert_eq!(
            alloc.candidate_path,
            temp.path().join("meta-llama_Llama-3.2-3B_20250101_120000")
        );
        assert_eq!(alloc.timestamp.as_deref(), Some("20250101_120000"));
    }

    #[test]
    fn test_suffix_on_existing_entry() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("model")).unwrap();
        std::fs::write(temp.path().join("model_1"), b"").unwrap();
        let allocator = OutputAllocator::new();

        let alloc = allocator.allocate(temp.path(), "model", false).unwrap();
        assert_eq!(alloc.candidate_path, temp.path().join("model_2"));
        assert!(!alloc.candidate_path.exists());
    }

    #[test]
    fn test_repeated_allocation_yields_distinct_paths() {
        let temp = TempDir::new().unwrap();
        let allocator = OutputAllocator::new();

        let first = allocator.allocate(temp.path(), "model", false).unwrap();
        let second = allocator.allocate(temp.path(), "model", false).unwrap();

        assert_ne!(first.candidate_path, second.candidate_path);
        assert_eq!(second.candidate_path, temp.path().join("model_1"));
        assert!(!first.candidate_path.exists());
        assert!(!second.candidate_path.exists());
    }

    #[test]
    fn test_base_dir_that_is_a_file_fails() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();
        let allocator = OutputAllocator::new();

        let err = allocator.allocate(&file.join("out"), "model", false).unwrap_err();
        assert!(matches!(err, MlxqError::Allocation { .. }));
    }

    #[test]
    fn test_empty_base_dir_fails() {
        let allocator = OutputAllocator::new();
        let err = allocator.allocate(Path::new(""), "model", false).unwrap_err();
        assert!(matches!(err, MlxqError::Allocation { .. }));
    }

    #[test]
    fn test_preview_does_not_reserve() {
        let temp = TempDir::new().unwrap();
        let allocator = OutputAllocator::new();

        let peeked = allocator.preview(temp.path(), "model", false).unwrap();
        let taken = allocator.allocate(temp.path(), "model", false).unwrap();
        assert_eq!(peeked.candidate_path, taken.candidate_path);
    }

    #[test]
    fn test_release_frees_reservation() {
        let temp = TempDir::new().unwrap();
        let allocator = OutputAllocator::new();

        let first = allocator.allocate(temp.path(), "model", false).unwrap();
        allocator.release(&first.candidate_path);
        let again = allocator.allocate(temp.path(), "model", false).unwrap();
        assert_eq!(first.candidate_path, again.candidate_path);
    }

    #[test]
    fn test_derived_name_is_sanitized() {
        let temp = TempDir::new().unwrap();
        let allocator = OutputAllocator::new();

        let alloc = allocator.allocate(temp.path(), "org/name", false).unwrap();
        assert_eq!(alloc.candidate_path, temp.path().join("org_name"));
    }
}
