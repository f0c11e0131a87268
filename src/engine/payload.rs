//! Locating the deployable payload inside an extraction root.
//!
//! Many build archives wrap their contents in a single top-level folder
//! (`dist.zip` containing `app/index.js` rather than `index.js`).  The
//! resolver walks down until it finds the first directory that directly
//! contains a regular file and deploys from there.

use std::path::{Path, PathBuf};

use anyhow::Context as _;

use super::error::EngineError;

/// How far below the extraction root the resolver will descend.  The bound
/// is a safety limit against pathological or malicious archive structures.
pub const MAX_PAYLOAD_DEPTH: usize = 5;

/// Resolve the directory that actually holds the payload under
/// `extraction_root`.
///
/// If the root itself directly contains a regular file it is the source.
/// Otherwise subdirectories are searched depth-first (in name order, for
/// determinism) down to `max_depth` levels; the first directory with a
/// regular file wins.
pub fn resolve_payload_root(
    extraction_root: &Path,
    max_depth: usize,
) -> Result<PathBuf, EngineError> {
    if let Some(found) = descend(extraction_root, 0, max_depth)? {
        return Ok(found);
    }
    Err(EngineError::NoPayloadFound {
        root: extraction_root.to_path_buf(),
        max_depth,
    })
}

fn descend(dir: &Path, depth: usize, max_depth: usize) -> Result<Option<PathBuf>, EngineError> {
    let mut subdirectories = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("read directory {}", dir.display()))
        .map_err(EngineError::Internal)?;

    for entry in entries {
        let entry = entry
            .with_context(|| format!("read entry in {}", dir.display()))
            .map_err(EngineError::Internal)?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", entry.path().display()))
            .map_err(EngineError::Internal)?;
        if file_type.is_file() {
            return Ok(Some(dir.to_path_buf()));
        }
        if file_type.is_dir() {
            subdirectories.push(entry.path());
        }
    }

    if depth >= max_depth {
        return Ok(None);
    }

    subdirectories.sort();
    for subdirectory in subdirectories {
        if let Some(found) = descend(&subdirectory, depth + 1, max_depth)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::write(path, b"x").expect("write file");
    }

    #[test]
    fn root_with_direct_files_is_the_source() {
        let scratch = tempfile::tempdir().expect("tempdir");
        touch(&scratch.path().join("index.html"));
        std::fs::create_dir(scratch.path().join("assets")).expect("mkdir");

        let resolved = resolve_payload_root(scratch.path(), MAX_PAYLOAD_DEPTH).unwrap();
        assert_eq!(resolved, scratch.path());
    }

    #[test]
    fn single_wrapping_folder_is_unwrapped() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let app = scratch.path().join("app");
        std::fs::create_dir(&app).expect("mkdir");
        touch(&app.join("index.js"));

        let resolved = resolve_payload_root(scratch.path(), MAX_PAYLOAD_DEPTH).unwrap();
        assert_eq!(resolved, app);
    }

    #[test]
    fn files_below_the_depth_bound_are_not_found() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let mut deep = scratch.path().to_path_buf();
        for level in 0..4 {
            deep.push(format!("level{level}"));
        }
        std::fs::create_dir_all(&deep).expect("mkdir");
        touch(&deep.join("index.js"));

        // Depth 4 is reachable with the default bound...
        assert!(resolve_payload_root(scratch.path(), MAX_PAYLOAD_DEPTH).is_ok());

        // ...but not with a bound of 2.
        let err = resolve_payload_root(scratch.path(), 2).unwrap_err();
        match err {
            EngineError::NoPayloadFound { max_depth, .. } => assert_eq!(max_depth, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_tree_reports_no_payload() {
        let scratch = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(scratch.path().join("a/b/c")).expect("mkdir");

        let err = resolve_payload_root(scratch.path(), MAX_PAYLOAD_DEPTH).unwrap_err();
        assert!(matches!(err, EngineError::NoPayloadFound { .. }));
    }
}
