//! Build-artifact archive extraction.
//!
//! Zip archives are unpacked in-process with the `zip` crate.  Tar-family
//! archives shell out to the system `tar` binary, and rar archives to
//! `unrar` — the one tool routinely missing from deploy hosts, so it is
//! probed before use and reported with an installation hint instead of an
//! opaque spawn failure.

use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Context as _};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::error::EngineError;

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

/// Archive formats accepted for dist deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    Rar,
}

impl ArchiveFormat {
    /// Detect the format from a declared file name or extension.  Longer
    /// suffixes are checked first so `.tar.gz` never parses as `.gz`-less
    /// tar.
    pub fn from_name(declared_name: &str) -> Result<Self, EngineError> {
        let lower = declared_name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Ok(ArchiveFormat::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Ok(ArchiveFormat::TarGz)
        } else if lower.ends_with(".tar") {
            Ok(ArchiveFormat::Tar)
        } else if lower.ends_with(".rar") {
            Ok(ArchiveFormat::Rar)
        } else {
            Err(EngineError::UnsupportedFormat(declared_name.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract `archive` into `target`, creating the target directory first.
///
/// Fails with [`EngineError::EmptyArchive`] when extraction completes but
/// the target directory ends up empty, distinguishing a hollow archive from
/// a failed extraction command.
#[instrument(skip(archive, target), fields(archive = %archive.display(), %declared_name))]
pub async fn extract(
    archive: &Path,
    target: &Path,
    declared_name: &str,
) -> Result<(), EngineError> {
    let format = ArchiveFormat::from_name(declared_name)?;

    std::fs::create_dir_all(target)
        .with_context(|| format!("create extraction target {}", target.display()))
        .map_err(EngineError::Internal)?;

    match format {
        ArchiveFormat::Zip => extract_zip(archive, target).await?,
        ArchiveFormat::Tar => run_tar(archive, target, false).await?,
        ArchiveFormat::TarGz => run_tar(archive, target, true).await?,
        ArchiveFormat::Rar => run_unrar(archive, target).await?,
    }

    if directory_is_empty(target)? {
        return Err(EngineError::EmptyArchive {
            archive: declared_name.to_string(),
        });
    }

    debug!("archive extracted");
    Ok(())
}

/// In-process zip extraction.  Blocking, so it runs on the blocking pool.
async fn extract_zip(archive: &Path, target: &Path) -> Result<(), EngineError> {
    let archive = archive.to_path_buf();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), EngineError> {
        let unpack = || -> anyhow::Result<()> {
            let file = std::fs::File::open(&archive)
                .with_context(|| format!("open archive {}", archive.display()))?;
            let mut zip = zip::ZipArchive::new(file).context("read zip central directory")?;
            zip.extract(&target).context("unpack zip entries")?;
            Ok(())
        };
        unpack().map_err(EngineError::Internal)
    })
    .await
    .map_err(|e| EngineError::Internal(anyhow!("zip extraction task failed: {e}")))?
}

/// Delegate to the system `tar` binary.
async fn run_tar(archive: &Path, target: &Path, gzipped: bool) -> Result<(), EngineError> {
    let mode = if gzipped { "-xzf" } else { "-xf" };
    let output = Command::new("tar")
        .arg(mode)
        .arg(archive)
        .arg("-C")
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("spawn tar")
        .map_err(EngineError::Internal)?;

    check_tool_exit("tar", &output)
}

/// Delegate to `unrar`, probing for its presence first.
async fn run_unrar(archive: &Path, target: &Path) -> Result<(), EngineError> {
    if !tool_available("unrar").await {
        return Err(EngineError::ToolUnavailable {
            tool: "unrar".into(),
            hint: "install the unrar package (e.g. apt-get install unrar)".into(),
        });
    }

    // unrar treats the last argument as a directory only when it ends with a
    // separator.
    let mut dest = target.as_os_str().to_owned();
    dest.push("/");

    let output = Command::new("unrar")
        .arg("x")
        .arg("-o+")
        .arg(archive)
        .arg(dest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("spawn unrar")
        .map_err(EngineError::Internal)?;

    check_tool_exit("unrar", &output)
}

/// Translate a non-zero tool exit into [`EngineError::ExtractionCommand`].
fn check_tool_exit(tool: &str, output: &std::process::Output) -> Result<(), EngineError> {
    if output.status.success() {
        return Ok(());
    }
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    debug!(%tool, status = ?output.status.code(), "extraction tool failed");
    Err(EngineError::ExtractionCommand {
        exit_status: output.status.code().unwrap_or(-1),
        output: combined,
    })
}

/// Probe for an external tool by attempting to spawn it.  A missing binary
/// surfaces as a spawn error; any other outcome counts as available.
async fn tool_available(tool: &str) -> bool {
    Command::new(tool)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .is_ok()
}

fn directory_is_empty(dir: &Path) -> Result<bool, EngineError> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("read extraction target {}", dir.display()))
        .map_err(EngineError::Internal)?;
    Ok(entries.next().is_none())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).expect("create zip file");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, contents) in entries {
            writer.start_file(*name, options).expect("start entry");
            writer.write_all(contents).expect("write entry");
        }
        writer.finish().expect("finish zip");
    }

    #[test]
    fn format_detection_prefers_longer_suffixes() {
        assert_eq!(
            ArchiveFormat::from_name("dist.tar.gz").unwrap(),
            ArchiveFormat::TarGz
        );
        assert_eq!(
            ArchiveFormat::from_name("dist.tgz").unwrap(),
            ArchiveFormat::TarGz
        );
        assert_eq!(
            ArchiveFormat::from_name("dist.tar").unwrap(),
            ArchiveFormat::Tar
        );
        assert_eq!(
            ArchiveFormat::from_name("DIST.ZIP").unwrap(),
            ArchiveFormat::Zip
        );
        assert_eq!(
            ArchiveFormat::from_name("dist.rar").unwrap(),
            ArchiveFormat::Rar
        );
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = ArchiveFormat::from_name("dist.7z").unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn zip_with_entries_extracts_into_target() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let archive = scratch.path().join("dist.zip");
        write_zip(
            &archive,
            &[("app/index.js", b"console.log(1);" as &[u8]), ("app/a.css", b"body{}")],
        );

        let target = scratch.path().join("extracted");
        extract(&archive, &target, "dist.zip")
            .await
            .expect("extraction succeeds");

        assert!(target.join("app/index.js").is_file());
        assert!(target.join("app/a.css").is_file());
    }

    #[tokio::test]
    async fn zip_with_zero_entries_is_empty_archive() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let archive = scratch.path().join("hollow.zip");
        write_zip(&archive, &[]);

        let target = scratch.path().join("extracted");
        let err = extract(&archive, &target, "hollow.zip")
            .await
            .expect_err("empty archive must fail");
        assert!(matches!(err, EngineError::EmptyArchive { .. }));
    }
}
