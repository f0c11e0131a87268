//! Recursive directory upload over the transfer session.
//!
//! Mirrors a local tree onto the remote host: directories become remote
//! `mkdir` calls (parents included, idempotent), files are copied one by
//! one.  The walk is depth-first so a directory always exists before its
//! contents arrive.  The first failing transfer aborts the upload and the
//! partial remote tree is left in place.

use std::path::Path;

use anyhow::{anyhow, Context as _};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use super::error::EngineError;
use super::session::RemoteTransfer;

/// Push `local_root` to `remote_root`, creating remote directories as
/// needed.  Returns the number of files transferred.
#[instrument(skip(transfer, local_root), fields(local = %local_root.display(), %remote_root))]
pub async fn upload_tree(
    transfer: &dyn RemoteTransfer,
    local_root: &Path,
    remote_root: &str,
) -> Result<usize, EngineError> {
    transfer.make_dir(remote_root).await?;

    let mut transferred = 0usize;
    for entry in WalkDir::new(local_root).min_depth(1).sort_by_file_name() {
        let entry = entry
            .map_err(|e| EngineError::Internal(anyhow!(e).context("walk local tree")))?;
        let relative = entry
            .path()
            .strip_prefix(local_root)
            .context("strip local root prefix")
            .map_err(EngineError::Internal)?;
        let remote_path = join_remote(remote_root, relative)?;

        if entry.file_type().is_dir() {
            transfer.make_dir(&remote_path).await?;
        } else if entry.file_type().is_file() {
            debug!(file = %entry.path().display(), "uploading");
            transfer.send_file(entry.path(), &remote_path).await?;
            transferred += 1;
        }
        // Symlinks and other special files are not part of a dist payload.
    }

    Ok(transferred)
}

/// Append a local relative path to a remote base using `/` separators.
fn join_remote(remote_root: &str, relative: &Path) -> Result<String, EngineError> {
    let mut remote = remote_root.trim_end_matches('/').to_string();
    for component in relative.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!(
                    "non-UTF-8 file name in payload: {}",
                    relative.display()
                ))
            })?;
        remote.push('/');
        remote.push_str(part);
    }
    Ok(remote)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{MockTransfer, TransferCall};

    fn build_tree(root: &Path) {
        std::fs::create_dir_all(root.join("assets/img")).expect("mkdir");
        std::fs::write(root.join("index.html"), b"<html>").expect("write");
        std::fs::write(root.join("assets/app.js"), b"js").expect("write");
        std::fs::write(root.join("assets/img/logo.svg"), b"svg").expect("write");
    }

    #[tokio::test]
    async fn mirrors_directories_before_their_files() {
        let scratch = tempfile::tempdir().expect("tempdir");
        build_tree(scratch.path());

        let transfer = MockTransfer::default();
        let transferred = upload_tree(&transfer, scratch.path(), "/srv/web/dist")
            .await
            .expect("upload succeeds");

        assert_eq!(transferred, 3);
        let calls = transfer.calls();
        assert_eq!(
            calls,
            vec![
                TransferCall::MakeDir("/srv/web/dist".into()),
                TransferCall::MakeDir("/srv/web/dist/assets".into()),
                TransferCall::SendFile("/srv/web/dist/assets/app.js".into()),
                TransferCall::MakeDir("/srv/web/dist/assets/img".into()),
                TransferCall::SendFile("/srv/web/dist/assets/img/logo.svg".into()),
                TransferCall::SendFile("/srv/web/dist/index.html".into()),
            ]
        );
    }

    #[tokio::test]
    async fn stops_at_the_first_failed_transfer() {
        let scratch = tempfile::tempdir().expect("tempdir");
        build_tree(scratch.path());

        let transfer = MockTransfer::failing_on("/srv/web/dist/assets/img/logo.svg");
        let err = upload_tree(&transfer, scratch.path(), "/srv/web/dist")
            .await
            .expect_err("upload must fail");
        assert!(matches!(err, EngineError::Transfer { .. }));

        // index.html sorts after assets/, so it must never have been sent.
        let sent: Vec<_> = transfer
            .calls()
            .into_iter()
            .filter(|call| matches!(call, TransferCall::SendFile(_)))
            .collect();
        assert_eq!(
            sent,
            vec![TransferCall::SendFile("/srv/web/dist/assets/app.js".into())]
        );
    }
}
