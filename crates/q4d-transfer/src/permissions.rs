//! Mode normalisation for transferred payloads so media servers can read them.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

#[cfg(unix)]
const FILE_MODE: u32 = 0o666;
#[cfg(unix)]
const DIR_MODE: u32 = 0o777;

/// Local path the payload lands at: the last segment of the remote path
/// under the destination directory.
pub(crate) fn landed_path(destination_dir: &Path, source_path: &str) -> Option<PathBuf> {
    let name = source_path.trim_end_matches('/').rsplit('/').next()?;
    if name.is_empty() {
        return None;
    }
    Some(destination_dir.join(name))
}

/// Relax the mode of the top-level transferred entry. Failures are logged, not returned.
#[cfg(unix)]
pub(crate) async fn normalise(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Could not stat transferred payload");
            return;
        }
    };
    let mode = if metadata.is_dir() { DIR_MODE } else { FILE_MODE };
    match tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await {
        Ok(()) => debug!(path = %path.display(), mode = %format!("{mode:o}"), "Normalised payload permissions"),
        Err(err) => warn!(path = %path.display(), error = %err, "Could not chmod transferred payload"),
    }
}

#[cfg(not(unix))]
pub(crate) async fn normalise(path: &Path) {
    debug!(path = %path.display(), "Permission normalisation skipped on this platform");
}
