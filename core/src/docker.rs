use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use path_clean::PathClean;
use url::Url;

use crate::error::Result;
use crate::error::SandboxErr;
use crate::mount::Mount;

const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Emit the docker socket directive. With docker disabled the socket is
/// masked with `/dev/null` unconditionally, so a broad read-write mount of
/// `/var/run` can never re-expose it; with docker enabled the resolved
/// socket is bind-mounted read-write, or planning fails.
///
/// The destination honors a symlinked socket directory (`/var/run → /run`)
/// so the mount lands where the sandboxed process will actually look.
pub(crate) fn plan(enabled: bool, host_env: &HashMap<String, String>) -> Result<Mount> {
    let socket = socket_path(enabled, host_env)?;
    let dst = destination(&socket);

    if !enabled {
        return Ok(Mount::ro_bind("/dev/null", dst.to_string_lossy()));
    }

    let resolved = std::fs::canonicalize(&socket)
        .ok()
        .filter(|resolved| std::fs::metadata(resolved).is_ok())
        .ok_or_else(|| {
            SandboxErr::host_lookup(format!("docker socket not found at {}", socket.display()))
        })?;

    Ok(Mount::bind(
        resolved.to_string_lossy(),
        dst.to_string_lossy(),
    ))
}

/// Socket path from `DOCKER_HOST` when it is a unix-scheme URL
/// (`unix:///path` or `unix:/path`), else the conventional default.
fn socket_path(enabled: bool, host_env: &HashMap<String, String>) -> Result<PathBuf> {
    let from_env = host_env
        .get("DOCKER_HOST")
        .and_then(|raw| Url::parse(raw).ok())
        .filter(|url| url.scheme() == "unix")
        .map(|url| url.path().to_string())
        .filter(|path| !path.is_empty());

    let path = PathBuf::from(from_env.as_deref().unwrap_or(DEFAULT_SOCKET)).clean();
    if path.is_absolute() {
        return Ok(path);
    }

    if enabled {
        return Err(SandboxErr::host_lookup(format!(
            "DOCKER_HOST socket path {} is not absolute",
            path.display()
        )));
    }
    Ok(PathBuf::from(DEFAULT_SOCKET))
}

/// Resolve the directory part through symlinks and reattach the basename.
fn destination(socket: &Path) -> PathBuf {
    let Some(parent) = socket.parent() else {
        return socket.to_path_buf();
    };
    let Some(basename) = socket.file_name() else {
        return socket.to_path_buf();
    };

    match std::fs::canonicalize(parent) {
        Ok(resolved) if resolved.is_absolute() => resolved.join(basename),
        _ => socket.to_path_buf(),
    }
}
