use std::path::Path;
use std::path::PathBuf;

use path_clean::PathClean;

use crate::mount::Mount;

const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Keep DNS working when `/run` becomes a fresh tmpfs.
///
/// systemd-resolved and resolvconf setups symlink `/etc/resolv.conf` into
/// `/run`; after the prelude's `--tmpfs /run` that target would dangle. When
/// the symlink points strictly below `/run`, the target's parent directory is
/// re-exposed read-only inside the tmpfs. Anything else emits nothing.
pub(crate) fn plan() -> Vec<Mount> {
    plan_for(Path::new(RESOLV_CONF))
}

fn plan_for(resolv_conf: &Path) -> Vec<Mount> {
    let Ok(target) = std::fs::read_link(resolv_conf) else {
        return Vec::new();
    };

    let target = if target.is_absolute() {
        target.clean()
    } else {
        resolv_conf
            .parent()
            .unwrap_or_else(|| Path::new("/"))
            .join(target)
            .clean()
    };

    if !target.starts_with("/run/") || target == Path::new("/run") {
        return Vec::new();
    }

    let Some(parent) = target.parent().map(Path::to_path_buf) else {
        return Vec::new();
    };
    if parent == PathBuf::from("/run") || !parent.is_dir() {
        return Vec::new();
    }

    let parent = parent.to_string_lossy().into_owned();
    vec![
        Mount::dir(parent.clone()),
        Mount::ro_bind(parent.clone(), parent),
    ]
}
