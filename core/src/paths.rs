use std::path::Path;
use std::path::PathBuf;

use path_clean::PathClean;

use crate::environment::Environment;
use crate::error::Result;
use crate::error::SandboxErr;

/// Mount ordering keys pack the component count into 16 bits.
const MAX_DEPTH: usize = i16::MAX as usize;

/// Expand a mount pattern to an absolute, lexically cleaned path.
///
/// `~` and `~/...` substitute the snapshot's home directory; relative paths
/// are joined onto the snapshot's work directory. No environment-variable
/// expansion happens (`$HOME` stays literal). The empty pattern stays empty.
pub(crate) fn resolve(pattern: &str, env: &Environment) -> PathBuf {
    if pattern.is_empty() {
        return PathBuf::new();
    }

    let joined = if pattern == "~" {
        env.home_dir.clone()
    } else if let Some(rest) = pattern.strip_prefix("~/") {
        env.home_dir.join(rest)
    } else {
        let path = PathBuf::from(pattern);
        if path.is_absolute() {
            path
        } else {
            env.work_dir.join(path)
        }
    };

    joined.clean()
}

/// Number of `/` separators in a cleaned absolute path; `/` itself is 0.
pub(crate) fn depth(path: &Path) -> Result<usize> {
    let text = path.to_string_lossy();
    let depth = if text == "/" {
        0
    } else {
        text.matches('/').count()
    };

    if depth > MAX_DEPTH {
        return Err(SandboxErr::host_lookup(format!(
            "path {text} is nested too deeply ({depth} levels, max {MAX_DEPTH})"
        )));
    }
    Ok(depth)
}
