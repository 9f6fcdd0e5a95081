use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::error::SandboxErr;

/// Immutable snapshot of the host environment a sandbox is planned against.
///
/// The snapshot is cloned at [`crate::Sandbox`] construction; mutating the
/// values the caller passed in afterwards has no effect on the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Absolute path of the directory the sandboxed command runs in.
    pub work_dir: PathBuf,

    /// Absolute path of the invoking user's home directory. Used for `~`
    /// expansion in mount patterns and preset content.
    pub home_dir: PathBuf,

    /// Environment variables visible to planning (`PATH`, `DOCKER_HOST`, ...)
    /// and inherited by the sandboxed process.
    pub host_env: HashMap<String, String>,
}

impl Environment {
    /// Derive a snapshot from the calling process: current directory, the
    /// user's home directory, and the process environment. Variables whose
    /// name or value is not valid UTF-8 are dropped.
    pub fn from_host() -> Result<Self> {
        let work_dir = std::env::current_dir()
            .map_err(|err| SandboxErr::host_lookup(format!("determining working directory: {err}")))?;
        let home_dir = dirs::home_dir()
            .ok_or_else(|| SandboxErr::host_lookup("home directory could not be determined"))?;

        let host_env = std::env::vars_os()
            .filter_map(|(key, value)| {
                let key = key.into_string().ok()?;
                let value = value.into_string().ok()?;
                Some((key, value))
            })
            .collect();

        Ok(Self {
            work_dir,
            home_dir,
            host_env,
        })
    }
}
