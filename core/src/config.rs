use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::mount::Mount;

/// Default runtime directory for the wrapper tree when
/// [`CommandsConfig::mount_path`] is not set.
pub const DEFAULT_MOUNT_PATH: &str = "/run/agent-sandbox";

/// Callback that receives human-readable planning decisions. Carried in the
/// config so debug output never goes through a process-global sink.
pub type DebugSink = Arc<dyn Fn(&str) + Send + Sync>;

/// What the sandbox filesystem starts from before mounts are layered on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseFs {
    /// `--ro-bind / /`: the host filesystem, read-only.
    #[default]
    Host,
    /// `--tmpfs /`: an empty root.
    Empty,
}

/// A script that intercepts one command name inside the sandbox.
/// At least one of `path` and `inline_script` must be set; `inline_script`
/// wins when both are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wrapper {
    /// Host path of the wrapper script, read once at plan time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Literal script content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_script: Option<String>,
}

/// Command interception: names to block outright and names to reroute
/// through wrapper scripts, both dispatched by an in-sandbox launcher
/// binary supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Command names that are denied inside the sandbox.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block: Vec<String>,

    /// Command name to wrapper script. A `BTreeMap` so iteration order is
    /// the deterministic processing order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub wrappers: BTreeMap<String, Wrapper>,

    /// Absolute host path of the multicall launcher binary that is
    /// bind-mounted over every intercepted target.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub launcher: String,

    /// Where the wrapper runtime tree lives inside the sandbox.
    /// Defaults to [`DEFAULT_MOUNT_PATH`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,
}

impl CommandsConfig {
    pub fn is_active(&self) -> bool {
        !self.block.is_empty() || !self.wrappers.is_empty()
    }

    pub fn mount_path(&self) -> &str {
        self.mount_path.as_deref().unwrap_or(DEFAULT_MOUNT_PATH)
    }
}

/// Filesystem policy: presets first, then explicit mounts layered on top.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// Preset toggles (`@all`, `!@lint/python`, ...). `None` means `[@all]`;
    /// an explicit empty list means no presets at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presets: Option<Vec<String>>,

    /// Mounts applied after preset expansion, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
}

/// Top-level sandbox policy.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Share the host network namespace. Defaults to true.
    #[serde(default = "default_network")]
    pub network: bool,

    /// Expose the docker socket. When false the socket is masked with
    /// `/dev/null` so it can never leak through a broader mount.
    #[serde(default)]
    pub docker: bool,

    #[serde(default)]
    pub base_fs: BaseFs,

    #[serde(default)]
    pub filesystem: FilesystemConfig,

    #[serde(default)]
    pub commands: CommandsConfig,

    /// Host directory bound to `/tmp` inside the sandbox (with
    /// `TMPDIR=/tmp` exported).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// Optional sink for planning decisions.
    #[serde(skip)]
    pub debug: Option<DebugSink>,
}

fn default_network() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: true,
            docker: false,
            base_fs: BaseFs::default(),
            filesystem: FilesystemConfig::default(),
            commands: CommandsConfig::default(),
            temp_dir: None,
            debug: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("network", &self.network)
            .field("docker", &self.docker)
            .field("base_fs", &self.base_fs)
            .field("filesystem", &self.filesystem)
            .field("commands", &self.commands)
            .field("temp_dir", &self.temp_dir)
            .field("debug", &self.debug.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl Config {
    pub(crate) fn emit_debug(&self, message: &str) {
        tracing::debug!("{message}");
        if let Some(sink) = &self.debug {
            sink(message);
        }
    }
}
