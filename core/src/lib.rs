//! Planner and command builder for bwrap-based agent sandboxes.
//!
//! A declarative policy (filesystem rules, presets, command interception,
//! network/docker toggles) is resolved against a snapshot of the host into a
//! deterministic bwrap argument list plus per-invocation inherited file
//! descriptors. The library never executes anything itself: it hands back an
//! unstarted [`SandboxCommand`]; bwrap enforces the directives.

// Library code must not write to stdout/stderr directly; planning decisions
// go through the config's debug sink and tracing.
#![deny(clippy::print_stdout, clippy::print_stderr)]

mod command;
mod config;
mod docker;
mod environment;
mod error;
mod git;
mod mount;
mod paths;
mod plan;
mod policy;
mod presets;
mod resolv;
mod sandbox;
mod spawn;
mod validate;
mod wrappers;

pub use command::SandboxCommand;
pub use config::BaseFs;
pub use config::CommandsConfig;
pub use config::Config;
pub use config::DEFAULT_MOUNT_PATH;
pub use config::DebugSink;
pub use config::FilesystemConfig;
pub use config::Wrapper;
pub use environment::Environment;
pub use error::Result;
pub use error::SandboxErr;
pub use mount::Mount;
pub use mount::MountKind;
pub use sandbox::Sandbox;
pub use spawn::StdioPolicy;
pub use spawn::spawn_sandboxed;
