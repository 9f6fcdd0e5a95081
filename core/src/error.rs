use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxErr>;

#[derive(Error, Debug)]
pub enum SandboxErr {
    /// Caller-supplied configuration or environment failed validation. Every
    /// problem found is joined into a single message so the caller can fix
    /// them all in one pass.
    #[error("sandbox: validating: {0}")]
    InputInvalid(String),

    /// A lookup against the host filesystem or environment failed: unknown
    /// preset, strict mount with no match, dangling symlink, missing docker
    /// socket, command not found in PATH, and friends.
    #[error("sandbox: {0}")]
    HostLookup(String),

    /// An internal invariant was violated (e.g. an FD placeholder that was
    /// never substituted). Indicates a bug in this library, not in the
    /// caller's input.
    #[error("sandbox: internal error: {0}")]
    Invariant(String),

    /// Allocating or writing a per-invocation backing file failed.
    #[error("sandbox: {context}: {source}")]
    Resource {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl SandboxErr {
    pub(crate) fn host_lookup(msg: impl Into<String>) -> Self {
        SandboxErr::HostLookup(msg.into())
    }

    pub(crate) fn resource(context: impl Into<String>, source: io::Error) -> Self {
        SandboxErr::Resource {
            context: context.into(),
            source,
        }
    }
}
