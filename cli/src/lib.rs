//! Command-line front end for the sandbox planner.
//!
//! Loads an optional JSON policy file, layers command-line flags over it,
//! plans the sandbox, and runs the target command inside it with exit-status
//! propagation.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

use agent_sandbox_core::BaseFs;
use agent_sandbox_core::Config;
use agent_sandbox_core::Mount;
use agent_sandbox_core::Sandbox;
use agent_sandbox_core::StdioPolicy;
use agent_sandbox_core::Wrapper;
use agent_sandbox_core::spawn_sandboxed;
use anyhow::Context;
use anyhow::bail;
use clap::Parser;

/// Run a command inside a bwrap sandbox described by a declarative policy.
#[derive(Debug, Parser)]
#[clap(author, version, bin_name = "agent-sandbox")]
pub struct Cli {
    /// JSON policy file. Flags below layer on top of it.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Preset toggle (`@all`, `!@lint/python`, ...). Repeatable; when given,
    /// replaces the policy file's preset list.
    #[arg(long = "preset", value_name = "TOGGLE")]
    pub presets: Vec<String>,

    /// Mount a path read-only (pattern: absolute, relative, `~`, glob).
    #[arg(long = "ro", value_name = "PATH")]
    pub read_only: Vec<String>,

    /// Mount a path read-write.
    #[arg(long = "rw", value_name = "PATH")]
    pub read_write: Vec<String>,

    /// Hide a path (tmpfs over directories, empty file over files).
    #[arg(long = "exclude", value_name = "PATH")]
    pub exclude: Vec<String>,

    /// Disable host network access.
    #[arg(long)]
    pub no_network: bool,

    /// Expose the docker socket.
    #[arg(long)]
    pub docker: bool,

    /// Base filesystem: `host` (read-only host root) or `empty`.
    #[arg(long, value_name = "MODE")]
    pub base_fs: Option<String>,

    /// Block a command by name. Repeatable. Requires --launcher.
    #[arg(long = "block", value_name = "CMD")]
    pub block: Vec<String>,

    /// Wrap a command: NAME=SCRIPT_PATH. Repeatable. Requires --launcher.
    #[arg(long = "wrap", value_name = "CMD=SCRIPT")]
    pub wrap: Vec<String>,

    /// In-sandbox multicall launcher binary for --block / --wrap.
    #[arg(long, value_name = "PATH")]
    pub launcher: Option<String>,

    /// Host directory to bind over /tmp (also sets TMPDIR=/tmp).
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Print planning decisions to stderr.
    #[arg(long)]
    pub debug: bool,

    /// Command to run inside the sandbox.
    #[arg(trailing_var_arg = true, required = true, value_name = "CMD")]
    pub command: Vec<String>,
}

/// Load the policy file (if any) and layer the flags on top. Flags win.
pub fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => Config::default(),
    };

    if !cli.presets.is_empty() {
        config.filesystem.presets = Some(cli.presets.clone());
    }
    config
        .filesystem
        .mounts
        .extend(cli.read_only.iter().cloned().map(Mount::read_only));
    config
        .filesystem
        .mounts
        .extend(cli.read_write.iter().cloned().map(Mount::read_write));
    config
        .filesystem
        .mounts
        .extend(cli.exclude.iter().cloned().map(Mount::exclude));

    if cli.no_network {
        config.network = false;
    }
    if cli.docker {
        config.docker = true;
    }
    if let Some(mode) = &cli.base_fs {
        config.base_fs = match mode.as_str() {
            "host" => BaseFs::Host,
            "empty" => BaseFs::Empty,
            other => bail!("unknown base filesystem mode {other:?} (use host or empty)"),
        };
    }

    config.commands.block.extend(cli.block.iter().cloned());
    for entry in &cli.wrap {
        let Some((name, script)) = entry.split_once('=') else {
            bail!("--wrap expects CMD=SCRIPT, got {entry:?}");
        };
        config.commands.wrappers.insert(
            name.to_string(),
            Wrapper {
                path: Some(script.to_string()),
                inline_script: None,
            },
        );
    }
    if let Some(launcher) = &cli.launcher {
        config.commands.launcher = launcher.clone();
    }
    if let Some(temp_dir) = &cli.temp_dir {
        config.temp_dir = Some(temp_dir.clone());
    }
    if cli.debug {
        config.debug = Some(Arc::new(|message: &str| {
            eprintln!("agent-sandbox: {message}");
        }));
    }

    Ok(config)
}

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&cli)?;
    let sandbox = Sandbox::from_host(&config)?;
    let command = sandbox.build_command(&cli.command)?;

    let mut child = spawn_sandboxed(command, StdioPolicy::Inherit)
        .context("spawning sandboxed command")?;
    let status = child.wait().await.context("waiting for child")?;
    std::process::exit(exit_code(status));
}

/// Exit code to report for the sandboxed child: its own exit code, the
/// shell convention `128 + signal` when a signal killed it, or 1 when the
/// wait status carries neither.
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}
