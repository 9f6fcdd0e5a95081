use std::fs::File;
use std::io;
use std::io::Seek;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use crate::environment::Environment;
use crate::error::Result;
use crate::error::SandboxErr;
use crate::plan::EMPTY_DATA_FD;
use crate::plan::Plan;
use crate::plan::data_fd_placeholder;
use crate::plan::octal;

/// An unstarted sandboxed invocation: the bwrap argv, the working directory
/// and environment for the child, and the backing files inherited at child
/// fds 3, 4, 5, … (in order).
///
/// The handle owns the backing files; dropping it releases them. Spawn it
/// with [`crate::spawn::spawn_sandboxed`] or feed the parts to your own
/// process machinery.
#[derive(Debug)]
pub struct SandboxCommand {
    pub(crate) program: PathBuf,
    pub(crate) args: Vec<String>,
    pub(crate) cwd: PathBuf,
    pub(crate) env: Vec<String>,
    pub(crate) files: Vec<File>,
}

impl SandboxCommand {
    /// Host path of the bwrap executable.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Directives, `--`, then the caller's argv.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Sorted `KEY=VALUE` environment for the child.
    pub fn env(&self) -> &[String] {
        &self.env
    }

    /// Number of inherited backing files (child fds 3 through
    /// `3 + count - 1`).
    pub fn inherited_file_count(&self) -> usize {
        self.files.len()
    }
}

/// Materialize one invocation from the plan: allocate backing files, bind
/// fd placeholders to concrete numbers, and append the chmod/chdir/argv
/// tail. Backing files allocated before a failure are released on return.
pub(crate) fn build(plan: &Plan, env: &Environment, argv: &[String]) -> Result<SandboxCommand> {
    if argv.is_empty() {
        return Err(SandboxErr::InputInvalid("argv is empty".to_string()));
    }

    let program = which::which_in("bwrap", env.host_env.get("PATH"), &env.work_dir)
        .map_err(|_| SandboxErr::host_lookup("bwrap not found in PATH"))?;

    let mut args = plan.bwrap_args.clone();
    let mut files: Vec<File> = Vec::new();

    if plan.needs_empty_file {
        let file = File::open("/dev/null")
            .map_err(|err| SandboxErr::resource("opening /dev/null", err))?;
        let fd = (3 + files.len()).to_string();
        for arg in &mut args {
            if arg == EMPTY_DATA_FD {
                *arg = fd.clone();
            }
        }
        files.push(file);
    }

    for (slot, data) in plan.wrapper_mounts.iter().enumerate() {
        let file = backing_file(&data.data).map_err(|err| {
            SandboxErr::resource(format!("creating data file for {}", data.dst), err)
        })?;

        let placeholder = data_fd_placeholder(slot);
        let fd = (3 + files.len()).to_string();
        let mut replaced = 0;
        for arg in &mut args {
            if *arg == placeholder {
                *arg = fd.clone();
                replaced += 1;
            }
        }
        if replaced != 1 {
            return Err(SandboxErr::Invariant(format!(
                "data fd placeholder {slot} substituted {replaced} times"
            )));
        }
        files.push(file);
    }

    if let Some(leftover) = args.iter().find(|arg| arg.contains('\u{0}')) {
        return Err(SandboxErr::Invariant(format!(
            "unsubstituted fd placeholder in argv: {leftover:?}"
        )));
    }

    for chmod in &plan.chmods {
        args.push("--chmod".to_string());
        args.push(octal(chmod.perms));
        args.push(chmod.path.clone());
    }
    args.push("--chdir".to_string());
    args.push(env.work_dir.to_string_lossy().into_owned());
    args.push("--".to_string());
    args.extend(argv.iter().cloned());

    let mut child_env: Vec<String> = env
        .host_env
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    child_env.sort();

    Ok(SandboxCommand {
        program,
        args,
        cwd: env.work_dir.clone(),
        env: child_env,
        files,
    })
}

/// An anonymous file holding `data`, positioned at byte 0. Prefers a
/// memfd; falls back to an unlinked temp file (bwrap reads the fd, not the
/// path).
fn backing_file(data: &[u8]) -> io::Result<File> {
    let mut file = match memfd() {
        Some(file) => file,
        None => tempfile::tempfile()?,
    };
    file.write_all(data)?;
    file.rewind()?;
    Ok(file)
}

#[cfg(target_os = "linux")]
fn memfd() -> Option<File> {
    use std::os::fd::FromRawFd;

    let fd = unsafe { libc::memfd_create(c"agent-sandbox-data".as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        None
    } else {
        Some(unsafe { File::from_raw_fd(fd) })
    }
}

#[cfg(not(target_os = "linux"))]
fn memfd() -> Option<File> {
    None
}
