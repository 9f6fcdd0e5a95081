use std::io;
use std::process::Stdio;

use tokio::process::Child;
use tokio::process::Command;
use tracing::trace;

use crate::command::SandboxCommand;

#[derive(Debug, Clone, Copy)]
pub enum StdioPolicy {
    /// Inherit stdin, stdout, and stderr from the parent process.
    Inherit,
    /// Null stdin, piped stdout/stderr, for callers that capture output.
    Piped,
}

/// Turn an unstarted [`SandboxCommand`] into a running child.
///
/// The inherited backing files are remapped to child fds 3, 4, 5, … before
/// exec, matching the fd numbers already substituted into the argv. The
/// child is killed when the handle is dropped, and on Linux also when this
/// process dies.
pub fn spawn_sandboxed(command: SandboxCommand, stdio_policy: StdioPolicy) -> io::Result<Child> {
    let SandboxCommand {
        program,
        args,
        cwd,
        env,
        files,
    } = command;

    trace!("spawn_sandboxed: {program:?} {args:?} {cwd:?} {stdio_policy:?}");

    let mut cmd = Command::new(&program);
    cmd.args(&args);
    cmd.current_dir(&cwd);
    cmd.env_clear();
    for pair in &env {
        if let Some((key, value)) = pair.split_once('=') {
            cmd.env(key, value);
        }
    }

    {
        use std::os::fd::AsRawFd;

        let fds: Vec<libc::c_int> = files.iter().map(|file| file.as_raw_fd()).collect();
        let mut scratch = vec![0; fds.len()];
        unsafe {
            cmd.pre_exec(move || remap_inherited_fds(&fds, &mut scratch));
        }
    }

    // If this process dies (including SIGKILL), the sandboxed child should
    // go with it. Relies on prctl(2), so Linux only.
    #[cfg(target_os = "linux")]
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                return Err(io::Error::last_os_error());
            }

            // If the parent already exited before this ran, the new parent is
            // init and will never die; terminate now instead.
            if libc::getppid() == 1 {
                libc::raise(libc::SIGTERM);
            }
            Ok(())
        });
    }

    match stdio_policy {
        StdioPolicy::Inherit => {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }
        StdioPolicy::Piped => {
            // No stdin fd, otherwise some tools block waiting for input.
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
    }

    let child = cmd.kill_on_drop(true).spawn();
    // The child holds dup2'ed copies past this point (or spawn failed);
    // either way the parent-side files can be released.
    drop(files);
    child
}

/// Runs in the child between fork and exec: move every backing fd to its
/// stable number (3, 4, 5, …), clearing close-on-exec in the process.
///
/// Sources are first duplicated above the target window so a source that
/// already sits inside 3..3+n cannot be clobbered mid-loop. Only dup/close
/// are used; both are async-signal-safe.
fn remap_inherited_fds(fds: &[libc::c_int], scratch: &mut [libc::c_int]) -> io::Result<()> {
    let floor = 3 + fds.len() as libc::c_int;

    for (index, &fd) in fds.iter().enumerate() {
        let moved = unsafe { libc::fcntl(fd, libc::F_DUPFD, floor) };
        if moved < 0 {
            return Err(io::Error::last_os_error());
        }
        scratch[index] = moved;
    }

    for (index, &moved) in scratch.iter().enumerate() {
        if unsafe { libc::dup2(moved, 3 + index as libc::c_int) } < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { libc::close(moved) };
    }

    Ok(())
}
