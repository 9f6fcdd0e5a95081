use crate::config::BaseFs;
use crate::config::Config;
use crate::environment::Environment;
use crate::error::Result;
use crate::error::SandboxErr;
use crate::mount::Mount;
use crate::mount::MountKind;
use crate::paths;
use crate::policy::ResolvedPolicy;
use crate::wrappers::DataMount;
use crate::wrappers::WrapperPlan;

/// Placeholder substituted with the `/dev/null` fd at command-build time.
/// All empty-data exclusion mounts share it. NUL-bracketed so it can never
/// collide with a real path or flag.
pub(crate) const EMPTY_DATA_FD: &str = "\u{0}empty-data-fd\u{0}";

/// Placeholder for one wrapper payload slot, consumed positionally.
pub(crate) fn data_fd_placeholder(slot: usize) -> String {
    format!("\u{0}data-fd:{slot}\u{0}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Chmod {
    pub path: String,
    pub perms: u32,
}

/// The reusable part of every sandboxed invocation: a bwrap argv template
/// (with fd placeholders), the payloads that need per-invocation backing
/// files, and the chmod ledger applied after all mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Plan {
    pub bwrap_args: Vec<String>,
    pub needs_empty_file: bool,
    pub wrapper_mounts: Vec<DataMount>,
    pub chmods: Vec<Chmod>,
}

/// Order direct (non-policy) user mounts by depth then destination, dropping
/// `-try` binds whose source is missing and rejecting strict binds whose
/// source is missing.
pub(crate) fn order_direct_mounts(
    config: &Config,
    env: &Environment,
) -> Result<Vec<Mount>> {
    let mut keyed: Vec<(usize, String, Mount)> = Vec::new();

    for mount in &config.filesystem.mounts {
        if mount.kind.is_policy() {
            continue;
        }

        if mount.kind.has_src() && std::fs::metadata(&mount.src).is_err() {
            if mount.kind.allows_missing() {
                config.emit_debug(&format!(
                    "skipping {} mount: source {} missing",
                    mount.kind, mount.src
                ));
                continue;
            }
            return Err(SandboxErr::host_lookup(format!(
                "mount source {} does not exist",
                mount.src
            )));
        }

        let dst = paths::resolve(&mount.dst, env);
        let dst_text = dst.to_string_lossy().into_owned();
        keyed.push((
            paths::depth(&dst)?,
            dst_text.clone(),
            Mount {
                dst: dst_text,
                ..mount.clone()
            },
        ));
    }

    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(keyed.into_iter().map(|(_, _, mount)| mount).collect())
}

/// Compose the full argv template in its fixed order: prelude, DNS
/// compatibility, temp dir, resolved policy mounts, direct mounts, wrapper
/// tree, docker directive.
pub(crate) fn assemble(
    config: &Config,
    env: &Environment,
    policy: &ResolvedPolicy,
    direct: &[Mount],
    dns: &[Mount],
    wrappers: &WrapperPlan,
    docker: &Mount,
) -> Result<Plan> {
    let mut args: Vec<String> = Vec::new();
    let mut chmods: Vec<Chmod> = Vec::new();

    push_all(&mut args, &["--die-with-parent", "--unshare-all"]);
    if config.network {
        push_all(&mut args, &["--share-net"]);
    }
    match config.base_fs {
        BaseFs::Host => push_all(&mut args, &["--ro-bind", "/", "/"]),
        BaseFs::Empty => push_all(&mut args, &["--tmpfs", "/"]),
    }
    push_all(
        &mut args,
        &["--dev", "/dev", "--proc", "/proc", "--tmpfs", "/run"],
    );

    if config.network {
        for mount in dns {
            emit(&mut args, &mut chmods, mount)?;
        }
    }

    if let Some(temp_dir) = &config.temp_dir {
        let temp_dir = paths::resolve(&temp_dir.to_string_lossy(), env);
        push_all(&mut args, &["--bind"]);
        args.push(temp_dir.to_string_lossy().into_owned());
        push_all(&mut args, &["/tmp", "--setenv", "TMPDIR", "/tmp"]);
    }

    for mount in &policy.mounts {
        emit(&mut args, &mut chmods, mount)?;
    }
    for mount in direct {
        emit(&mut args, &mut chmods, mount)?;
    }

    for mount in &wrappers.dirs {
        emit(&mut args, &mut chmods, mount)?;
    }
    for mount in &wrappers.real_bins {
        emit(&mut args, &mut chmods, mount)?;
    }
    for mount in &wrappers.launcher_binds {
        emit(&mut args, &mut chmods, mount)?;
    }
    for (slot, data) in wrappers.data_mounts.iter().enumerate() {
        push_all(&mut args, &["--perms"]);
        args.push(octal(data.perms));
        push_all(&mut args, &["--ro-bind-data"]);
        args.push(data_fd_placeholder(slot));
        args.push(data.dst.clone());
    }

    // Masks or exposes; always after every other mount so nothing can
    // re-expose the socket.
    emit(&mut args, &mut chmods, docker)?;

    Ok(Plan {
        bwrap_args: args,
        needs_empty_file: policy.needs_empty_file,
        wrapper_mounts: wrappers.data_mounts.clone(),
        chmods,
    })
}

fn push_all(args: &mut Vec<String>, literals: &[&str]) {
    args.extend(literals.iter().map(|s| (*s).to_string()));
}

pub(crate) fn octal(perms: u32) -> String {
    format!("{perms:04o}")
}

/// Emit one low-level mount as bwrap directives. `Dir` mounts with non-zero
/// perms contribute a chmod entry instead of relying on `--perms`, so the
/// mode lands after the whole tree is assembled.
fn emit(args: &mut Vec<String>, chmods: &mut Vec<Chmod>, mount: &Mount) -> Result<()> {
    match mount.kind {
        MountKind::RoBind => {
            push_all(args, &["--ro-bind"]);
            args.push(mount.src.clone());
            args.push(mount.dst.clone());
        }
        MountKind::RoBindTry => {
            push_all(args, &["--ro-bind-try"]);
            args.push(mount.src.clone());
            args.push(mount.dst.clone());
        }
        MountKind::Bind => {
            push_all(args, &["--bind"]);
            args.push(mount.src.clone());
            args.push(mount.dst.clone());
        }
        MountKind::BindTry => {
            push_all(args, &["--bind-try"]);
            args.push(mount.src.clone());
            args.push(mount.dst.clone());
        }
        MountKind::Tmpfs => {
            push_all(args, &["--tmpfs"]);
            args.push(mount.dst.clone());
        }
        MountKind::Dir => {
            push_all(args, &["--dir"]);
            args.push(mount.dst.clone());
            if mount.perms != 0 {
                chmods.push(Chmod {
                    path: mount.dst.clone(),
                    perms: mount.perms,
                });
            }
        }
        MountKind::RoBindData => {
            push_all(args, &["--perms"]);
            args.push(octal(mount.perms));
            push_all(args, &["--ro-bind-data"]);
            // fd 0 marks the shared empty-data slot bound at build time.
            if mount.fd == 0 {
                args.push(EMPTY_DATA_FD.to_string());
            } else {
                args.push(mount.fd.to_string());
            }
            args.push(mount.dst.clone());
        }
        _ => {
            return Err(SandboxErr::Invariant(format!(
                "policy mount kind {} reached the directive emitter",
                mount.kind
            )));
        }
    }
    Ok(())
}
