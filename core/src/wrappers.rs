use std::collections::BTreeSet;
use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use crate::config::CommandsConfig;
use crate::config::Wrapper;
use crate::environment::Environment;
use crate::error::Result;
use crate::error::SandboxErr;
use crate::mount::Mount;
use crate::paths;

/// Payload installed for blocked commands. One identical script for every
/// blocked name: the launcher dispatches on argv[0], the script reports the
/// basename it was invoked as and refuses.
const DENY_SCRIPT: &str = "#!/bin/sh\n\
name=\"$(basename \"$0\")\"\n\
echo \"agent-sandbox: ${name}: command is blocked inside this sandbox\" >&2\n\
exit 127\n";

/// Execute/search only; listing the wrapper tree from inside fails.
const WRAPPER_DIR_PERMS: u32 = 0o111;

const WRAPPER_SCRIPT_PERMS: u32 = 0o555;

/// A payload that needs a per-invocation inherited fd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DataMount {
    pub dst: String,
    pub data: Vec<u8>,
    pub perms: u32,
}

/// Everything the wrapper planner emits, split by plan section: directory
/// creation, real-binary exposures, launcher binds over the discovered
/// targets, and the script payloads.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct WrapperPlan {
    pub dirs: Vec<Mount>,
    pub real_bins: Vec<Mount>,
    pub launcher_binds: Vec<Mount>,
    pub data_mounts: Vec<DataMount>,
}

/// Plan command interception. Blocked names are processed first (sorted),
/// then wrapped names (sorted); both discover their targets by walking the
/// snapshot PATH and deduplicating by resolved real path.
pub(crate) fn plan(commands: &CommandsConfig, env: &Environment) -> Result<WrapperPlan> {
    let mut plan = WrapperPlan::default();
    if !commands.is_active() {
        return Ok(plan);
    }

    let path_dirs = parse_path(env)?;
    let mount_path = commands.mount_path();

    let blocked: BTreeSet<&str> = commands.block.iter().map(String::as_str).collect();
    for name in &blocked {
        let targets = find_targets(name, &path_dirs)?;

        plan.data_mounts.push(DataMount {
            dst: format!("{mount_path}/wrappers/{name}"),
            data: DENY_SCRIPT.as_bytes().to_vec(),
            perms: WRAPPER_SCRIPT_PERMS,
        });
        for target in &targets {
            plan.launcher_binds.push(Mount::ro_bind(
                commands.launcher.clone(),
                target.to_string_lossy(),
            ));
        }
        for (alias, _) in aliases(name, &targets) {
            plan.data_mounts.push(DataMount {
                dst: format!("{mount_path}/wrappers/{alias}"),
                data: DENY_SCRIPT.as_bytes().to_vec(),
                perms: WRAPPER_SCRIPT_PERMS,
            });
        }
    }

    for (name, wrapper) in &commands.wrappers {
        if blocked.contains(name.as_str()) {
            continue;
        }
        let targets = find_targets(name, &path_dirs)?;
        let payload = load_wrapper(name, wrapper, env)?;

        plan.data_mounts.push(DataMount {
            dst: format!("{mount_path}/wrappers/{name}"),
            data: payload.clone(),
            perms: WRAPPER_SCRIPT_PERMS,
        });
        // Always expose the real binary; wrapper scripts exec it from here.
        plan.real_bins.push(Mount::ro_bind(
            targets[0].to_string_lossy(),
            format!("{mount_path}/bin/{name}"),
        ));
        for target in &targets {
            plan.launcher_binds.push(Mount::ro_bind(
                commands.launcher.clone(),
                target.to_string_lossy(),
            ));
        }
        // A target resolving to a differently named binary (`npm` shimmed to
        // `bun`) gets the payload and the real binary under the alias name
        // too, so the dispatcher recognizes either spelling.
        for (alias, target) in aliases(name, &targets) {
            plan.data_mounts.push(DataMount {
                dst: format!("{mount_path}/wrappers/{alias}"),
                data: payload.clone(),
                perms: WRAPPER_SCRIPT_PERMS,
            });
            plan.real_bins.push(Mount::ro_bind(
                target.to_string_lossy(),
                format!("{mount_path}/bin/{alias}"),
            ));
        }
    }

    if !plan.data_mounts.is_empty() {
        plan.dirs
            .push(Mount::dir_with_perms(mount_path, WRAPPER_DIR_PERMS));
        if !plan.real_bins.is_empty() {
            plan.dirs.push(Mount::dir_with_perms(
                format!("{mount_path}/bin"),
                WRAPPER_DIR_PERMS,
            ));
        }
        plan.dirs.push(Mount::dir_with_perms(
            format!("{mount_path}/wrappers"),
            WRAPPER_DIR_PERMS,
        ));
    }

    Ok(plan)
}

/// Ordered, deduplicated absolute PATH directories. Empty entries (the
/// shell's "current directory" convention) are ignored; relative entries are
/// anchored to the work directory.
fn parse_path(env: &Environment) -> Result<Vec<PathBuf>> {
    let raw = env
        .host_env
        .get("PATH")
        .filter(|path| !path.is_empty())
        .ok_or_else(|| {
            SandboxErr::host_lookup(
                "PATH environment variable is empty (required for command interception)",
            )
        })?;

    let mut seen = HashSet::new();
    let mut dirs = Vec::new();
    for entry in raw.split(':') {
        if entry.is_empty() {
            continue;
        }
        let dir = paths::resolve(entry, env);
        if seen.insert(dir.clone()) {
            dirs.push(dir);
        }
    }

    if dirs.is_empty() {
        return Err(SandboxErr::host_lookup(
            "PATH environment variable has no usable entries",
        ));
    }
    Ok(dirs)
}

/// All executable regular files named `name` in PATH order, deduplicated by
/// resolved real path.
fn find_targets(name: &str, path_dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for dir in path_dirs {
        let candidate = dir.join(name);
        let Ok(meta) = std::fs::metadata(&candidate) else {
            continue;
        };
        if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
            continue;
        }
        let Ok(real) = std::fs::canonicalize(&candidate) else {
            continue;
        };
        if seen.insert(real.clone()) {
            targets.push(real);
        }
    }

    if targets.is_empty() {
        return Err(SandboxErr::host_lookup(format!(
            "command {name:?} not found in PATH"
        )));
    }
    Ok(targets)
}

/// Distinct target basenames that differ from the command name, paired with
/// the first target carrying each.
fn aliases<'a>(name: &str, targets: &'a [PathBuf]) -> Vec<(String, &'a PathBuf)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for target in targets {
        let Some(basename) = target.file_name() else {
            continue;
        };
        let basename = basename.to_string_lossy().into_owned();
        if basename != name && seen.insert(basename.clone()) {
            out.push((basename, target));
        }
    }
    out
}

/// Wrapper payload: the inline script when given, otherwise the file content
/// at the wrapper's path. Read once at plan time.
fn load_wrapper(name: &str, wrapper: &Wrapper, env: &Environment) -> Result<Vec<u8>> {
    if let Some(script) = wrapper.inline_script.as_deref().filter(|s| !s.is_empty()) {
        return Ok(script.as_bytes().to_vec());
    }

    let path = wrapper.path.as_deref().unwrap_or_default();
    let resolved = paths::resolve(path, env);
    let meta = std::fs::metadata(&resolved).map_err(|err| {
        SandboxErr::host_lookup(format!(
            "reading wrapper script for {name:?} at {}: {err}",
            resolved.display()
        ))
    })?;
    if meta.is_dir() {
        return Err(SandboxErr::host_lookup(format!(
            "wrapper script for {name:?} at {} is a directory",
            resolved.display()
        )));
    }
    std::fs::read(&resolved).map_err(|err| {
        SandboxErr::host_lookup(format!(
            "reading wrapper script for {name:?} at {}: {err}",
            resolved.display()
        ))
    })
}
