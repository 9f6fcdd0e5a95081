use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::config::Config;
use crate::environment::Environment;
use crate::error::Result;
use crate::error::SandboxErr;
use crate::mount::Mount;
use crate::mount::MountKind;
use crate::paths;
use crate::presets;

/// Gate all public input before planning starts. Every problem found is
/// reported, not just the first; the result is a single joined
/// [`SandboxErr::InputInvalid`].
pub(crate) fn validate(config: &Config, env: &Environment) -> Result<()> {
    let mut problems: Vec<String> = Vec::new();

    check_environment(env, &mut problems);
    check_presets(config, &mut problems);
    for (index, mount) in config.filesystem.mounts.iter().enumerate() {
        check_mount(index, mount, env, &mut problems);
    }
    check_commands(config, &mut problems);

    if problems.is_empty() {
        Ok(())
    } else {
        Err(SandboxErr::InputInvalid(problems.join("; ")))
    }
}

fn check_environment(env: &Environment, problems: &mut Vec<String>) {
    if env.work_dir.as_os_str().is_empty() {
        problems.push("environment work_dir is empty".to_string());
    } else if !env.work_dir.is_absolute() {
        problems.push("environment work_dir is not absolute".to_string());
    }

    if env.home_dir.as_os_str().is_empty() {
        problems.push("environment home_dir is empty".to_string());
    } else if !env.home_dir.is_absolute() {
        problems.push("environment home_dir is not absolute".to_string());
    }
}

fn check_presets(config: &Config, problems: &mut Vec<String>) {
    if let Err(problem) = presets::parse_selection(config.filesystem.presets.as_deref()) {
        problems.push(problem);
    }
}

fn check_mount(index: usize, mount: &Mount, env: &Environment, problems: &mut Vec<String>) {
    let kind = mount.kind;
    let mut push = |problem: String| problems.push(format!("mount {index} ({kind}) {problem}"));

    if mount.dst.is_empty() {
        push("destination is empty".to_string());
        return;
    }

    if !kind.is_policy() && !Path::new(&mount.dst).is_absolute() {
        push("destination is not absolute".to_string());
    }

    if kind.has_src() {
        if mount.src.is_empty() || !Path::new(&mount.src).is_absolute() {
            push("source must be an absolute path".to_string());
        }
    } else if !mount.src.is_empty() {
        push("source must be empty".to_string());
    }

    match kind {
        MountKind::RoBindData => {
            if mount.fd <= 0 {
                push("fd must be positive".to_string());
            }
        }
        _ => {
            if mount.fd != 0 {
                push("fd must be zero".to_string());
            }
        }
    }

    let perms_allowed = matches!(kind, MountKind::Dir | MountKind::RoBindData);
    if !perms_allowed && mount.perms != 0 {
        push("perms must be zero".to_string());
    }

    if matches!(kind, MountKind::ExcludeFile | MountKind::ExcludeDir)
        && mount.dst.contains(['*', '?', '['])
    {
        push("destination must not contain glob characters".to_string());
    }

    // /run is rebuilt as a fresh tmpfs by the plan prelude; a rule targeting
    // it would silently disappear underneath that mount.
    if paths::resolve(&mount.dst, env) == Path::new("/run") {
        push("destination /run is reserved".to_string());
    }
}

fn check_commands(config: &Config, problems: &mut Vec<String>) {
    let commands = &config.commands;

    for name in &commands.block {
        check_command_name("blocked command", name, problems);
    }
    for (name, wrapper) in &commands.wrappers {
        check_command_name("wrapped command", name, problems);

        let has_path = wrapper.path.as_deref().is_some_and(|p| !p.is_empty());
        let has_inline = wrapper
            .inline_script
            .as_deref()
            .is_some_and(|s| !s.is_empty());
        if !has_path && !has_inline {
            problems.push(format!(
                "wrapper {name:?} needs either path or inline_script"
            ));
        }
    }

    if let Some(mount_path) = &commands.mount_path
        && !Path::new(mount_path).is_absolute()
    {
        problems.push("commands mount_path is not absolute".to_string());
    }

    if !commands.is_active() {
        return;
    }

    let launcher = Path::new(&commands.launcher);
    if commands.launcher.is_empty() {
        problems.push("commands launcher is required when commands are intercepted".to_string());
        return;
    }
    if !launcher.is_absolute() {
        problems.push("commands launcher is not absolute".to_string());
        return;
    }
    match std::fs::metadata(launcher) {
        Err(_) => problems.push(format!(
            "commands launcher {} does not exist",
            launcher.display()
        )),
        Ok(meta) if meta.is_dir() => problems.push(format!(
            "commands launcher {} is a directory",
            launcher.display()
        )),
        Ok(meta) if meta.permissions().mode() & 0o111 == 0 => problems.push(format!(
            "commands launcher {} is not executable",
            launcher.display()
        )),
        Ok(_) => {}
    }
}

fn check_command_name(what: &str, name: &str, problems: &mut Vec<String>) {
    if name.is_empty() {
        problems.push(format!("{what} name is empty"));
    } else if name.contains('/') {
        problems.push(format!("{what} name {name:?} must not contain '/'"));
    }
}
