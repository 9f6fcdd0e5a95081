#![allow(clippy::expect_used)]

use std::fs;

use agent_sandbox_core::Config;
use agent_sandbox_core::FilesystemConfig;
use agent_sandbox_core::Mount;
use agent_sandbox_core::Sandbox;
use pretty_assertions::assert_eq;

use crate::suite::common;
use crate::suite::common::executable;
use crate::suite::common::mount_destinations;

/// A configuration that exercises presets, git discovery, exclusions, and
/// command interception all at once.
fn rich_world() -> (common::TestWorld, Config) {
    let mut world = common::world();

    let git = world.work.join(".git");
    fs::create_dir_all(git.join("refs/heads")).expect("mkdir");
    fs::create_dir_all(git.join("refs/tags")).expect("mkdir");
    fs::write(git.join("HEAD"), "ref: refs/heads/main\n").expect("write HEAD");
    fs::write(git.join("refs/heads/main"), "aaaa\n").expect("write");
    fs::write(git.join("refs/heads/other"), "bbbb\n").expect("write");
    fs::write(git.join("config"), "[core]\n").expect("write config");

    fs::create_dir_all(world.home.join(".cache")).expect("mkdir");
    fs::create_dir_all(world.home.join(".ssh")).expect("mkdir");
    fs::write(world.work.join("token.txt"), "secret").expect("write");
    fs::write(world.work.join("tsconfig.json"), "{}").expect("write");

    let bin = world.work.join("bin");
    fs::create_dir_all(&bin).expect("mkdir");
    executable(&bin.join("rm"), "#!/bin/sh\n");
    world.push_path(&bin);

    let mut config = Config {
        filesystem: FilesystemConfig {
            presets: None,
            mounts: vec![Mount::exclude("token.txt")],
        },
        ..Default::default()
    };
    config.commands.block = vec!["rm".to_string()];
    config.commands.launcher = "/bin/true".to_string();

    (world, config)
}

fn build_args(config: &Config, world: &common::TestWorld) -> Vec<String> {
    Sandbox::new(config, &world.env)
        .expect("construct sandbox")
        .build_command(&["true".to_string()])
        .expect("build command")
        .args()
        .to_vec()
}

#[test]
fn construction_is_deterministic() {
    let (world, config) = rich_world();

    let first = build_args(&config, &world);
    for _ in 0..4 {
        let again = build_args(&config, &world);
        assert_eq!(first, again);
    }
}

#[test]
fn parents_always_precede_children() {
    let (world, config) = rich_world();
    let args = build_args(&config, &world);

    let mounts = mount_destinations(&args);
    for (a_pos, (a_index, a_dst)) in mounts.iter().enumerate() {
        for (b_index, b_dst) in mounts.iter().skip(a_pos + 1).map(|m| (&m.0, &m.1)) {
            let b_is_strict_descendant =
                b_dst.starts_with(&format!("{a_dst}/")) || a_dst == "/" && b_dst != "/";
            if b_is_strict_descendant {
                assert!(
                    a_index < b_index,
                    "ancestor {a_dst} must be mounted before {b_dst}"
                );
            }
        }
    }
}

#[test]
fn docker_directive_is_last_among_mounts() {
    let (world, config) = rich_world();
    let args = build_args(&config, &world);

    let socket_dst = fs::canonicalize("/var/run")
        .map(|dir| dir.join("docker.sock"))
        .unwrap_or_else(|_| "/var/run/docker.sock".into());
    let socket_dst = socket_dst.to_string_lossy().into_owned();

    let mounts = mount_destinations(&args);
    let (docker_index, _) = mounts
        .iter()
        .find(|(_, dst)| *dst == socket_dst)
        .expect("docker mask directive");
    for (index, dst) in &mounts {
        assert!(
            index <= docker_index,
            "mount {dst} appears after the docker directive"
        );
    }
}

#[test]
fn empty_data_fd_is_three_and_unique() {
    let (world, config) = rich_world();

    let sandbox = Sandbox::new(&config, &world.env).expect("construct sandbox");
    let command = sandbox
        .build_command(&["true".to_string()])
        .expect("build command");

    // One /dev/null file for the exclusion, one payload for the blocked rm.
    assert_eq!(command.inherited_file_count(), 2);

    let token = world.work.join("token.txt").to_string_lossy().into_owned();
    let args = command.args();
    let data_at = common::find_directive(args, "--ro-bind-data", &token)
        .expect("empty data directive");
    assert_eq!(args[data_at + 1], "3");
    assert!(args.iter().all(|arg| !arg.contains('\u{0}')));
}

#[test]
fn chmods_follow_mounts_and_chdir_is_final() {
    let (world, config) = rich_world();
    let args = build_args(&config, &world);

    let last_mount = mount_destinations(&args)
        .last()
        .map(|(index, _)| *index)
        .expect("at least one mount");
    let chmod_at = args
        .iter()
        .position(|arg| arg == "--chmod")
        .expect("wrapper dirs produce chmods");
    let chdir_at = args
        .iter()
        .position(|arg| arg == "--chdir")
        .expect("chdir directive");
    let separator_at = args
        .iter()
        .position(|arg| arg == "--")
        .expect("separator");

    assert!(last_mount < chmod_at);
    assert!(chmod_at < chdir_at);
    assert!(chdir_at < separator_at);
    assert_eq!(args[chdir_at + 1], world.work.to_string_lossy());
}
