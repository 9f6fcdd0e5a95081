#![allow(clippy::expect_used)]

use std::fs;

use agent_sandbox_core::Config;
use agent_sandbox_core::FilesystemConfig;
use agent_sandbox_core::Mount;
use agent_sandbox_core::Sandbox;
use agent_sandbox_core::Wrapper;
use pretty_assertions::assert_eq;

use crate::suite::common;
use crate::suite::common::executable;
use crate::suite::common::find_directive;

fn no_presets() -> Config {
    Config {
        filesystem: FilesystemConfig {
            presets: Some(Vec::new()),
            mounts: Vec::new(),
        },
        ..Default::default()
    }
}

fn argv_of(config: &Config, world: &common::TestWorld, argv: &[&str]) -> Vec<String> {
    let sandbox = Sandbox::new(config, &world.env).expect("construct sandbox");
    let argv: Vec<String> = argv.iter().map(|s| (*s).to_string()).collect();
    sandbox
        .build_command(&argv)
        .expect("build command")
        .args()
        .to_vec()
}

#[test]
fn minimal_sandbox_network_on_docker_off() {
    let world = common::world();
    let mut config = no_presets();
    config.filesystem.presets = Some(vec!["!@all".to_string()]);

    let sandbox = Sandbox::new(&config, &world.env).expect("construct sandbox");
    let command = sandbox
        .build_command(&["true".to_string()])
        .expect("build command");
    let args = command.args();

    assert_eq!(
        args[..12],
        [
            "--die-with-parent",
            "--unshare-all",
            "--share-net",
            "--ro-bind",
            "/",
            "/",
            "--dev",
            "/dev",
            "--proc",
            "/proc",
            "--tmpfs",
            "/run",
        ]
        .map(String::from)
    );

    // The docker socket is masked even though docker was never mentioned.
    let socket_dst = fs::canonicalize("/var/run")
        .map(|dir| dir.join("docker.sock"))
        .unwrap_or_else(|_| "/var/run/docker.sock".into());
    let mask_at = find_directive(args, "--ro-bind", &socket_dst.to_string_lossy())
        .expect("docker mask directive");
    assert_eq!(args[mask_at + 1], "/dev/null");

    let tail = [
        "--chdir".to_string(),
        world.work.to_string_lossy().into_owned(),
        "--".to_string(),
        "true".to_string(),
    ];
    assert_eq!(args[args.len() - tail.len()..], tail);

    assert_eq!(command.inherited_file_count(), 0);
}

#[test]
fn blocked_command_with_two_path_hits() {
    let mut world = common::world();
    let bin1 = world.work.join("bin1");
    let bin2 = world.work.join("bin2");
    fs::create_dir_all(&bin1).expect("mkdir");
    fs::create_dir_all(&bin2).expect("mkdir");
    executable(&bin1.join("rm"), "#!/bin/sh\n");
    executable(&bin2.join("rm"), "#!/bin/sh\n");
    // Keep the fake bwrap reachable alongside the scenario PATH.
    world.push_path(&bin1);
    world.push_path(&bin2);

    let mut config = no_presets();
    config.commands.block = vec!["rm".to_string()];
    config.commands.launcher = "/bin/true".to_string();

    let sandbox = Sandbox::new(&config, &world.env).expect("construct sandbox");
    let command = sandbox
        .build_command(&["true".to_string()])
        .expect("build command");
    let args = command.args();

    let bin1_rm = bin1.join("rm").to_string_lossy().into_owned();
    let bin2_rm = bin2.join("rm").to_string_lossy().into_owned();
    assert!(find_directive(args, "--ro-bind", &bin1_rm).is_some());
    assert!(find_directive(args, "--ro-bind", &bin2_rm).is_some());

    let data_at = find_directive(args, "--ro-bind-data", "/run/agent-sandbox/wrappers/rm")
        .expect("wrapper payload directive");
    assert_eq!(args[data_at + 1], "3");
    assert_eq!(args[data_at - 2], "--perms");
    assert_eq!(args[data_at - 1], "0555");

    assert_eq!(command.inherited_file_count(), 1);

    // A fresh instance plans byte-identical argv.
    let again = argv_of(&config, &world, &["true"]);
    assert_eq!(args, again.as_slice());
}

#[test]
fn wrapped_command_with_bun_shim_alias() {
    let mut world = common::world();
    let x_bin = world.root.join("x/bin");
    let y_bin = world.root.join("y/bin");
    fs::create_dir_all(&x_bin).expect("mkdir");
    fs::create_dir_all(&y_bin).expect("mkdir");
    executable(&x_bin.join("npm"), "#!/bin/sh\n");
    executable(&x_bin.join("bun"), "#!/bin/sh\n");
    std::os::unix::fs::symlink(x_bin.join("bun"), y_bin.join("npm")).expect("symlink");
    world.push_path(&x_bin);
    world.push_path(&y_bin);

    let wrapper_script = world.root.join("npm-wrapper.sh");
    fs::write(&wrapper_script, "#!/bin/sh\nexec \"$@\"\n").expect("write wrapper");

    let mut config = no_presets();
    config.commands.wrappers.insert(
        "npm".to_string(),
        Wrapper {
            path: Some(wrapper_script.to_string_lossy().into_owned()),
            inline_script: None,
        },
    );
    config.commands.launcher = "/bin/true".to_string();

    let sandbox = Sandbox::new(&config, &world.env).expect("construct sandbox");
    let command = sandbox
        .build_command(&["true".to_string()])
        .expect("build command");
    let args = command.args();

    let npm = x_bin.join("npm").to_string_lossy().into_owned();
    let bun = x_bin.join("bun").to_string_lossy().into_owned();

    // Real binaries exposed under both names.
    let npm_bin_at = find_directive(args, "--ro-bind", "/run/agent-sandbox/bin/npm")
        .expect("npm real binary");
    assert_eq!(args[npm_bin_at + 1], npm);
    let bun_bin_at = find_directive(args, "--ro-bind", "/run/agent-sandbox/bin/bun")
        .expect("bun real binary");
    assert_eq!(args[bun_bin_at + 1], bun);

    // Payloads mounted under both names.
    assert!(find_directive(args, "--ro-bind-data", "/run/agent-sandbox/wrappers/npm").is_some());
    assert!(find_directive(args, "--ro-bind-data", "/run/agent-sandbox/wrappers/bun").is_some());

    // Launcher over both resolved real paths.
    let npm_launcher = find_directive(args, "--ro-bind", &npm).expect("launcher over npm");
    assert_eq!(args[npm_launcher + 1], "/bin/true");
    let bun_launcher = find_directive(args, "--ro-bind", &bun).expect("launcher over bun");
    assert_eq!(args[bun_launcher + 1], "/bin/true");

    assert_eq!(command.inherited_file_count(), 2);
}

#[test]
fn excluding_a_single_file() {
    let world = common::world();
    fs::write(world.work.join("secret.txt"), "hunter2").expect("write");

    let mut config = no_presets();
    config.filesystem.mounts = vec![Mount::exclude("secret.txt")];

    let sandbox = Sandbox::new(&config, &world.env).expect("construct sandbox");
    let command = sandbox
        .build_command(&["true".to_string()])
        .expect("build command");
    let args = command.args();

    let parent = world.work.to_string_lossy().into_owned();
    let secret = world.work.join("secret.txt").to_string_lossy().into_owned();

    let dir_at = find_directive(args, "--dir", &parent).expect("parent dir directive");
    let data_at = find_directive(args, "--ro-bind-data", &secret).expect("empty data directive");
    assert!(dir_at < data_at);
    assert_eq!(args[data_at - 2], "--perms");
    assert_eq!(args[data_at - 1], "0000");
    assert_eq!(args[data_at + 1], "3");

    assert_eq!(command.inherited_file_count(), 1);
}

#[test]
fn child_mount_overrides_parent_exclusion() {
    let world = common::world();
    fs::create_dir_all(world.work.join("parent/child")).expect("mkdir");

    let mut config = no_presets();
    config.filesystem.mounts = vec![
        Mount::exclude("parent"),
        Mount::read_write("parent/child"),
    ];

    let args = argv_of(&config, &world, &["true"]);

    let parent = world.work.join("parent").to_string_lossy().into_owned();
    let child = world
        .work
        .join("parent/child")
        .to_string_lossy()
        .into_owned();

    let tmpfs_at = find_directive(&args, "--tmpfs", &parent).expect("parent tmpfs");
    let bind_at = find_directive(&args, "--bind", &child).expect("child bind");
    assert!(tmpfs_at < bind_at);
}

#[test]
fn git_strict_with_detached_head_protects_all_branches() {
    let world = common::world();
    let git = world.work.join(".git");
    fs::create_dir_all(git.join("refs/heads")).expect("mkdir");
    fs::create_dir_all(git.join("refs/tags")).expect("mkdir");
    fs::write(git.join("HEAD"), "deadbeef\n").expect("write HEAD");
    fs::write(git.join("refs/heads/master"), "aaaa\n").expect("write");
    fs::write(git.join("refs/heads/feature"), "bbbb\n").expect("write");

    let mut config = no_presets();
    config.filesystem.presets = Some(vec!["@git-strict".to_string()]);

    let args = argv_of(&config, &world, &["true"]);

    let master = git.join("refs/heads/master").to_string_lossy().into_owned();
    let feature = git.join("refs/heads/feature").to_string_lossy().into_owned();
    let heads = git.join("refs/heads").to_string_lossy().into_owned();
    let tags = git.join("refs/tags").to_string_lossy().into_owned();

    assert!(find_directive(&args, "--ro-bind", &master).is_some());
    assert!(find_directive(&args, "--ro-bind", &feature).is_some());
    assert!(find_directive(&args, "--ro-bind", &tags).is_some());

    // The heads directory itself is never mounted; ref locks need it
    // writable.
    assert!(!args.contains(&heads));

    // Nothing re-exposes a branch ref read-write.
    for (index, arg) in args.iter().enumerate() {
        if arg == "--bind" {
            assert_ne!(args[index + 2], master);
            assert_ne!(args[index + 2], feature);
        }
    }
}
