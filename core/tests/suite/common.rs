#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use agent_sandbox_core::Environment;
use tempfile::TempDir;

/// A disposable host layout: a work directory, a home directory, and a PATH
/// containing a fake `bwrap` so command building succeeds without the real
/// tool installed.
pub struct TestWorld {
    // Held for its Drop; the directory disappears with the world.
    _tmp: TempDir,
    pub root: PathBuf,
    pub work: PathBuf,
    pub home: PathBuf,
    pub env: Environment,
}

pub fn world() -> TestWorld {
    let tmp = TempDir::new().expect("tempdir");
    let root = fs::canonicalize(tmp.path()).expect("canonicalize tempdir");

    let work = root.join("work");
    let home = root.join("home");
    fs::create_dir_all(&work).expect("mkdir work");
    fs::create_dir_all(&home).expect("mkdir home");

    let fakebin = root.join("fakebin");
    fs::create_dir_all(&fakebin).expect("mkdir fakebin");
    executable(&fakebin.join("bwrap"), "#!/bin/sh\nexit 0\n");

    let env = Environment {
        work_dir: work.clone(),
        home_dir: home.clone(),
        host_env: HashMap::from([(
            "PATH".to_string(),
            fakebin.to_string_lossy().into_owned(),
        )]),
    };

    TestWorld {
        _tmp: tmp,
        root,
        work,
        home,
        env,
    }
}

impl TestWorld {
    /// Append a directory to the snapshot PATH.
    pub fn push_path(&mut self, dir: &Path) {
        let path = self.env.host_env.get_mut("PATH").expect("PATH present");
        path.push(':');
        path.push_str(&dir.to_string_lossy());
    }
}

pub fn executable(path: &Path, content: &str) {
    fs::write(path, content).expect("write executable");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

/// Index of the first `directive ... dst` occurrence, matching `dst` at its
/// directive-specific operand position.
pub fn find_directive(args: &[String], directive: &str, dst: &str) -> Option<usize> {
    let operand_offset = match directive {
        "--ro-bind" | "--ro-bind-try" | "--bind" | "--bind-try" => 2,
        "--tmpfs" | "--dir" => 1,
        "--ro-bind-data" => 2,
        other => panic!("unhandled directive {other}"),
    };
    args.iter().enumerate().position(|(index, arg)| {
        arg == directive && args.get(index + operand_offset).map(String::as_str) == Some(dst)
    })
}

/// Destinations of every mount directive, in argv order.
pub fn mount_destinations(args: &[String]) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--ro-bind" | "--ro-bind-try" | "--bind" | "--bind-try" | "--ro-bind-data" => {
                out.push((index, args[index + 2].clone()));
                index += 3;
            }
            "--tmpfs" | "--dir" | "--dev" | "--proc" => {
                out.push((index, args[index + 1].clone()));
                index += 2;
            }
            "--" => break,
            _ => index += 1,
        }
    }
    out
}
