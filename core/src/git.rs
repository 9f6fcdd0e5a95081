use std::io;
use std::path::Path;
use std::path::PathBuf;

use path_clean::PathClean;
use walkdir::WalkDir;

use crate::error::Result;
use crate::error::SandboxErr;
use crate::mount::Mount;

/// Substring that marks a `gitdir` as a linked worktree's private directory.
const WORKTREES_MARKER: &str = "/.git/worktrees/";

/// Inspect `work_dir/.git` and emit the policy mounts that keep git metadata
/// safe inside the sandbox.
///
/// Hooks and config are always protected read-only. For a linked worktree the
/// private `.git/worktrees/<name>` directory stays writable (git keeps its
/// lock files there) while the main repository's hooks and config are
/// protected too.
///
/// With `strict` set, every branch ref except the currently checked out one
/// becomes read-only, along with `refs/tags` and `packed-refs`. The
/// `refs/heads` directory itself stays writable: git updates a ref through a
/// sibling `<ref>.lock` file, so locking down the directory would break
/// commits to the current branch.
pub(crate) fn discover(work_dir: &Path, strict: bool) -> Result<Vec<Mount>> {
    let dot_git = work_dir.join(".git");
    let meta = match std::fs::metadata(&dot_git) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(SandboxErr::host_lookup(format!(
                "reading {}: {err}",
                dot_git.display()
            )));
        }
    };

    let (git_dir, main_repo) = if meta.is_dir() {
        (dot_git, None)
    } else {
        let git_dir = parse_gitdir_file(work_dir, &dot_git)?;
        let text = git_dir.to_string_lossy().into_owned();
        let main_repo = text
            .find(WORKTREES_MARKER)
            .map(|at| PathBuf::from(&text[..at]));
        (git_dir, main_repo)
    };

    let mut mounts = vec![
        Mount::read_only_try(pattern(&git_dir.join("hooks"))),
        Mount::read_only_try(pattern(&git_dir.join("config"))),
    ];

    if let Some(main_repo) = &main_repo {
        // The worktree's own gitdir holds HEAD and index lock files; keep it
        // writable even when the surrounding area is read-only.
        mounts.push(Mount::read_write(pattern(&git_dir)));
        mounts.push(Mount::read_only_try(pattern(
            &main_repo.join(".git").join("hooks"),
        )));
        mounts.push(Mount::read_only_try(pattern(
            &main_repo.join(".git").join("config"),
        )));
    }

    if strict {
        let common_git_dir = match &main_repo {
            Some(main_repo) => main_repo.join(".git"),
            None => git_dir,
        };
        mounts.extend(strict_ref_mounts(&common_git_dir)?);
    }

    Ok(mounts)
}

/// Parse a `.git` file of the form `gitdir: <path>` (linked worktrees and
/// submodules). The referenced path must exist and be a directory.
fn parse_gitdir_file(work_dir: &Path, dot_git: &Path) -> Result<PathBuf> {
    let text = std::fs::read_to_string(dot_git).map_err(|err| {
        SandboxErr::host_lookup(format!("reading {}: {err}", dot_git.display()))
    })?;
    let first_line = text.lines().next().unwrap_or("");

    let raw = first_line
        .get(.."gitdir:".len())
        .filter(|prefix| prefix.eq_ignore_ascii_case("gitdir:"))
        .map(|_| first_line["gitdir:".len()..].trim())
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| {
            SandboxErr::host_lookup(format!(
                "{} is not a valid gitdir pointer",
                dot_git.display()
            ))
        })?;

    let git_dir = {
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            path
        } else {
            work_dir.join(path)
        }
    }
    .clean();

    match std::fs::metadata(&git_dir) {
        Ok(meta) if meta.is_dir() => Ok(git_dir),
        Ok(_) => Err(SandboxErr::host_lookup(format!(
            "gitdir {} is not a directory",
            git_dir.display()
        ))),
        Err(err) => Err(SandboxErr::host_lookup(format!(
            "gitdir {}: {err}",
            git_dir.display()
        ))),
    }
}

fn strict_ref_mounts(common_git_dir: &Path) -> Result<Vec<Mount>> {
    let head_path = common_git_dir.join("HEAD");
    let head = std::fs::read_to_string(&head_path).map_err(|err| {
        SandboxErr::host_lookup(format!("reading {}: {err}", head_path.display()))
    })?;

    // Detached HEAD has no `ref:` line; with no current branch to spare,
    // every branch ref becomes read-only.
    let current_ref = head
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .strip_prefix("ref: refs/heads/")
        .map(|branch| common_git_dir.join("refs").join("heads").join(branch));

    let mut mounts = Vec::new();

    let heads_dir = common_git_dir.join("refs").join("heads");
    if heads_dir.is_dir() {
        for entry in WalkDir::new(&heads_dir).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                SandboxErr::host_lookup(format!(
                    "listing {}: {err}",
                    heads_dir.display()
                ))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if Some(entry.path()) == current_ref.as_deref() {
                continue;
            }
            mounts.push(Mount::read_only(pattern(entry.path())));
        }
    }

    mounts.push(Mount::read_only(pattern(
        &common_git_dir.join("refs").join("tags"),
    )));

    let packed_refs = common_git_dir.join("packed-refs");
    if std::fs::metadata(&packed_refs).is_ok_and(|meta| meta.is_file()) {
        mounts.push(Mount::read_only(pattern(&packed_refs)));
    }

    Ok(mounts)
}

fn pattern(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
