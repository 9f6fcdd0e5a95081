use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::hash_map::Entry as MapEntry;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use crate::environment::Environment;
use crate::error::Result;
use crate::error::SandboxErr;
use crate::mount::Mount;
use crate::mount::MountKind;
use crate::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicyAction {
    ReadOnly,
    ReadWrite,
    Exclude,
}

/// A policy rule after pattern resolution, ready for precedence arbitration
/// and ordering.
#[derive(Debug, Clone)]
struct ResolvedRule {
    path: PathBuf,
    index: usize,
    depth: usize,
    action: PolicyAction,
    use_try: bool,
    exact: bool,
    is_dir: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ResolvedPolicy {
    /// Low-level mounts, parents before children.
    pub mounts: Vec<Mount>,
    /// True when at least one excluded file needs the shared `/dev/null`
    /// data fd at command-build time.
    pub needs_empty_file: bool,
}

/// Resolve policy mounts (presets first, then user mounts, in order) into
/// concrete low-level mounts.
///
/// Precedence is keyed on the resolved absolute path: an exact rule beats a
/// glob-produced one, and between rules of equal exact-ness the later one
/// (higher original index) wins. Survivors are ordered by depth, then
/// destination, so every parent mount is applied before its children — a
/// later child read-write mount must override a parent exclusion.
pub(crate) fn resolve(mounts: &[Mount], env: &Environment) -> Result<ResolvedPolicy> {
    let mut winners: HashMap<PathBuf, ResolvedRule> = HashMap::new();

    for (index, mount) in mounts.iter().enumerate() {
        if !mount.kind.is_policy() {
            return Err(SandboxErr::Invariant(format!(
                "non-policy mount kind {} reached the policy resolver",
                mount.kind
            )));
        }

        let pattern = paths::resolve(&mount.dst, env);

        // Forced-type exclusions assert the on-disk type themselves: no glob
        // expansion, no symlink evaluation, no stat.
        if let MountKind::ExcludeFile | MountKind::ExcludeDir = mount.kind {
            let rule = ResolvedRule {
                depth: paths::depth(&pattern)?,
                path: pattern,
                index,
                action: PolicyAction::Exclude,
                use_try: false,
                exact: true,
                is_dir: mount.kind == MountKind::ExcludeDir,
            };
            arbitrate(&mut winners, rule);
            continue;
        }

        let action = match mount.kind {
            MountKind::ReadOnly | MountKind::ReadOnlyTry => PolicyAction::ReadOnly,
            MountKind::ReadWrite | MountKind::ReadWriteTry => PolicyAction::ReadWrite,
            _ => PolicyAction::Exclude,
        };
        let use_try = mount.kind.allows_missing();

        let text = pattern.to_string_lossy().into_owned();
        let has_glob = text.contains(['*', '?', '[']);
        let candidates = if has_glob {
            let matched = expand_glob(&mount.dst, &text)?;
            if matched.is_empty() {
                if use_try {
                    tracing::debug!("mount {:?}: no matches, skipping", mount.dst);
                    continue;
                }
                return Err(SandboxErr::host_lookup(format!(
                    "mount {:?} matched 0 paths",
                    mount.dst
                )));
            }
            matched
        } else {
            vec![pattern]
        };

        for candidate in candidates {
            let Some(resolved) = evaluate(&mount.dst, &candidate, use_try)? else {
                tracing::debug!("mount {:?}: {} missing, skipping", mount.dst, candidate.display());
                continue;
            };
            let rule = ResolvedRule {
                depth: paths::depth(&resolved.0)?,
                path: resolved.0,
                index,
                action,
                use_try,
                exact: !has_glob,
                is_dir: resolved.1,
            };
            arbitrate(&mut winners, rule);
        }
    }

    translate(winners)
}

fn expand_glob(original: &str, pattern: &str) -> Result<Vec<PathBuf>> {
    let matches = glob::glob(pattern).map_err(|err| {
        SandboxErr::host_lookup(format!("mount pattern {original:?}: {err}"))
    })?;

    let mut paths = Vec::new();
    for entry in matches {
        let path = entry.map_err(|err| {
            SandboxErr::host_lookup(format!("mount pattern {original:?}: {err}"))
        })?;
        paths.push(path);
    }
    Ok(paths)
}

/// Follow symlinks and stat one concrete candidate. Returns the canonical
/// path and whether it is a directory, or `None` when the path is missing
/// and the rule tolerates that.
fn evaluate(original: &str, candidate: &Path, use_try: bool) -> Result<Option<(PathBuf, bool)>> {
    let resolved = match std::fs::canonicalize(candidate) {
        Ok(resolved) => resolved,
        Err(err) if err.kind() == io::ErrorKind::NotFound && use_try => return Ok(None),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(SandboxErr::host_lookup(format!(
                "mount {:?}: {} does not exist",
                original,
                candidate.display()
            )));
        }
        Err(err) => {
            return Err(SandboxErr::host_lookup(format!(
                "mount {:?}: resolving {}: {err}",
                original,
                candidate.display()
            )));
        }
    };

    match std::fs::metadata(&resolved) {
        Ok(meta) => Ok(Some((resolved, meta.is_dir()))),
        Err(err) if err.kind() == io::ErrorKind::NotFound && use_try => Ok(None),
        Err(err) => Err(SandboxErr::host_lookup(format!(
            "mount {:?}: stat {}: {err}",
            original,
            resolved.display()
        ))),
    }
}

fn arbitrate(winners: &mut HashMap<PathBuf, ResolvedRule>, rule: ResolvedRule) {
    match winners.entry(rule.path.clone()) {
        MapEntry::Vacant(slot) => {
            slot.insert(rule);
        }
        MapEntry::Occupied(mut slot) => {
            let incumbent = slot.get();
            let beats = (rule.exact && !incumbent.exact)
                || (rule.exact == incumbent.exact && rule.index > incumbent.index);
            if beats {
                slot.insert(rule);
            }
        }
    }
}

fn translate(winners: HashMap<PathBuf, ResolvedRule>) -> Result<ResolvedPolicy> {
    let mut rules: Vec<ResolvedRule> = winners.into_values().collect();
    rules.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.path.cmp(&b.path)));

    // (depth, path) keys let the synthetic parent dirs of excluded files sort
    // ahead of their children while everything else keeps rule order.
    let mut entries: Vec<(usize, PathBuf, Mount)> = Vec::new();
    let mut dir_guards: HashSet<PathBuf> = HashSet::new();
    let mut needs_empty_file = false;

    for rule in &rules {
        let dst = rule.path.to_string_lossy().into_owned();
        match rule.action {
            PolicyAction::ReadOnly => {
                let kind = if rule.use_try {
                    MountKind::RoBindTry
                } else {
                    MountKind::RoBind
                };
                entries.push((
                    rule.depth,
                    rule.path.clone(),
                    Mount {
                        kind,
                        src: dst.clone(),
                        dst,
                        perms: 0,
                        fd: 0,
                    },
                ));
            }
            PolicyAction::ReadWrite => {
                let kind = if rule.use_try {
                    MountKind::BindTry
                } else {
                    MountKind::Bind
                };
                entries.push((
                    rule.depth,
                    rule.path.clone(),
                    Mount {
                        kind,
                        src: dst.clone(),
                        dst,
                        perms: 0,
                        fd: 0,
                    },
                ));
            }
            PolicyAction::Exclude if rule.is_dir => {
                entries.push((rule.depth, rule.path.clone(), Mount::tmpfs(dst)));
            }
            PolicyAction::Exclude => {
                needs_empty_file = true;
                // Create the parent explicitly so bwrap does not auto-create
                // it while the zero-mode `--perms` is still in effect.
                if let Some(parent) = rule.path.parent()
                    && dir_guards.insert(parent.to_path_buf())
                {
                    entries.push((
                        paths::depth(parent)?,
                        parent.to_path_buf(),
                        Mount::dir(parent.to_string_lossy()),
                    ));
                }
                entries.push((rule.depth, rule.path.clone(), Mount::empty_data(dst)));
            }
        }
    }

    entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    Ok(ResolvedPolicy {
        mounts: entries.into_iter().map(|(_, _, mount)| mount).collect(),
        needs_empty_file,
    })
}
