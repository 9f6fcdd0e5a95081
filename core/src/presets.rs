use crate::environment::Environment;
use crate::error::Result;
use crate::git;
use crate::mount::Mount;

/// Lint configuration files protected read-only in the work directory, per
/// language preset. Relative names; the policy resolver anchors them to the
/// work directory.
const LINT_TS_FILES: &[&str] = &[
    "biome.json",
    "biome.jsonc",
    ".eslintrc",
    ".eslintrc.cjs",
    ".eslintrc.js",
    ".eslintrc.json",
    ".eslintrc.yaml",
    ".eslintrc.yml",
    "eslint.config.cjs",
    "eslint.config.js",
    "eslint.config.mjs",
    ".prettierrc",
    ".prettierrc.cjs",
    ".prettierrc.js",
    ".prettierrc.json",
    ".prettierrc.yaml",
    ".prettierrc.yml",
    "prettier.config.cjs",
    "prettier.config.js",
    "tsconfig.json",
];

const LINT_GO_FILES: &[&str] = &[
    ".golangci.json",
    ".golangci.toml",
    ".golangci.yaml",
    ".golangci.yml",
];

const LINT_PYTHON_FILES: &[&str] = &[
    "pyproject.toml",
    "ruff.toml",
    ".ruff.toml",
    ".flake8",
    "mypy.ini",
    ".mypy.ini",
    ".pylintrc",
    "pylintrc",
];

const CACHE_DIRS: &[&str] = &["~/.cache", "~/.bun", "~/go", "~/.npm", "~/.cargo"];

const AGENT_DIRS: &[&str] = &["~/.codex", "~/.claude", "~/.claude.json", "~/.pi"];

/// Which presets ended up enabled after toggle evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PresetSelection {
    pub base: bool,
    pub caches: bool,
    pub agents: bool,
    pub git: bool,
    pub git_strict: bool,
    pub lint_ts: bool,
    pub lint_go: bool,
    pub lint_python: bool,
}

impl PresetSelection {
    fn any_lint(self) -> bool {
        self.lint_ts || self.lint_go || self.lint_python
    }

    fn set(&mut self, preset: &str, enabled: bool) {
        match preset {
            "@base" => self.base = enabled,
            "@caches" => self.caches = enabled,
            "@agents" => self.agents = enabled,
            "@git" => self.git = enabled,
            "@git-strict" => self.git_strict = enabled,
            "@lint/ts" => self.lint_ts = enabled,
            "@lint/go" => self.lint_go = enabled,
            "@lint/python" => self.lint_python = enabled,
            _ => unreachable!("expansion only yields individual presets"),
        }
    }
}

/// Evaluate preset toggles. `None` means the default `[@all]`; an explicit
/// empty slice enables nothing. Later toggles win over earlier ones for each
/// individual preset. Returns a plain message on failure so the validator
/// can fold it into its joined report.
pub(crate) fn parse_selection(
    toggles: Option<&[String]>,
) -> std::result::Result<PresetSelection, String> {
    const DEFAULT: &[&str] = &["@all"];

    let mut selection = PresetSelection::default();
    let toggles: Vec<&str> = match toggles {
        None => DEFAULT.to_vec(),
        Some(toggles) => toggles.iter().map(String::as_str).collect(),
    };

    for toggle in toggles {
        let (name, enabled) = match toggle.strip_prefix('!') {
            Some(rest) => (rest, false),
            None => (toggle, true),
        };

        for preset in expand_macro(name).ok_or_else(|| format!("unknown preset {name:?}"))? {
            selection.set(preset, enabled);
        }
    }

    Ok(selection)
}

/// Expand macro presets to the individual presets they stand for.
fn expand_macro<'a>(name: &'a str) -> Option<Vec<&'a str>> {
    match name {
        "@all" => Some(vec![
            "@base",
            "@caches",
            "@agents",
            "@git",
            "@lint/ts",
            "@lint/go",
            "@lint/python",
        ]),
        "@lint/all" => Some(vec!["@lint/ts", "@lint/go", "@lint/python"]),
        "@base" | "@caches" | "@agents" | "@git" | "@git-strict" | "@lint/ts" | "@lint/go"
        | "@lint/python" => Some(vec![name]),
        _ => None,
    }
}

/// Expand the selected presets into policy mounts, in the fixed emission
/// order: base, caches, agents, git, lint (ts/go/python), editorconfig.
pub(crate) fn expand(selection: PresetSelection, env: &Environment) -> Result<Vec<Mount>> {
    let mut mounts = Vec::new();

    if selection.base {
        mounts.push(Mount::read_write(env.work_dir.to_string_lossy()));
        mounts.push(Mount::read_only(env.home_dir.to_string_lossy()));
        mounts.push(Mount::exclude_try("~/.ssh"));
        mounts.push(Mount::exclude_try("~/.gnupg"));
        mounts.push(Mount::exclude_try("~/.aws"));
    }

    if selection.caches {
        mounts.extend(CACHE_DIRS.iter().map(|dir| Mount::read_write_try(*dir)));
    }

    if selection.agents {
        mounts.extend(AGENT_DIRS.iter().map(|dir| Mount::read_write_try(*dir)));
    }

    if selection.git || selection.git_strict {
        mounts.extend(git::discover(&env.work_dir, selection.git_strict)?);
    }

    if selection.lint_ts {
        mounts.extend(LINT_TS_FILES.iter().map(|file| Mount::read_only_try(*file)));
    }
    if selection.lint_go {
        mounts.extend(LINT_GO_FILES.iter().map(|file| Mount::read_only_try(*file)));
    }
    if selection.lint_python {
        mounts.extend(
            LINT_PYTHON_FILES
                .iter()
                .map(|file| Mount::read_only_try(*file)),
        );
    }

    if selection.any_lint() {
        mounts.push(Mount::read_only_try(".editorconfig"));
    }

    Ok(mounts)
}
