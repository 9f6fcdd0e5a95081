use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

/// Discriminant for a [`Mount`] record. The universe is closed: policy kinds
/// are user-facing patterns resolved against the host filesystem, low-level
/// kinds map 1:1 onto bwrap directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum MountKind {
    // Policy kinds. `dst` is a pattern (absolute, relative, `~`, glob).
    ReadOnly,
    ReadOnlyTry,
    ReadWrite,
    ReadWriteTry,
    Exclude,
    ExcludeTry,
    ExcludeFile,
    ExcludeDir,

    // Low-level kinds. `dst` (and `src` where present) must be absolute.
    RoBind,
    RoBindTry,
    Bind,
    BindTry,
    Tmpfs,
    Dir,
    RoBindData,
}

impl MountKind {
    /// True for the user-facing pattern kinds consumed by the policy
    /// resolver.
    pub fn is_policy(self) -> bool {
        matches!(
            self,
            MountKind::ReadOnly
                | MountKind::ReadOnlyTry
                | MountKind::ReadWrite
                | MountKind::ReadWriteTry
                | MountKind::Exclude
                | MountKind::ExcludeTry
                | MountKind::ExcludeFile
                | MountKind::ExcludeDir
        )
    }

    /// True for kinds that tolerate a destination pattern matching nothing on
    /// the host.
    pub fn allows_missing(self) -> bool {
        matches!(
            self,
            MountKind::ReadOnlyTry
                | MountKind::ReadWriteTry
                | MountKind::ExcludeTry
                | MountKind::RoBindTry
                | MountKind::BindTry
        )
    }

    /// True for low-level kinds that carry a source path.
    pub fn has_src(self) -> bool {
        matches!(
            self,
            MountKind::RoBind | MountKind::RoBindTry | MountKind::Bind | MountKind::BindTry
        )
    }
}

/// A single mount record. Which fields may be set is determined by `kind`
/// and enforced by the validator before planning; a violation surfacing
/// later is an internal-error bug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub kind: MountKind,

    /// Source path for bind kinds. Must be empty everywhere else.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub src: String,

    /// Destination: a pattern for policy kinds, an absolute path for
    /// low-level kinds.
    pub dst: String,

    /// File mode, only meaningful for `Dir` (applied via a trailing chmod)
    /// and `RoBindData` (the `--perms` of the data file).
    #[serde(default)]
    pub perms: u32,

    /// Inherited file descriptor for `RoBindData`; must be positive there and
    /// zero everywhere else.
    #[serde(default)]
    pub fd: i32,
}

impl Mount {
    fn with_dst(kind: MountKind, dst: impl Into<String>) -> Self {
        Self {
            kind,
            src: String::new(),
            dst: dst.into(),
            perms: 0,
            fd: 0,
        }
    }

    pub fn read_only(dst: impl Into<String>) -> Self {
        Self::with_dst(MountKind::ReadOnly, dst)
    }

    pub fn read_only_try(dst: impl Into<String>) -> Self {
        Self::with_dst(MountKind::ReadOnlyTry, dst)
    }

    pub fn read_write(dst: impl Into<String>) -> Self {
        Self::with_dst(MountKind::ReadWrite, dst)
    }

    pub fn read_write_try(dst: impl Into<String>) -> Self {
        Self::with_dst(MountKind::ReadWriteTry, dst)
    }

    pub fn exclude(dst: impl Into<String>) -> Self {
        Self::with_dst(MountKind::Exclude, dst)
    }

    pub fn exclude_try(dst: impl Into<String>) -> Self {
        Self::with_dst(MountKind::ExcludeTry, dst)
    }

    pub fn exclude_file(dst: impl Into<String>) -> Self {
        Self::with_dst(MountKind::ExcludeFile, dst)
    }

    pub fn exclude_dir(dst: impl Into<String>) -> Self {
        Self::with_dst(MountKind::ExcludeDir, dst)
    }

    pub fn ro_bind(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            kind: MountKind::RoBind,
            src: src.into(),
            dst: dst.into(),
            perms: 0,
            fd: 0,
        }
    }

    pub fn bind(src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Bind,
            src: src.into(),
            dst: dst.into(),
            perms: 0,
            fd: 0,
        }
    }

    pub fn tmpfs(dst: impl Into<String>) -> Self {
        Self::with_dst(MountKind::Tmpfs, dst)
    }

    pub fn dir(dst: impl Into<String>) -> Self {
        Self::with_dst(MountKind::Dir, dst)
    }

    pub fn dir_with_perms(dst: impl Into<String>, perms: u32) -> Self {
        Self {
            kind: MountKind::Dir,
            src: String::new(),
            dst: dst.into(),
            perms,
            fd: 0,
        }
    }

    /// An empty-data exclusion mount. The concrete inherited fd is bound at
    /// command-build time; `fd == 0` marks the shared `/dev/null` slot.
    pub(crate) fn empty_data(dst: impl Into<String>) -> Self {
        Self {
            kind: MountKind::RoBindData,
            src: String::new(),
            dst: dst.into(),
            perms: 0,
            fd: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn kind_names_are_kebab_case() {
        assert_eq!(MountKind::ReadOnly.to_string(), "read-only");
        assert_eq!(MountKind::RoBindData.to_string(), "ro-bind-data");
    }

    #[test]
    fn mounts_round_trip_through_json() {
        let mount = Mount::ro_bind("/bin/true", "/usr/bin/rm");
        let json = serde_json::to_string(&mount).expect("serialize");
        assert_eq!(
            json,
            r#"{"kind":"ro-bind","src":"/bin/true","dst":"/usr/bin/rm","perms":0,"fd":0}"#
        );
        let back: Mount = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, mount);

        let sparse: Mount =
            serde_json::from_str(r#"{"kind":"exclude","dst":"~/.ssh"}"#).expect("deserialize");
        assert_eq!(sparse, Mount::exclude("~/.ssh"));
    }

    #[test]
    fn policy_classification() {
        assert!(MountKind::ExcludeTry.is_policy());
        assert!(!MountKind::Tmpfs.is_policy());
        assert!(MountKind::BindTry.allows_missing());
        assert!(!MountKind::Exclude.allows_missing());
    }
}
