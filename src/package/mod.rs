//! Packages as the loader produces them and the database consumes them.

mod loader;
mod pkginfo;

pub use loader::load_package;
pub use pkginfo::parse_pkginfo;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::elf::Elf;
use crate::vercmp::strip_version;

/// Package metadata: everything about a package except its ELF objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMeta {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub optdepends: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub replaces: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub filelist: Vec<String>,
}

impl PackageMeta {
    /// Whether this package declares a conflict with `other` by name.
    pub fn conflicts_with(&self, other: &PackageMeta) -> bool {
        self.conflicts
            .iter()
            .any(|c| strip_version(c) == other.name)
    }

    pub fn has_depend_fields(&self) -> bool {
        !self.depends.is_empty()
            || !self.optdepends.is_empty()
            || !self.provides.is_empty()
            || !self.replaces.is_empty()
            || !self.conflicts.is_empty()
    }
}

/// A package as produced by the loader, ready to be installed into a
/// database. Ownership of the objects transfers to the database on
/// install.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub meta: PackageMeta,
    pub objects: Vec<Elf>,
}

/// Guess `(name, version)` from a package archive filename.
///
/// Understands the Arch scheme `${name}-${ver}-${rel}-${arch}.pkg.tar.*`
/// and the Slackware scheme `${name}-${ver}-${arch}-${build}.t{gz,bz2,xz}`.
/// The name is every leading `-`-separated token not beginning with a
/// digit; the version keeps its release or build suffix.
pub fn guess_name_version(filename: &str) -> Option<(String, String)> {
    let base = filename.rsplit('/').next().unwrap_or(filename);

    let stem = if let Some(at) = base.find(".pkg.tar") {
        &base[..at]
    } else if let Some(s) = [".tgz", ".tbz2", ".txz"]
        .iter()
        .find_map(|ext| base.strip_suffix(ext))
    {
        s
    } else {
        return None;
    };

    let tokens: Vec<&str> = stem.split('-').collect();
    let veridx = tokens
        .iter()
        .position(|t| t.starts_with(|c: char| c.is_ascii_digit()))?;
    if veridx == 0 {
        return None;
    }

    let name = tokens[..veridx].join("-");
    let mut version = tokens[veridx].to_string();
    if let Some(next) = tokens.get(veridx + 1) {
        if next.starts_with(|c: char| c.is_ascii_digit()) {
            // Arch: the token after the version is the release.
            version.push('-');
            version.push_str(next);
        } else if let Some(build) = tokens.last()
            && veridx + 1 < tokens.len() - 1
        {
            // Slackware: the build number trails the arch.
            version.push('-');
            version.push_str(build);
        }
    }
    Some((name, version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_arch_scheme() {
        assert_eq!(
            guess_name_version("zlib-1.2.13-2-x86_64.pkg.tar.zst"),
            Some(("zlib".into(), "1.2.13-2".into()))
        );
        assert_eq!(
            guess_name_version("gcc-libs-13.2.1-3-x86_64.pkg.tar.gz"),
            Some(("gcc-libs".into(), "13.2.1-3".into()))
        );
    }

    #[test]
    fn test_guess_slackware_scheme() {
        assert_eq!(
            guess_name_version("xz-5.4.4-x86_64-1.tgz"),
            Some(("xz".into(), "5.4.4-1".into()))
        );
        assert_eq!(
            guess_name_version("util-linux-2.39-i586-2.txz"),
            Some(("util-linux".into(), "2.39-2".into()))
        );
    }

    #[test]
    fn test_guess_with_leading_path() {
        assert_eq!(
            guess_name_version("/srv/pkgs/zlib-1.3-1-x86_64.pkg.tar.xz"),
            Some(("zlib".into(), "1.3-1".into()))
        );
    }

    #[test]
    fn test_guess_rejects_unknown_extension() {
        assert_eq!(guess_name_version("zlib-1.3.tar.gz"), None);
        assert_eq!(guess_name_version("README"), None);
    }

    #[test]
    fn test_guess_rejects_versionless() {
        assert_eq!(guess_name_version("nameonly.pkg.tar.gz"), None);
        assert_eq!(guess_name_version("1.0-2-x86_64.pkg.tar.gz"), None);
    }

    #[test]
    fn test_guess_name_tokens_with_embedded_digits() {
        assert_eq!(
            guess_name_version("libfoo2-1.0-1-x86_64.pkg.tar.gz"),
            Some(("libfoo2".into(), "1.0-1".into()))
        );
    }

    #[test]
    fn test_conflicts_with() {
        let a = PackageMeta {
            name: "a".into(),
            conflicts: vec!["b>=2".into()],
            ..Default::default()
        };
        let b = PackageMeta {
            name: "b".into(),
            ..Default::default()
        };
        assert!(a.conflicts_with(&b));
        assert!(!b.conflicts_with(&a));
    }
}
