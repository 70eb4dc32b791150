//! `.PKGINFO` parsing.
//!
//! The format is `key = value` lines with whitespace tolerated around the
//! `=` and the value; values end at the next whitespace. Unknown keys are
//! skipped so newer package tools stay loadable.

use anyhow::{Result, bail};

use super::PackageMeta;

/// Parse a `.PKGINFO` blob into `meta`.
///
/// May be called with a partially filled `meta` (the loader pre-seeds the
/// filename guess); `pkgname`/`pkgver` entries overwrite it.
pub fn parse_pkginfo(text: &str, meta: &mut PackageMeta) -> Result<()> {
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            bail!(".PKGINFO line {}: missing '='", lineno + 1);
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "pkgname" => meta.name = first_token(value),
            "pkgver" => meta.version = first_token(value),
            "depend" => meta.depends.push(first_token(value)),
            "optdepend" => {
                // the ": description" suffix is not part of the name
                let value = value.split(':').next().unwrap_or(value).trim();
                meta.optdepends.push(first_token(value));
            }
            "provides" => meta.provides.push(first_token(value)),
            "replaces" => meta.replaces.push(first_token(value)),
            "conflict" => meta.conflicts.push(first_token(value)),
            "group" => {
                meta.groups.insert(first_token(value));
            }
            _ => {}
        }
    }
    Ok(())
}

fn first_token(value: &str) -> String {
    value
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}
