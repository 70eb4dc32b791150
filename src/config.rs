//! Configuration file handling.
//!
//! `$HOME/.elfdepdb/config` is consulted first, then `/etc/elfdepdb.conf`;
//! the first file that exists wins. Command-line flags override anything
//! set here.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use log::warn;

/// Settings read from the config file, all optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub database: Option<PathBuf>,
    pub verbosity: Option<u8>,
    pub quiet: Option<bool>,
    pub json: Option<bool>,
    pub max_jobs: Option<usize>,
}

impl Config {
    /// Parse `key = value` lines. `#`, `;` and `/` start comment lines;
    /// unknown keys and unparsable values are warned about and skipped.
    pub fn parse(text: &str, origin: &str) -> Config {
        let mut config = Config::default();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(['#', ';', '/']) {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!("{}:{}: invalid config entry", origin, lineno + 1);
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "database" => config.database = Some(PathBuf::from(value)),
                "verbosity" => match value.parse() {
                    Ok(v) => config.verbosity = Some(v),
                    Err(_) => warn!("{}:{}: invalid verbosity", origin, lineno + 1),
                },
                "quiet" => config.quiet = Some(str2bool(value)),
                "json" => config.json = Some(str2bool(value)),
                "max_jobs" => match value.parse() {
                    Ok(v) => config.max_jobs = Some(v),
                    Err(_) => warn!("{}:{}: invalid max_jobs", origin, lineno + 1),
                },
                _ => warn!("{}:{}: unknown config entry: {}", origin, lineno + 1, key),
            }
        }
        config
    }

    /// Read the first config file that exists. No file at all is fine.
    pub fn load() -> Result<Config> {
        for path in Self::candidate_paths() {
            match fs::read_to_string(&path) {
                Ok(text) => return Ok(Config::parse(&text, &path.to_string_lossy())),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(Config::default())
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".elfdepdb/config"));
        }
        paths.push(PathBuf::from("/etc/elfdepdb.conf"));
        paths
    }
}

fn str2bool(s: &str) -> bool {
    matches!(s, "true" | "TRUE" | "True" | "1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_keys() {
        let config = Config::parse(
            "database = /var/lib/pkgs.db.gz\n\
             verbosity = 2\n\
             quiet = true\n\
             json = 1\n\
             max_jobs = 4\n",
            "test",
        );
        assert_eq!(config.database, Some(PathBuf::from("/var/lib/pkgs.db.gz")));
        assert_eq!(config.verbosity, Some(2));
        assert_eq!(config.quiet, Some(true));
        assert_eq!(config.json, Some(true));
        assert_eq!(config.max_jobs, Some(4));
    }

    #[test]
    fn test_parse_comments_and_blanks() {
        let config = Config::parse(
            "# a comment\n; another\n/ and this\n\nquiet = false\n",
            "test",
        );
        assert_eq!(config.quiet, Some(false));
        assert_eq!(config.database, None);
    }

    #[test]
    fn test_parse_bad_entries_are_skipped() {
        let config = Config::parse(
            "no equals sign\nverbosity = many\nmax_jobs = -1\nunknown = 1\n",
            "test",
        );
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_str2bool() {
        assert!(str2bool("true"));
        assert!(str2bool("TRUE"));
        assert!(str2bool("1"));
        assert!(!str2bool("yes"));
        assert!(!str2bool("0"));
    }
}
