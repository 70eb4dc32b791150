//! Listing filters: restrict queries and the integrity check to packages,
//! objects, or file paths matching shell-style patterns.

use crate::elf::Elf;
use crate::package::PackageMeta;

/// A literal or glob pattern, parsed from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Exact(String),
    Glob(String),
}

impl Pattern {
    /// `!` prefix negates; glob metacharacters select glob matching.
    fn parse(s: &str) -> (Self, bool) {
        let (negate, body) = match s.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let pattern = if body.contains(['*', '?', '[']) {
            Pattern::Glob(body.to_string())
        } else {
            Pattern::Exact(body.to_string())
        };
        (pattern, negate)
    }

    fn matches(&self, s: &str) -> bool {
        match self {
            Pattern::Exact(p) => p == s,
            Pattern::Glob(p) => match_glob(p, s),
        }
    }
}

/// Filter over package names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFilter {
    pattern: Pattern,
    negate: bool,
}

impl PackageFilter {
    pub fn parse(s: &str) -> Self {
        let (pattern, negate) = Pattern::parse(s);
        PackageFilter { pattern, negate }
    }

    pub fn visible(&self, meta: &PackageMeta) -> bool {
        self.pattern.matches(&meta.name) != self.negate
    }
}

/// Filter over objects; patterns containing `/` match the full path,
/// anything else matches the basename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFilter {
    pattern: Pattern,
    negate: bool,
    full_path: bool,
}

impl ObjectFilter {
    pub fn parse(s: &str) -> Self {
        let (pattern, negate) = Pattern::parse(s);
        let full_path = match &pattern {
            Pattern::Exact(p) | Pattern::Glob(p) => p.contains('/'),
        };
        ObjectFilter {
            pattern,
            negate,
            full_path,
        }
    }

    pub fn visible(&self, elf: &Elf) -> bool {
        let hit = if self.full_path {
            self.pattern.matches(&elf.path())
        } else {
            self.pattern.matches(&elf.basename)
        };
        hit != self.negate
    }
}

/// Filter over plain strings (file lists).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringFilter {
    pattern: Pattern,
    negate: bool,
}

impl StringFilter {
    pub fn parse(s: &str) -> Self {
        let (pattern, negate) = Pattern::parse(s);
        StringFilter { pattern, negate }
    }

    pub fn visible(&self, s: &str) -> bool {
        self.pattern.matches(s) != self.negate
    }
}

/// All filters must accept; an empty list accepts everything.
pub fn all_package(filters: &[PackageFilter], meta: &PackageMeta) -> bool {
    filters.iter().all(|f| f.visible(meta))
}

pub fn all_object(filters: &[ObjectFilter], elf: &Elf) -> bool {
    filters.iter().all(|f| f.visible(elf))
}

pub fn all_string(filters: &[StringFilter], s: &str) -> bool {
    filters.iter().all(|f| f.visible(s))
}

/// Shell-style glob match supporting `*`, `?` and `[...]` groups with
/// ranges and `^` negation. A `]` directly after the opening bracket is
/// group content, and an unterminated group matches a literal `[`.
pub fn match_glob(glob: &str, s: &str) -> bool {
    glob_at(glob.as_bytes(), 0, s.as_bytes(), 0)
}

/// Byte range of a group's content plus its closing bracket position.
fn parse_group(glob: &[u8], open: usize) -> Option<(usize, usize, bool, usize)> {
    let mut g = open + 1;
    let mut from = g;
    let neg = g < glob.len() && glob[g] == b'^';
    if neg {
        from += 1;
    }
    if g < glob.len() && glob[g] == b']' {
        g += 1;
    }
    while g < glob.len() && glob[g] != b']' {
        g += 1;
    }
    if g >= glob.len() {
        return None;
    }
    Some((from, g - 1, neg, g))
}

fn matches_group(glob: &[u8], from: usize, to: usize, neg: bool, c: u8) -> bool {
    if from > to {
        return neg;
    }
    let mut f = from;
    while f <= to {
        if f > from && f < to && glob[f] == b'-' {
            if c >= glob[f - 1] && c <= glob[f + 1] {
                return !neg;
            }
            f += 2;
            continue;
        }
        if c == glob[f] {
            return !neg;
        }
        f += 1;
    }
    neg
}

fn glob_at(glob: &[u8], g: usize, s: &[u8], at: usize) -> bool {
    if g >= glob.len() {
        // nothing left to match; succeed iff the string is consumed too
        return at >= s.len();
    }
    if at >= s.len() {
        if glob[g] == b'*' {
            return glob_at(glob, g + 1, s, at);
        }
        return false;
    }
    match glob[g] {
        b'?' => glob_at(glob, g + 1, s, at + 1),
        b'[' => match parse_group(glob, g) {
            None => {
                // syntax error: the bracket is a literal
                s[at] == b'[' && glob_at(glob, g + 1, s, at + 1)
            }
            Some((from, to, neg, close)) => {
                matches_group(glob, from, to, neg, s[at])
                    && glob_at(glob, close + 1, s, at + 1)
            }
        },
        b'*' => {
            let mut g = g;
            while g < glob.len() && (glob[g] == b'*' || glob[g] == b'?') {
                g += 1;
            }
            if g >= glob.len() {
                // trailing wildcards gobble the rest
                return true;
            }
            let group = if glob[g] == b'[' {
                parse_group(glob, g)
            } else {
                None
            };
            let mut at = at;
            while at < s.len() {
                let here = match group {
                    Some((from, to, neg, _)) => matches_group(glob, from, to, neg, s[at]),
                    None => s[at] == glob[g],
                };
                if here {
                    let next_g = match group {
                        Some((_, _, _, close)) => close + 1,
                        None => g + 1,
                    };
                    if glob_at(glob, next_g, s, at + 1) {
                        return true;
                    }
                }
                at += 1;
            }
            false
        }
        c => c == s[at] && glob_at(glob, g + 1, s, at + 1),
    }
}
