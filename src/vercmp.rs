//! Package version ordering and dependency-expression matching.
//!
//! Implements the distribution's `epoch:pkgver-pkgrel` ordering: versions
//! are walked as alternating numeric and alphabetic segments, numeric
//! segments compare numerically, alphabetic ones lexically, and a numeric
//! segment always beats an alphabetic one. On tie the version with more
//! segments wins unless the extra segment is alphabetic (`1.0` > `1.0a`).

use std::cmp::Ordering;

use crate::package::PackageMeta;

/// Comparison operator carried by a dependency or provide expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl VerOp {
    fn matches(self, ord: Ordering) -> bool {
        match self {
            VerOp::Eq => ord == Ordering::Equal,
            VerOp::Ne => ord != Ordering::Equal,
            VerOp::Lt => ord == Ordering::Less,
            VerOp::Le => ord != Ordering::Greater,
            VerOp::Gt => ord == Ordering::Greater,
            VerOp::Ge => ord != Ordering::Less,
        }
    }
}

/// A parsed dependency expression: a name plus an optional version bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepSpec {
    pub name: String,
    pub constraint: Option<(VerOp, String)>,
}

/// Split `libfoo>=1.2` into its name and constraint parts.
///
/// An operator with no version after it is treated as an unversioned
/// dependency on the name.
pub fn split_depstring(full: &str) -> DepSpec {
    let Some(opidx) = full.find(['=', '<', '>', '!']) else {
        return DepSpec {
            name: full.to_string(),
            constraint: None,
        };
    };
    let name = full[..opidx].to_string();
    let rest = &full[opidx..];
    let (op, ver) = if let Some(v) = rest.strip_prefix("==") {
        (VerOp::Eq, v)
    } else if let Some(v) = rest.strip_prefix("!=") {
        (VerOp::Ne, v)
    } else if let Some(v) = rest.strip_prefix("<=") {
        (VerOp::Le, v)
    } else if let Some(v) = rest.strip_prefix(">=") {
        (VerOp::Ge, v)
    } else if let Some(v) = rest.strip_prefix('=') {
        (VerOp::Eq, v)
    } else if let Some(v) = rest.strip_prefix('<') {
        (VerOp::Lt, v)
    } else if let Some(v) = rest.strip_prefix('>') {
        (VerOp::Gt, v)
    } else {
        return DepSpec {
            name,
            constraint: None,
        };
    };
    if ver.is_empty() {
        return DepSpec {
            name,
            constraint: None,
        };
    }
    DepSpec {
        name,
        constraint: Some((op, ver.to_string())),
    }
}

/// Drop any version bound from a dependency expression, leaving the name.
pub fn strip_version(full: &str) -> &str {
    match full.find(['=', '<', '>', '!']) {
        Some(at) => &full[..at],
        None => full,
    }
}

fn parse_evr(s: &str) -> (&str, &str, Option<&str>) {
    let (epoch, rest) = match s.split_once(':') {
        Some((e, r)) if e.chars().all(|c| c.is_ascii_digit()) && !e.is_empty() => (e, r),
        _ => ("0", s),
    };
    match rest.rsplit_once('-') {
        Some((ver, rel)) => (epoch, ver, Some(rel)),
        None => (epoch, rest, None),
    }
}

fn numcmp(a: &[u8], b: &[u8]) -> Ordering {
    let strip = |s: &[u8]| -> usize { s.iter().take_while(|&&c| c == b'0').count() };
    let a = &a[strip(a)..];
    let b = &b[strip(b)..];
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn segcmp(a: &str, b: &str) -> Ordering {
    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    while !one.is_empty() || !two.is_empty() {
        while !one.is_empty() && !one[0].is_ascii_alphanumeric() {
            one = &one[1..];
        }
        while !two.is_empty() && !two[0].is_ascii_alphanumeric() {
            two = &two[1..];
        }
        if one.is_empty() || two.is_empty() {
            break;
        }

        let isnum = one[0].is_ascii_digit();
        let take = |s: &[u8]| -> usize {
            s.iter()
                .take_while(|c| {
                    if isnum {
                        c.is_ascii_digit()
                    } else {
                        c.is_ascii_alphabetic()
                    }
                })
                .count()
        };
        let n1 = take(one);
        let n2 = take(two);
        if n2 == 0 {
            // Segments are of different kinds; a numeric segment is newer
            // than an alphabetic one.
            return if isnum { Ordering::Greater } else { Ordering::Less };
        }

        let (s1, s2) = (&one[..n1], &two[..n2]);
        let ord = if isnum { numcmp(s1, s2) } else { s1.cmp(s2) };
        if ord != Ordering::Equal {
            return ord;
        }
        one = &one[n1..];
        two = &two[n2..];
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        // A remaining alphabetic tail loses against the shorter version.
        (true, false) => {
            if two[0].is_ascii_alphabetic() {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, _) => {
            if one[0].is_ascii_alphabetic() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    }
}

/// Compare two full version strings (`epoch:pkgver-pkgrel`).
pub fn vercmp(a: &str, b: &str) -> Ordering {
    let (ea, va, ra) = parse_evr(a);
    let (eb, vb, rb) = parse_evr(b);
    numcmp(ea.as_bytes(), eb.as_bytes())
        .then_with(|| segcmp(va, vb))
        .then_with(|| match (ra, rb) {
            (Some(ra), Some(rb)) => segcmp(ra, rb),
            _ => Ordering::Equal,
        })
}

/// Whether `version <op> want` holds.
pub fn version_op(op: VerOp, version: &str, want: &str) -> bool {
    op.matches(vercmp(version, want))
}

/// Whether a provide recorded as `(pop, pver)` guarantees that a dependency
/// `(dop, dver)` is satisfied.
pub fn version_satisfies(dop: VerOp, dver: &str, pop: VerOp, pver: &str) -> bool {
    let ret = vercmp(dver, pver);
    if dop == pop {
        return match dop {
            VerOp::Eq => ret == Ordering::Equal,
            VerOp::Ne => ret != Ordering::Equal,
            // depending on >= A with a provide >= B: satisfied when A < B
            VerOp::Ge => ret == Ordering::Less,
            VerOp::Gt => ret != Ordering::Greater,
            VerOp::Le => ret == Ordering::Greater,
            VerOp::Lt => ret != Ordering::Less,
        };
    }
    match dop {
        // An exact dependency can never be met by a non-exact provide.
        VerOp::Eq => false,
        VerOp::Ne => match pop {
            VerOp::Eq => ret != Ordering::Equal,
            VerOp::Gt => ret == Ordering::Greater,
            VerOp::Ge => ret != Ordering::Less,
            VerOp::Lt => ret == Ordering::Less,
            VerOp::Le => ret != Ordering::Greater,
            VerOp::Ne => false,
        },
        VerOp::Ge => match pop {
            VerOp::Eq | VerOp::Gt | VerOp::Ge => ret == Ordering::Less,
            _ => false,
        },
        VerOp::Gt => match pop {
            VerOp::Eq | VerOp::Gt | VerOp::Ge => ret != Ordering::Greater,
            _ => false,
        },
        VerOp::Le => match pop {
            VerOp::Eq | VerOp::Lt | VerOp::Le => ret == Ordering::Greater,
            _ => false,
        },
        VerOp::Lt => match pop {
            VerOp::Eq | VerOp::Lt | VerOp::Le => ret != Ordering::Less,
            _ => false,
        },
    }
}

/// Whether `pkg` satisfies a dependency expression, either directly by
/// its own version or through a provide matching the dependency name
/// whose recorded constraint guarantees it.
pub fn package_satisfies(pkg: &PackageMeta, dep: &DepSpec) -> bool {
    let Some((op, ver)) = &dep.constraint else {
        return true;
    };
    if version_op(*op, &pkg.version, ver) {
        return true;
    }
    for prov in &pkg.provides {
        let pspec = split_depstring(prov);
        if pspec.name != dep.name {
            continue;
        }
        if let Some((pop, pver)) = &pspec.constraint
            && version_satisfies(*op, ver, *pop, pver)
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(a: &str, b: &str) -> Ordering {
        vercmp(a, b)
    }

    #[test]
    fn test_vercmp_basic() {
        assert_eq!(cmp("1.0", "1.0"), Ordering::Equal);
        assert_eq!(cmp("1.0", "1.1"), Ordering::Less);
        assert_eq!(cmp("1.10", "1.9"), Ordering::Greater);
        assert_eq!(cmp("2", "1.9.9"), Ordering::Greater);
    }

    #[test]
    fn test_vercmp_leading_zeroes() {
        assert_eq!(cmp("1.001", "1.1"), Ordering::Equal);
        assert_eq!(cmp("1.02", "1.1"), Ordering::Greater);
    }

    #[test]
    fn test_vercmp_alpha_vs_numeric() {
        // an alphabetic tail is older than the bare version
        assert_eq!(cmp("1.0a", "1.0"), Ordering::Less);
        assert_eq!(cmp("1.0", "1.0a"), Ordering::Greater);
        // numeric segments beat alphabetic ones
        assert_eq!(cmp("1.0.1", "1.0a"), Ordering::Greater);
        assert_eq!(cmp("1.0rc1", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn test_vercmp_alpha_segments() {
        assert_eq!(cmp("1.0a", "1.0b"), Ordering::Less);
        assert_eq!(cmp("1.0rc1", "1.0rc2"), Ordering::Less);
    }

    #[test]
    fn test_vercmp_separators_are_soft() {
        assert_eq!(cmp("1.0.1", "1_0_1"), Ordering::Equal);
        assert_eq!(cmp("1..0", "1.0"), Ordering::Equal);
    }

    #[test]
    fn test_vercmp_epoch_dominates() {
        assert_eq!(cmp("1:0.5", "2.0"), Ordering::Greater);
        assert_eq!(cmp("0:2.0", "2.0"), Ordering::Equal);
        assert_eq!(cmp("2:1.0", "1:9.9"), Ordering::Greater);
    }

    #[test]
    fn test_vercmp_pkgrel() {
        assert_eq!(cmp("1.0-1", "1.0-2"), Ordering::Less);
        assert_eq!(cmp("1.0-2", "1.0-2"), Ordering::Equal);
        // a missing release compares equal to any release
        assert_eq!(cmp("1.0", "1.0-5"), Ordering::Equal);
    }

    #[test]
    fn test_split_depstring() {
        assert_eq!(
            split_depstring("glibc"),
            DepSpec {
                name: "glibc".into(),
                constraint: None
            }
        );
        assert_eq!(
            split_depstring("glibc>=2.33"),
            DepSpec {
                name: "glibc".into(),
                constraint: Some((VerOp::Ge, "2.33".into()))
            }
        );
        assert_eq!(
            split_depstring("foo=1.0"),
            DepSpec {
                name: "foo".into(),
                constraint: Some((VerOp::Eq, "1.0".into()))
            }
        );
        assert_eq!(
            split_depstring("foo!=2"),
            DepSpec {
                name: "foo".into(),
                constraint: Some((VerOp::Ne, "2".into()))
            }
        );
        // trailing operator without a version degrades to a plain name
        assert_eq!(
            split_depstring("foo>="),
            DepSpec {
                name: "foo".into(),
                constraint: None
            }
        );
    }

    #[test]
    fn test_strip_version() {
        assert_eq!(strip_version("glibc>=2.33"), "glibc");
        assert_eq!(strip_version("glibc"), "glibc");
        assert_eq!(strip_version("a!=1"), "a");
    }

    #[test]
    fn test_version_op() {
        assert!(version_op(VerOp::Ge, "2.35", "2.33"));
        assert!(!version_op(VerOp::Lt, "2.35", "2.33"));
        assert!(version_op(VerOp::Eq, "1.0-1", "1.0-1"));
    }

    #[test]
    fn test_version_satisfies_same_op() {
        // dep >=2, provide >=3: everything the provide allows is >=2
        assert!(version_satisfies(VerOp::Ge, "2", VerOp::Ge, "3"));
        assert!(!version_satisfies(VerOp::Ge, "3", VerOp::Ge, "2"));
        assert!(version_satisfies(VerOp::Eq, "1.0", VerOp::Eq, "1.0"));
        assert!(!version_satisfies(VerOp::Eq, "1.0", VerOp::Eq, "1.1"));
    }

    #[test]
    fn test_version_satisfies_exact_needs_exact() {
        assert!(!version_satisfies(VerOp::Eq, "1.0", VerOp::Ge, "1.0"));
        assert!(!version_satisfies(VerOp::Eq, "1.0", VerOp::Lt, "2.0"));
    }

    #[test]
    fn test_version_satisfies_cross_ops() {
        // dep >=2 against provide =3
        assert!(version_satisfies(VerOp::Ge, "2", VerOp::Eq, "3"));
        // dep >2 against provide =2 fails
        assert!(!version_satisfies(VerOp::Gt, "2", VerOp::Eq, "2"));
        // dep <=2 against provide <1
        assert!(version_satisfies(VerOp::Le, "2", VerOp::Lt, "1"));
        // dep != 2 against provide =3
        assert!(version_satisfies(VerOp::Ne, "2", VerOp::Eq, "3"));
        assert!(!version_satisfies(VerOp::Ne, "2", VerOp::Eq, "2"));
    }

    #[test]
    fn test_package_satisfies_by_own_version() {
        let pkg = PackageMeta {
            name: "glibc".into(),
            version: "2.38-3".into(),
            ..Default::default()
        };
        assert!(package_satisfies(&pkg, &split_depstring("glibc>=2.0")));
        assert!(!package_satisfies(&pkg, &split_depstring("glibc<2.0")));
        assert!(package_satisfies(&pkg, &split_depstring("glibc")));
    }

    #[test]
    fn test_package_satisfies_via_provide() {
        let pkg = PackageMeta {
            name: "openssl".into(),
            version: "3.1-1".into(),
            provides: vec!["libcrypto.so=3".into()],
            ..Default::default()
        };
        assert!(package_satisfies(
            &pkg,
            &split_depstring("libcrypto.so=3")
        ));
        assert!(!package_satisfies(
            &pkg,
            &split_depstring("libcrypto.so=4")
        ));
        // an unversioned provide cannot guarantee a versioned dependency
        let bare = PackageMeta {
            name: "openssl".into(),
            version: "3.1-1".into(),
            provides: vec!["libcrypto.so".into()],
            ..Default::default()
        };
        assert!(!package_satisfies(
            &bare,
            &split_depstring("libcrypto.so=3")
        ));
    }
}
