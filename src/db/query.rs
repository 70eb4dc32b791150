//! Read-side predicates used by the listing commands.

use crate::filter::{ObjectFilter, all_object};

use super::{Db, InstalledPackage, Object};

impl Db {
    /// An object is broken if any of its sonames stayed unresolved.
    pub fn is_broken(&self, obj: &Object) -> bool {
        !obj.req_missing.is_empty()
    }

    /// A package is broken if any of its objects is.
    pub fn is_pkg_broken(&self, pkg: &InstalledPackage) -> bool {
        pkg.objects
            .iter()
            .any(|id| self.is_broken(self.object(*id)))
    }

    /// A package is empty when no object survives the given filters.
    pub fn is_pkg_empty(&self, pkg: &InstalledPackage, filters: &[ObjectFilter]) -> bool {
        !pkg
            .objects
            .iter()
            .any(|id| all_object(filters, &self.object(*id).elf))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::pkg_with;
    use super::*;
    use crate::elf::test_elf;

    #[test]
    fn test_broken_predicates() {
        let mut db = Db::new("t");
        let mut needs = test_elf("/usr/lib", "libbar.so");
        needs.needed.push("libmissing.so".into());
        db.install_package(pkg_with("a", vec![test_elf("/usr/lib", "libfoo.so")]));
        db.install_package(pkg_with("b", vec![needs]));

        let a = db.find_pkg("a").unwrap();
        let b = db.find_pkg("b").unwrap();
        assert!(!db.is_pkg_broken(a));
        assert!(db.is_pkg_broken(b));
    }

    #[test]
    fn test_empty_under_filters() {
        let mut db = Db::new("t");
        db.install_package(pkg_with("a", vec![test_elf("/usr/lib", "libfoo.so")]));
        let a = db.find_pkg("a").unwrap();
        assert!(!db.is_pkg_empty(a, &[]));
        assert!(db.is_pkg_empty(a, &[ObjectFilter::parse("libbar*")]));
    }
}
