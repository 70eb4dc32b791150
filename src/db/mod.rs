//! The dependency database: installed packages, their ELF objects, and
//! the rule stores steering resolution.

mod integrity;
mod json;
mod query;
mod resolver;
mod store;

pub use integrity::Finding;
pub use json::{JsonObject, JsonPackage, json_db_info, json_objects, json_packages};
pub use store::{load_db, save_db};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;

use crate::elf::Elf;
use crate::package::{Package, PackageMeta};
use crate::paths::fixpath;

/// Stable handle of one object in the database pool.
///
/// Ids are handed out monotonically and never reused, so ordering ids
/// numerically reproduces database insertion order.
pub type ObjectId = u64;

/// One ELF object as installed in the database.
#[derive(Debug, Clone)]
pub struct Object {
    pub elf: Elf,
    /// Name of the owning package. Always present in the package list.
    pub owner: String,
    /// Objects this one links against, by id.
    pub req_found: BTreeSet<ObjectId>,
    /// Sonames this object needs but cannot resolve.
    pub req_missing: BTreeSet<String>,
}

/// An installed package: its metadata plus the ids of its objects.
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub meta: PackageMeta,
    pub objects: Vec<ObjectId>,
}

/// The database itself.
///
/// The package list and the flat object list are insertion-ordered and
/// that order is user-visible; the resolver's deterministic tiebreak is
/// the flat list order.
pub struct Db {
    pub name: String,
    pub loaded_version: u32,
    pub strict_linking: bool,

    pub contains_package_depends: bool,
    pub contains_groups: bool,
    pub contains_filelists: bool,

    packages: Vec<InstalledPackage>,
    objects: Vec<ObjectId>,
    pool: HashMap<ObjectId, Object>,
    next_id: ObjectId,

    library_path: Vec<String>,
    package_library_path: BTreeMap<String, Vec<String>>,
    ignore_file_rules: BTreeSet<String>,
    assume_found_rules: BTreeSet<String>,
    base_packages: BTreeSet<String>,
}

impl Db {
    pub fn new(name: &str) -> Self {
        Db {
            name: name.to_string(),
            loaded_version: store::CURRENT_VERSION,
            strict_linking: false,
            contains_package_depends: false,
            contains_groups: false,
            contains_filelists: false,
            packages: Vec::new(),
            objects: Vec::new(),
            pool: HashMap::new(),
            next_id: 0,
            library_path: Vec::new(),
            package_library_path: BTreeMap::new(),
            ignore_file_rules: BTreeSet::new(),
            assume_found_rules: BTreeSet::new(),
            base_packages: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.objects.is_empty()
    }

    pub fn packages(&self) -> &[InstalledPackage] {
        &self.packages
    }

    /// Flat object list in insertion order.
    pub fn object_ids(&self) -> &[ObjectId] {
        &self.objects
    }

    pub fn object(&self, id: ObjectId) -> &Object {
        &self.pool[&id]
    }

    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.objects.iter().map(|id| &self.pool[id])
    }

    pub fn find_pkg(&self, name: &str) -> Option<&InstalledPackage> {
        self.packages.iter().find(|p| p.meta.name == name)
    }

    pub fn library_path(&self) -> &[String] {
        &self.library_path
    }

    pub fn package_library_path(&self) -> &BTreeMap<String, Vec<String>> {
        &self.package_library_path
    }

    pub fn ignore_file_rules(&self) -> &BTreeSet<String> {
        &self.ignore_file_rules
    }

    pub fn assume_found_rules(&self) -> &BTreeSet<String> {
        &self.assume_found_rules
    }

    pub fn base_packages(&self) -> &BTreeSet<String> {
        &self.base_packages
    }

    fn pkg_libpath(&self, pkg_name: &str) -> Option<&Vec<String>> {
        if self.package_library_path.is_empty() {
            return None;
        }
        self.package_library_path.get(pkg_name)
    }

    /// Install `pkg`, replacing any already-installed package of the same
    /// name. New objects are linked both ways: against the whole database
    /// (including each other) and as fresh candidates for every existing
    /// object's unresolved sonames.
    pub fn install_package(&mut self, pkg: Package) -> bool {
        if !self.delete_package(&pkg.meta.name) {
            return false;
        }

        if pkg.meta.has_depend_fields() {
            self.contains_package_depends = true;
        }
        if !pkg.meta.groups.is_empty() {
            self.contains_groups = true;
        }
        if !pkg.meta.filelist.is_empty() {
            self.contains_filelists = true;
        }

        let owner = pkg.meta.name.clone();
        let mut entry = InstalledPackage {
            meta: pkg.meta,
            objects: Vec::with_capacity(pkg.objects.len()),
        };

        // All objects enter the pool before any is linked, so the new
        // package's objects can resolve against one another.
        let mut new_ids = Vec::with_capacity(pkg.objects.len());
        for elf in pkg.objects {
            let id = self.next_id;
            self.next_id += 1;
            self.pool.insert(
                id,
                Object {
                    elf,
                    owner: owner.clone(),
                    req_found: BTreeSet::new(),
                    req_missing: BTreeSet::new(),
                },
            );
            entry.objects.push(id);
            self.objects.push(id);
            new_ids.push(id);
        }
        self.packages.push(entry);

        for &id in &new_ids {
            let (found, missing) = self.link_object(id);
            let obj = self.pool.get_mut(&id).expect("pool entry just inserted");
            obj.req_found = found;
            obj.req_missing = missing;
        }

        // Reverse pass: the new objects may fill holes in anyone's
        // resolution.
        let seekers: Vec<ObjectId> = self.objects.clone();
        for seeker_id in seekers {
            let mut fulfilled: Vec<(ObjectId, String)> = Vec::new();
            {
                let seeker = &self.pool[&seeker_id];
                let extra = self.pkg_libpath(&seeker.owner);
                for &new_id in &new_ids {
                    let newobj = &self.pool[&new_id];
                    if !seeker.elf.can_use(&newobj.elf, self.strict_linking) {
                        continue;
                    }
                    if !seeker.req_missing.contains(&newobj.elf.basename) {
                        continue;
                    }
                    if self.finds(&seeker.elf, &newobj.elf.dirname, extra) {
                        fulfilled.push((new_id, newobj.elf.basename.clone()));
                    }
                }
            }
            if !fulfilled.is_empty() {
                let seeker = self.pool.get_mut(&seeker_id).expect("seeker in pool");
                for (new_id, basename) in fulfilled {
                    // only the first candidate per soname wins
                    if seeker.req_missing.remove(&basename) {
                        seeker.req_found.insert(new_id);
                    }
                }
            }
        }
        true
    }

    /// Remove a package by name. Every remaining object that linked
    /// against one of its objects gets a replacement lookup; failing
    /// that, the soname goes back to `req_missing`. Removing a package
    /// that is not installed succeeds as a no-op.
    pub fn delete_package(&mut self, name: &str) -> bool {
        let Some(idx) = self.packages.iter().position(|p| p.meta.name == name) else {
            return true;
        };
        let dead = self.packages.remove(idx);

        let dead_ids: BTreeSet<ObjectId> = dead.objects.iter().copied().collect();
        self.objects.retain(|id| !dead_ids.contains(id));
        let dead_objs: Vec<(ObjectId, Object)> = dead
            .objects
            .iter()
            .map(|id| (*id, self.pool.remove(id).expect("owned object in pool")))
            .collect();

        let seekers: Vec<ObjectId> = self.objects.clone();
        for seeker_id in seekers {
            for (dead_id, dead_obj) in &dead_objs {
                if !self.pool[&seeker_id].req_found.contains(dead_id) {
                    continue;
                }
                self.pool
                    .get_mut(&seeker_id)
                    .expect("seeker in pool")
                    .req_found
                    .remove(dead_id);

                let replacement = {
                    let seeker = &self.pool[&seeker_id];
                    let extra = self.pkg_libpath(&seeker.owner);
                    self.find_for(&seeker.elf, &dead_obj.elf.basename, extra)
                };
                let seeker = self.pool.get_mut(&seeker_id).expect("seeker in pool");
                match replacement {
                    Some(other) => {
                        seeker.req_found.insert(other);
                    }
                    None => {
                        seeker.req_missing.insert(dead_obj.elf.basename.clone());
                    }
                }
            }
        }

        // Sweep objects whose owning package is gone (stale entries from
        // older database files).
        let orphans: Vec<ObjectId> = self
            .objects
            .iter()
            .copied()
            .filter(|id| self.find_pkg(&self.pool[id].owner).is_none())
            .collect();
        if !orphans.is_empty() {
            debug!("dropping {} ownerless objects", orphans.len());
            self.objects.retain(|id| !orphans.contains(id));
            for id in orphans {
                self.pool.remove(&id);
            }
        }
        true
    }

    /// Drop all packages and objects. Rule stores survive.
    pub fn wipe_packages(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.packages.clear();
        self.objects.clear();
        self.pool.clear();
        true
    }

    /// Drop every package's file list.
    pub fn wipe_filelists(&mut self) -> bool {
        let mut had = self.contains_filelists;
        for pkg in &mut self.packages {
            if !pkg.meta.filelist.is_empty() {
                pkg.meta.filelist.clear();
                had = true;
            }
        }
        self.contains_filelists = false;
        had
    }

    // ---- rule stores --------------------------------------------------

    /// Append to the global library path.
    pub fn ld_append(&mut self, dir: &str) -> bool {
        self.ld_insert(dir, self.library_path.len())
    }

    /// Prepend to the global library path.
    pub fn ld_prepend(&mut self, dir: &str) -> bool {
        self.ld_insert(dir, 0)
    }

    /// Insert `dir` at index `at`. Inserting a path that already exists
    /// elsewhere moves it; re-inserting at its current index is a no-op
    /// and returns false.
    pub fn ld_insert(&mut self, dir: &str, at: usize) -> bool {
        let dir = fixpath(dir);
        let at = at.min(self.library_path.len());
        match self.library_path.iter().position(|p| *p == dir) {
            None => {
                self.library_path.insert(at, dir);
                true
            }
            Some(old) if old == at => false,
            Some(old) => {
                self.library_path.remove(old);
                let at = at.min(self.library_path.len());
                self.library_path.insert(at, dir);
                true
            }
        }
    }

    pub fn ld_delete_index(&mut self, at: usize) -> bool {
        if at >= self.library_path.len() {
            return false;
        }
        self.library_path.remove(at);
        true
    }

    /// Delete by path string; a string starting with a digit is taken to
    /// be an index.
    pub fn ld_delete(&mut self, dir: &str) -> bool {
        if dir.is_empty() {
            return false;
        }
        if dir.starts_with(|c: char| c.is_ascii_digit()) {
            return match dir.parse::<usize>() {
                Ok(at) => self.ld_delete_index(at),
                Err(_) => false,
            };
        }
        let dir = fixpath(dir);
        match self.library_path.iter().position(|p| *p == dir) {
            Some(at) => {
                self.library_path.remove(at);
                true
            }
            None => false,
        }
    }

    pub fn ld_clear(&mut self) -> bool {
        if self.library_path.is_empty() {
            return false;
        }
        self.library_path.clear();
        true
    }

    /// Insert into a package's library path, with the same move-or-insert
    /// behaviour as [`ld_insert`](Self::ld_insert).
    pub fn pkg_ld_insert(&mut self, pkg: &str, dir: &str, at: usize) -> bool {
        let dir = fixpath(dir);
        let path = self.package_library_path.entry(pkg.to_string()).or_default();
        let at = at.min(path.len());
        match path.iter().position(|p| *p == dir) {
            None => {
                path.insert(at, dir);
                true
            }
            Some(old) if old == at => false,
            Some(old) => {
                path.remove(old);
                let at = at.min(path.len());
                path.insert(at, dir);
                true
            }
        }
    }

    pub fn pkg_ld_delete(&mut self, pkg: &str, dir: &str) -> bool {
        let dir = fixpath(dir);
        let Some(path) = self.package_library_path.get_mut(pkg) else {
            return false;
        };
        let Some(at) = path.iter().position(|p| *p == dir) else {
            return false;
        };
        path.remove(at);
        if path.is_empty() {
            self.package_library_path.remove(pkg);
        }
        true
    }

    pub fn pkg_ld_delete_index(&mut self, pkg: &str, at: usize) -> bool {
        let Some(path) = self.package_library_path.get_mut(pkg) else {
            return false;
        };
        if at >= path.len() {
            return false;
        }
        path.remove(at);
        if path.is_empty() {
            self.package_library_path.remove(pkg);
        }
        true
    }

    pub fn pkg_ld_clear(&mut self, pkg: &str) -> bool {
        self.package_library_path.remove(pkg).is_some()
    }

    /// Exclude a full object path from linking.
    pub fn ignore_file(&mut self, file: &str) -> bool {
        self.ignore_file_rules.insert(fixpath(file))
    }

    pub fn unignore_file(&mut self, file: &str) -> bool {
        self.ignore_file_rules.remove(&fixpath(file))
    }

    pub fn unignore_file_index(&mut self, at: usize) -> bool {
        remove_nth(&mut self.ignore_file_rules, at)
    }

    /// Declare a soname as always present.
    pub fn assume_found(&mut self, name: &str) -> bool {
        self.assume_found_rules.insert(name.to_string())
    }

    pub fn unassume_found(&mut self, name: &str) -> bool {
        self.assume_found_rules.remove(name)
    }

    pub fn unassume_found_index(&mut self, at: usize) -> bool {
        remove_nth(&mut self.assume_found_rules, at)
    }

    pub fn add_base_package(&mut self, name: &str) -> bool {
        self.base_packages.insert(name.to_string())
    }

    pub fn remove_base_package(&mut self, name: &str) -> bool {
        self.base_packages.remove(name)
    }

    pub fn remove_base_package_index(&mut self, at: usize) -> bool {
        remove_nth(&mut self.base_packages, at)
    }
}

/// Remove the `at`-th element of a set in its user-visible (sorted)
/// enumeration order.
fn remove_nth(set: &mut BTreeSet<String>, at: usize) -> bool {
    match set.iter().nth(at).cloned() {
        Some(value) => set.remove(&value),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::test_elf;

    pub(crate) fn pkg_with(name: &str, objects: Vec<Elf>) -> Package {
        Package {
            meta: PackageMeta {
                name: name.to_string(),
                version: "1.0-1".to_string(),
                ..Default::default()
            },
            objects,
        }
    }

    #[test]
    fn test_install_replaces_same_name() {
        let mut db = Db::new("test");
        db.install_package(pkg_with("a", vec![test_elf("/usr/lib", "liba.so")]));
        db.install_package(pkg_with("a", vec![test_elf("/usr/lib", "liba.so.2")]));
        assert_eq!(db.packages().len(), 1);
        assert_eq!(db.objects().count(), 1);
        assert_eq!(db.objects().next().map(|o| o.elf.basename.as_str()), Some("liba.so.2"));
    }

    #[test]
    fn test_delete_missing_package_is_ok() {
        let mut db = Db::new("test");
        assert!(db.delete_package("nope"));
    }

    #[test]
    fn test_wipe_packages() {
        let mut db = Db::new("test");
        assert!(!db.wipe_packages());
        db.install_package(pkg_with("a", vec![test_elf("/usr/lib", "liba.so")]));
        assert!(db.wipe_packages());
        assert!(db.is_empty());
    }

    #[test]
    fn test_wipe_filelists() {
        let mut db = Db::new("test");
        let mut pkg = pkg_with("a", vec![]);
        pkg.meta.filelist.push("usr/lib/liba.so".into());
        db.install_package(pkg);
        assert!(db.contains_filelists);
        assert!(db.wipe_filelists());
        assert!(!db.contains_filelists);
        assert!(db.packages()[0].meta.filelist.is_empty());
        assert!(!db.wipe_filelists());
    }

    #[test]
    fn test_content_flags() {
        let mut db = Db::new("test");
        let mut pkg = pkg_with("a", vec![]);
        pkg.meta.depends.push("b".into());
        pkg.meta.groups.insert("base".into());
        db.install_package(pkg);
        assert!(db.contains_package_depends);
        assert!(db.contains_groups);
        assert!(!db.contains_filelists);
    }

    #[test]
    fn test_ld_insert_move_semantics() {
        let mut db = Db::new("test");
        assert!(db.ld_append("/opt/lib"));
        assert!(db.ld_append("/usr/local/lib"));
        // re-inserting at the current index is a no-op
        assert!(!db.ld_insert("/opt/lib", 0));
        // moving to a different index succeeds
        assert!(db.ld_insert("/opt/lib", 1));
        assert_eq!(db.library_path(), &["/usr/local/lib", "/opt/lib"]);
        // no duplicate was created
        assert_eq!(db.library_path().len(), 2);
    }

    #[test]
    fn test_ld_insert_normalises() {
        let mut db = Db::new("test");
        assert!(db.ld_append("/opt//lib/"));
        assert_eq!(db.library_path(), &["/opt/lib"]);
        assert!(!db.ld_append("/opt/lib"));
    }

    #[test]
    fn test_ld_delete_numeric_string_is_index() {
        let mut db = Db::new("test");
        db.ld_append("/a");
        db.ld_append("/b");
        assert!(db.ld_delete("0"));
        assert_eq!(db.library_path(), &["/b"]);
        assert!(!db.ld_delete("5"));
        assert!(db.ld_delete("/b"));
        assert!(db.library_path().is_empty());
    }

    #[test]
    fn test_pkg_ld_store_removed_when_empty() {
        let mut db = Db::new("test");
        assert!(db.pkg_ld_insert("mesa", "/usr/lib/dri", 0));
        assert!(db.package_library_path().contains_key("mesa"));
        assert!(db.pkg_ld_delete("mesa", "/usr/lib/dri"));
        assert!(!db.package_library_path().contains_key("mesa"));
    }

    #[test]
    fn test_set_rules_index_removal() {
        let mut db = Db::new("test");
        assert!(db.assume_found("libGL.so.1"));
        assert!(db.assume_found("libEGL.so.1"));
        assert!(!db.assume_found("libGL.so.1"));
        // sorted enumeration: libEGL.so.1 is index 0
        assert!(db.unassume_found_index(0));
        assert!(!db.assume_found_rules().contains("libEGL.so.1"));
        assert!(!db.unassume_found_index(5));
    }

    #[test]
    fn test_ignore_file_rules_normalise() {
        let mut db = Db::new("test");
        assert!(db.ignore_file("/usr//lib/libdebug.so"));
        assert!(db.ignore_file_rules().contains("/usr/lib/libdebug.so"));
        assert!(db.unignore_file("/usr/lib/libdebug.so/"));
        assert!(db.ignore_file_rules().is_empty());
    }

    #[test]
    fn test_base_packages() {
        let mut db = Db::new("test");
        assert!(db.add_base_package("glibc"));
        assert!(!db.add_base_package("glibc"));
        assert!(db.remove_base_package("glibc"));
        assert!(!db.remove_base_package("glibc"));
    }
}
