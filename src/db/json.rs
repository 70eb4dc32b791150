//! JSON renditions of the query surface.

use serde::Serialize;

use crate::filter::{ObjectFilter, PackageFilter, all_object, all_package};

use super::Db;

#[derive(Debug, Serialize)]
pub struct JsonDbInfo<'a> {
    pub version: u32,
    pub name: &'a str,
    pub strict_linking: bool,
    pub library_path: &'a [String],
    pub package_library_path: &'a std::collections::BTreeMap<String, Vec<String>>,
    pub ignore_file_rules: Vec<&'a str>,
    pub assume_found_rules: Vec<&'a str>,
    pub base_packages: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct JsonPackage {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub optdepends: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<JsonObject>,
}

#[derive(Debug, Serialize)]
pub struct JsonObject {
    pub path: String,
    pub class: &'static str,
    pub data: &'static str,
    pub osabi: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    pub finds: Vec<String>,
    pub misses: Vec<String>,
}

pub fn json_db_info(db: &Db) -> JsonDbInfo<'_> {
    JsonDbInfo {
        version: db.loaded_version,
        name: &db.name,
        strict_linking: db.strict_linking,
        library_path: db.library_path(),
        package_library_path: db.package_library_path(),
        ignore_file_rules: db.ignore_file_rules().iter().map(String::as_str).collect(),
        assume_found_rules: db.assume_found_rules().iter().map(String::as_str).collect(),
        base_packages: db.base_packages().iter().map(String::as_str).collect(),
    }
}

fn json_object(db: &Db, id: super::ObjectId) -> JsonObject {
    let obj = db.object(id);
    JsonObject {
        path: obj.elf.path(),
        class: obj.elf.class_name(),
        data: obj.elf.data_name(),
        osabi: obj.elf.osabi_name(),
        rpath: obj.elf.rpath.clone(),
        runpath: obj.elf.runpath.clone(),
        interpreter: obj.elf.interpreter.clone(),
        finds: obj
            .req_found
            .iter()
            .map(|found| db.object(*found).elf.path())
            .collect(),
        misses: obj.req_missing.iter().cloned().collect(),
    }
}

/// Filtered package listing; `broken_only` restricts both the package
/// list and the embedded object lists to broken entries.
pub fn json_packages(
    db: &Db,
    broken_only: bool,
    not_empty: bool,
    pkg_filters: &[PackageFilter],
    obj_filters: &[ObjectFilter],
) -> Vec<JsonPackage> {
    let mut out = Vec::new();
    for pkg in db.packages() {
        if !all_package(pkg_filters, &pkg.meta) {
            continue;
        }
        if broken_only && !db.is_pkg_broken(pkg) {
            continue;
        }
        if not_empty && db.is_pkg_empty(pkg, obj_filters) {
            continue;
        }
        let objects = pkg
            .objects
            .iter()
            .filter(|id| all_object(obj_filters, &db.object(**id).elf))
            .filter(|id| !broken_only || db.is_broken(db.object(**id)))
            .map(|id| json_object(db, *id))
            .collect();
        out.push(JsonPackage {
            name: pkg.meta.name.clone(),
            version: pkg.meta.version.clone(),
            groups: pkg.meta.groups.iter().cloned().collect(),
            depends: pkg.meta.depends.clone(),
            optdepends: pkg.meta.optdepends.clone(),
            objects,
        });
    }
    out
}

/// Filtered flat object listing.
pub fn json_objects(
    db: &Db,
    pkg_filters: &[PackageFilter],
    obj_filters: &[ObjectFilter],
) -> Vec<JsonObject> {
    db.object_ids()
        .iter()
        .filter(|id| {
            let obj = db.object(**id);
            if !all_object(obj_filters, &obj.elf) {
                return false;
            }
            if pkg_filters.is_empty() {
                return true;
            }
            match db.find_pkg(&obj.owner) {
                Some(pkg) => all_package(pkg_filters, &pkg.meta),
                None => false,
            }
        })
        .map(|id| json_object(db, *id))
        .collect()
}
