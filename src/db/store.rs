//! Loading and saving the database.
//!
//! The on-disk form is a JSON document (gzip-compressed when the filename
//! ends in `.gz`). Object cross-references are stored as indices into the
//! flat object enumeration, which is itself derivable from package order,
//! so insertion order survives a round trip exactly.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::elf::Elf;
use crate::package::PackageMeta;

use super::{Db, InstalledPackage, Object, ObjectId};

/// Bumped when the document layout changes incompatibly.
pub(crate) const CURRENT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct DbFile {
    version: u32,
    name: String,
    strict_linking: bool,
    library_path: Vec<String>,
    package_library_path: BTreeMap<String, Vec<String>>,
    ignore_file_rules: BTreeSet<String>,
    assume_found_rules: BTreeSet<String>,
    base_packages: BTreeSet<String>,
    packages: Vec<PackageFile>,
}

#[derive(Serialize, Deserialize)]
struct PackageFile {
    #[serde(flatten)]
    meta: PackageMeta,
    objects: Vec<ObjectFile>,
}

#[derive(Serialize, Deserialize)]
struct ObjectFile {
    #[serde(flatten)]
    elf: Elf,
    req_found: Vec<usize>,
    req_missing: Vec<String>,
}

fn is_gz(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

/// Serialize `db` to `path`.
pub fn save_db(db: &Db, path: &Path) -> Result<()> {
    // id -> flat index, the stable cross-reference key on disk
    let index: HashMap<ObjectId, usize> = db
        .objects
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();

    let packages = db
        .packages
        .iter()
        .map(|pkg| PackageFile {
            meta: pkg.meta.clone(),
            objects: pkg
                .objects
                .iter()
                .map(|id| {
                    let obj = &db.pool[id];
                    ObjectFile {
                        elf: obj.elf.clone(),
                        req_found: obj.req_found.iter().map(|f| index[f]).collect(),
                        req_missing: obj.req_missing.iter().cloned().collect(),
                    }
                })
                .collect(),
        })
        .collect();

    let doc = DbFile {
        version: CURRENT_VERSION,
        name: db.name.clone(),
        strict_linking: db.strict_linking,
        library_path: db.library_path.clone(),
        package_library_path: db.package_library_path.clone(),
        ignore_file_rules: db.ignore_file_rules.clone(),
        assume_found_rules: db.assume_found_rules.clone(),
        base_packages: db.base_packages.clone(),
        packages,
    };

    let file = File::create(path)
        .with_context(|| format!("failed to create database file {:?}", path))?;
    if is_gz(path) {
        let mut out = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut out, &doc)?;
        out.finish()?.flush()?;
    } else {
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, &doc)?;
        out.flush()?;
    }
    Ok(())
}

/// Load a database from `path`.
pub fn load_db(path: &Path) -> Result<Db> {
    let file =
        File::open(path).with_context(|| format!("failed to open database file {:?}", path))?;
    let reader: Box<dyn Read> = if is_gz(path) {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    let doc: DbFile = serde_json::from_reader(reader)
        .with_context(|| format!("failed to parse database file {:?}", path))?;

    if doc.version > CURRENT_VERSION {
        bail!(
            "database version {} is newer than supported version {}",
            doc.version,
            CURRENT_VERSION
        );
    }

    let mut db = Db::new(&doc.name);
    db.loaded_version = doc.version;
    db.strict_linking = doc.strict_linking;
    db.library_path = doc.library_path;
    db.package_library_path = doc.package_library_path;
    db.ignore_file_rules = doc.ignore_file_rules;
    db.assume_found_rules = doc.assume_found_rules;
    db.base_packages = doc.base_packages;

    // First pass: hand out ids in flat enumeration order.
    let mut flat_ids: Vec<ObjectId> = Vec::new();
    let mut flat_results: Vec<(Vec<usize>, Vec<String>)> = Vec::new();
    for pkgfile in doc.packages {
        let mut entry = InstalledPackage {
            meta: pkgfile.meta,
            objects: Vec::with_capacity(pkgfile.objects.len()),
        };
        if entry.meta.has_depend_fields() {
            db.contains_package_depends = true;
        }
        if !entry.meta.groups.is_empty() {
            db.contains_groups = true;
        }
        if !entry.meta.filelist.is_empty() {
            db.contains_filelists = true;
        }
        for objfile in pkgfile.objects {
            let id = db.next_id;
            db.next_id += 1;
            db.pool.insert(
                id,
                Object {
                    elf: objfile.elf,
                    owner: entry.meta.name.clone(),
                    req_found: BTreeSet::new(),
                    req_missing: BTreeSet::new(),
                },
            );
            entry.objects.push(id);
            db.objects.push(id);
            flat_ids.push(id);
            flat_results.push((objfile.req_found, objfile.req_missing));
        }
        db.packages.push(entry);
    }

    // Second pass: translate stored indices back into ids.
    for (id, (found, missing)) in flat_ids.iter().zip(flat_results) {
        let mut req_found = BTreeSet::new();
        for idx in found {
            match flat_ids.get(idx) {
                Some(target) => {
                    req_found.insert(*target);
                }
                None => bail!("corrupt database: object reference {} out of range", idx),
            }
        }
        let obj = db.pool.get_mut(id).expect("object inserted above");
        obj.req_found = req_found;
        obj.req_missing = missing.into_iter().collect();
    }

    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::super::tests::pkg_with;
    use super::*;
    use crate::elf::test_elf;
    use tempfile::tempdir;

    fn sample_db() -> Db {
        let mut db = Db::new("store-test");
        db.strict_linking = true;
        db.ld_append("/opt/lib");
        db.pkg_ld_insert("app", "/opt/app/lib", 0);
        db.ignore_file("/usr/lib/libignored.so");
        db.assume_found("libGL.so.1");
        db.add_base_package("glibc");

        db.install_package(pkg_with("a", vec![test_elf("/usr/lib", "libfoo.so")]));
        let mut user = test_elf("/usr/lib", "libbar.so");
        user.needed = vec!["libfoo.so".into(), "libmiss.so".into()];
        let mut pkg = pkg_with("b", vec![user]);
        pkg.meta.depends.push("a".into());
        pkg.meta.filelist.push("usr/lib/libbar.so".into());
        db.install_package(pkg);
        db
    }

    fn snapshot(db: &Db) -> Vec<(Elf, Vec<String>, Vec<String>)> {
        db.objects()
            .map(|o| {
                (
                    o.elf.clone(),
                    o.req_found
                        .iter()
                        .map(|id| db.object(*id).elf.path())
                        .collect(),
                    o.req_missing.iter().cloned().collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_roundtrip_plain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = sample_db();
        save_db(&db, &path).unwrap();
        let loaded = load_db(&path).unwrap();

        assert_eq!(loaded.name, "store-test");
        assert_eq!(loaded.loaded_version, CURRENT_VERSION);
        assert!(loaded.strict_linking);
        assert_eq!(loaded.library_path(), db.library_path());
        assert_eq!(loaded.package_library_path(), db.package_library_path());
        assert_eq!(loaded.ignore_file_rules(), db.ignore_file_rules());
        assert_eq!(loaded.assume_found_rules(), db.assume_found_rules());
        assert_eq!(loaded.base_packages(), db.base_packages());
        assert!(loaded.contains_package_depends);
        assert!(loaded.contains_filelists);
        assert_eq!(snapshot(&loaded), snapshot(&db));
    }

    #[test]
    fn test_roundtrip_gz() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db.gz");
        let db = sample_db();
        save_db(&db, &path).unwrap();
        let loaded = load_db(&path).unwrap();
        assert_eq!(snapshot(&loaded), snapshot(&db));

        // really compressed?
        let mut magic = [0u8; 2];
        File::open(&path).unwrap().read_exact(&mut magic).unwrap();
        assert_eq!(magic, [0x1f, 0x8b]);
    }

    #[test]
    fn test_load_rejects_newer_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("future.db");
        std::fs::write(
            &path,
            format!(
                r#"{{"version":{},"name":"x","strict_linking":false,
                    "library_path":[],"package_library_path":{{}},
                    "ignore_file_rules":[],"assume_found_rules":[],
                    "base_packages":[],"packages":[]}}"#,
                CURRENT_VERSION + 1
            ),
        )
        .unwrap();
        assert!(load_db(&path).is_err());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_db(&path).is_err());
    }

    #[test]
    fn test_resolution_survives_roundtrip_without_relink() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = sample_db();
        save_db(&db, &path).unwrap();
        let mut loaded = load_db(&path).unwrap();

        // relinking the loaded database must be a no-op
        let before = snapshot(&loaded);
        loaded.relink_all(1, false);
        assert_eq!(before, snapshot(&loaded));
    }
}
