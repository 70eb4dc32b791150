//! Archive walking: turn a package file into a [`Package`] without
//! touching the host filesystem.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use log::{debug, error, warn};
use tar::{Archive, EntryType};

use crate::elf::{Elf, parse_elf};
use crate::paths::{fixpath, split_dir_base};

use super::{Package, guess_name_version, parse_pkginfo};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Read a package archive (tar, optionally gzip-compressed).
///
/// Regular files are probed as ELF objects; symlinks to objects parsed
/// from the same package become aliases with the link's own path. A
/// malformed ELF entry is logged and skipped, a malformed archive or
/// `.PKGINFO` aborts the load.
pub fn load_package(path: &Path) -> Result<Package> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open archive {:?}", path))?;

    let mut magic = [0u8; 2];
    let gz = file.read(&mut magic)? == 2 && magic == GZIP_MAGIC;
    file.seek(SeekFrom::Start(0))?;
    let reader: Box<dyn Read> = if gz {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut pkg = Package::default();
    let mut symlinks: Vec<(String, String)> = Vec::new();
    let mut archive = Archive::new(reader);

    for entry in archive
        .entries()
        .context("failed to read archive entries")?
    {
        let mut entry = entry.context("failed to read archive entry")?;
        let entry_type = entry.header().entry_type();
        if entry_type == EntryType::XGlobalHeader || entry_type == EntryType::XHeader {
            continue;
        }

        let name = entry.path()?.to_string_lossy().into_owned();
        let name = name.trim_start_matches("./").to_string();
        if name.is_empty() {
            continue;
        }

        if entry_type.is_dir() {
            continue;
        }

        if name == ".PKGINFO" {
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .context("failed to read .PKGINFO")?;
            parse_pkginfo(&text, &mut pkg.meta)?;
            continue;
        }

        // metadata entries like .INSTALL and .MTREE are not package files
        if name.starts_with('.') {
            debug!("skip: {}", name);
            continue;
        }

        pkg.meta.filelist.push(name.clone());

        if entry_type.is_symlink() {
            if let Some(target) = entry.link_name()? {
                symlinks.push((name, target.to_string_lossy().into_owned()));
            }
            continue;
        }
        if !entry_type.is_file() {
            continue;
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("file was short: {}", name))?;

        match parse_elf(&data) {
            Ok(Some(mut obj)) => {
                let (dirname, basename) = split_dir_base(&name);
                obj.dirname = dirname;
                obj.basename = basename;
                obj.solve_paths();
                pkg.objects.push(obj);
            }
            Ok(None) => debug!("skip: {}", name),
            Err(err) => error!("error in {}: {:#}", name, err),
        }
    }

    materialize_symlinks(&mut pkg, symlinks);

    if pkg.meta.name.is_empty() {
        let filename = path.to_string_lossy();
        match guess_name_version(&filename) {
            Some((name, version)) => {
                debug!("guessed {} {} from {:?}", name, version, path);
                pkg.meta.name = name;
                if pkg.meta.version.is_empty() {
                    pkg.meta.version = version;
                }
            }
            None => bail!("no .PKGINFO and unrecognized filename: {:?}", path),
        }
    }

    Ok(pkg)
}

/// Turn symlinks whose target is a parsed ELF object into alias objects.
///
/// Chains of symlinks are followed by repeating the pass until it stops
/// producing aliases.
fn materialize_symlinks(pkg: &mut Package, mut symlinks: Vec<(String, String)>) {
    while !symlinks.is_empty() {
        let mut unresolved = Vec::new();
        let mut progress = false;

        for (link, target) in symlinks {
            let (link_dir, link_base) = split_dir_base(&link);
            let resolved = resolve_target(&link_dir, &target);

            let found = pkg
                .objects
                .iter()
                .find(|o| o.path() == resolved)
                .cloned();
            match found {
                Some(template) => {
                    // aliases keep the target's attributes verbatim
                    pkg.objects.push(Elf {
                        dirname: link_dir,
                        basename: link_base,
                        ..template
                    });
                    progress = true;
                }
                None => unresolved.push((link, target)),
            }
        }

        if !progress {
            for (link, target) in &unresolved {
                debug!("dangling or non-object symlink: {} -> {}", link, target);
            }
            break;
        }
        symlinks = unresolved;
    }
}

/// Resolve a symlink target against the link's directory, lexically.
fn resolve_target(link_dir: &str, target: &str) -> String {
    let joined = if target.starts_with('/') {
        fixpath(target)
    } else {
        fixpath(&format!("{}/{}", link_dir, target))
    };

    let mut parts: Vec<&str> = Vec::new();
    for comp in joined.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    warn!("symlink target escapes the archive root: {}", target);
                }
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}
