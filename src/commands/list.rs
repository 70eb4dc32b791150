//! The listing surface: database info, packages, objects, resolution
//! results and file lists.

use anyhow::Result;

use crate::db::{json_db_info, json_objects, json_packages};
use crate::filter::{
    ObjectFilter, PackageFilter, StringFilter, all_object, all_package, all_string,
};

use super::CommandContext;

pub fn info(ctx: &CommandContext) -> Result<()> {
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&json_db_info(&ctx.db))?);
        return Ok(());
    }

    let db = &ctx.db;
    println!("DB version: {}", db.loaded_version);
    println!("DB name:    [{}]", db.name);
    println!(
        "DB flags:   {{ {} }}",
        if db.strict_linking { "strict" } else { "non_strict" }
    );
    println!("Additional Library Paths:");
    for (id, path) in db.library_path().iter().enumerate() {
        println!("  {}: {}", id, path);
    }
    if !db.ignore_file_rules().is_empty() {
        println!("Ignoring the following files:");
        for (id, rule) in db.ignore_file_rules().iter().enumerate() {
            println!("  {}: {}", id, rule);
        }
    }
    if !db.assume_found_rules().is_empty() {
        println!("Assuming the following libraries to exist:");
        for (id, rule) in db.assume_found_rules().iter().enumerate() {
            println!("  {}: {}", id, rule);
        }
    }
    if !db.package_library_path().is_empty() {
        println!("Package-specific library paths:");
        for (pkg, paths) in db.package_library_path() {
            println!("  {}:", pkg);
            for (id, path) in paths.iter().enumerate() {
                println!("    {}: {}", id, path);
            }
        }
    }
    if !db.base_packages().is_empty() {
        println!("The following packages are base packages:");
        for (id, name) in db.base_packages().iter().enumerate() {
            println!("  {}: {}", id, name);
        }
    }
    Ok(())
}

pub fn packages(
    ctx: &CommandContext,
    broken_only: bool,
    not_empty: bool,
    pkg_filters: &[PackageFilter],
    obj_filters: &[ObjectFilter],
) -> Result<()> {
    if ctx.json {
        let out = json_packages(&ctx.db, broken_only, not_empty, pkg_filters, obj_filters);
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let db = &ctx.db;
    if !ctx.quiet {
        println!(
            "Packages:{}",
            if broken_only { " (filter: 'broken')" } else { "" }
        );
    }
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
        if ctx.quiet {
            println!("{}", pkg.meta.name);
        } else {
            println!("  -> {} - {}", pkg.meta.name, pkg.meta.version);
        }
        if ctx.verbosity < 1 {
            continue;
        }
        for group in &pkg.meta.groups {
            println!("    is in group: {}", group);
        }
        for dep in &pkg.meta.depends {
            println!("    depends on: {}", dep);
        }
        for dep in &pkg.meta.optdepends {
            println!("    depends optionally on: {}", dep);
        }
        for entry in &pkg.meta.provides {
            println!("    provides: {}", entry);
        }
        for entry in &pkg.meta.replaces {
            println!("    replaces: {}", entry);
        }
        for entry in &pkg.meta.conflicts {
            println!("    conflicts with: {}", entry);
        }
        for &id in &pkg.objects {
            let obj = db.object(id);
            if !all_object(obj_filters, &obj.elf) {
                continue;
            }
            if broken_only {
                if db.is_broken(obj) {
                    println!("    broken: {}", obj.elf.path());
                    if ctx.verbosity >= 2 {
                        for missing in &obj.req_missing {
                            println!("      misses: {}", missing);
                        }
                    }
                }
            } else {
                println!("    contains: {}", obj.elf.path());
            }
        }
    }
    Ok(())
}

pub fn objects(
    ctx: &CommandContext,
    pkg_filters: &[PackageFilter],
    obj_filters: &[ObjectFilter],
) -> Result<()> {
    if ctx.json {
        let out = json_objects(&ctx.db, pkg_filters, obj_filters);
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let db = &ctx.db;
    if db.object_ids().is_empty() {
        if !ctx.quiet {
            println!("Objects: none");
        }
        return Ok(());
    }
    if !ctx.quiet {
        println!("Objects:");
    }
    for obj in db.objects() {
        if !all_object(obj_filters, &obj.elf) {
            continue;
        }
        if !pkg_filters.is_empty() {
            let visible = db
                .find_pkg(&obj.owner)
                .is_some_and(|p| all_package(pkg_filters, &p.meta));
            if !visible {
                continue;
            }
        }
        if ctx.quiet {
            println!("{}", obj.elf.path());
        } else {
            println!("  -> {}", obj.elf.path());
        }
        if ctx.verbosity < 1 {
            continue;
        }
        println!("     class: {} ({})", obj.elf.ei_class, obj.elf.class_name());
        println!("     data:  {} ({})", obj.elf.ei_data, obj.elf.data_name());
        println!("     osabi: {} ({})", obj.elf.ei_osabi, obj.elf.osabi_name());
        if let Some(rpath) = &obj.elf.rpath {
            println!("     rpath: {}", rpath);
        }
        if let Some(runpath) = &obj.elf.runpath {
            println!("     runpath: {}", runpath);
        }
        if ctx.verbosity < 2 {
            continue;
        }
        println!("     finds:");
        for found in &obj.req_found {
            println!("       -> {}", db.object(*found).elf.path());
        }
        println!("     misses:");
        for missing in &obj.req_missing {
            println!("       -> {}", missing);
        }
    }
    Ok(())
}

pub fn missing(ctx: &CommandContext) -> Result<()> {
    if !ctx.quiet {
        println!("Missing:");
    }
    for obj in ctx.db.objects() {
        if obj.req_missing.is_empty() {
            continue;
        }
        if ctx.quiet {
            println!("{}", obj.elf.path());
        } else {
            println!("  -> {}", obj.elf.path());
        }
        for missing in &obj.req_missing {
            println!("    misses: {}", missing);
        }
    }
    Ok(())
}

pub fn found(ctx: &CommandContext) -> Result<()> {
    if !ctx.quiet {
        println!("Found:");
    }
    for obj in ctx.db.objects() {
        if obj.req_found.is_empty() {
            continue;
        }
        if ctx.quiet {
            println!("{}", obj.elf.path());
        } else {
            println!("  -> {}", obj.elf.path());
        }
        for found in &obj.req_found {
            println!("    finds: {}", ctx.db.object(*found).elf.basename);
        }
    }
    Ok(())
}

pub fn files(
    ctx: &CommandContext,
    pkg_filters: &[PackageFilter],
    file_filters: &[StringFilter],
) -> Result<()> {
    for pkg in ctx.db.packages() {
        if !all_package(pkg_filters, &pkg.meta) {
            continue;
        }
        for file in &pkg.meta.filelist {
            if !all_string(file_filters, file) {
                continue;
            }
            if ctx.quiet {
                println!("{}", file);
            } else {
                println!("{} {}", pkg.meta.name, file);
            }
        }
    }
    Ok(())
}
