//! Rule-store mutations, relinking and wiping.
//!
//! The database core never relinks on its own; the commands here trigger
//! a relink whenever a mutation changed what the resolver may see.

use anyhow::Result;
use log::info;

use super::CommandContext;

#[derive(Debug, Clone)]
pub enum LdOp {
    Append(String),
    Prepend(String),
    Insert(usize, String),
    Delete(String),
    Clear,
}

#[derive(Debug, Clone)]
pub enum PkgLdOp {
    Insert(usize, String),
    Delete(String),
    Clear,
}

/// Add/remove on one of the set-shaped rule stores; a numeric `Remove`
/// argument is an index into the user-visible enumeration.
#[derive(Debug, Clone)]
pub enum SetOp {
    Add(String),
    Remove(String),
}

pub fn ld(ctx: &mut CommandContext, op: LdOp) -> Result<()> {
    let changed = match op {
        LdOp::Append(dir) => ctx.db.ld_append(&dir),
        LdOp::Prepend(dir) => ctx.db.ld_prepend(&dir),
        LdOp::Insert(at, dir) => ctx.db.ld_insert(&dir, at),
        LdOp::Delete(dir) => ctx.db.ld_delete(&dir),
        LdOp::Clear => ctx.db.ld_clear(),
    };
    apply(ctx, changed, true)
}

pub fn pkg_ld(ctx: &mut CommandContext, pkg: &str, op: PkgLdOp) -> Result<()> {
    let changed = match op {
        PkgLdOp::Insert(at, dir) => ctx.db.pkg_ld_insert(pkg, &dir, at),
        PkgLdOp::Delete(dir) => match dir.parse::<usize>() {
            Ok(at) => ctx.db.pkg_ld_delete_index(pkg, at),
            Err(_) => ctx.db.pkg_ld_delete(pkg, &dir),
        },
        PkgLdOp::Clear => ctx.db.pkg_ld_clear(pkg),
    };
    apply(ctx, changed, true)
}

pub fn ignore(ctx: &mut CommandContext, op: SetOp) -> Result<()> {
    let changed = match op {
        SetOp::Add(file) => ctx.db.ignore_file(&file),
        SetOp::Remove(file) => match file.parse::<usize>() {
            Ok(at) => ctx.db.unignore_file_index(at),
            Err(_) => ctx.db.unignore_file(&file),
        },
    };
    apply(ctx, changed, true)
}

pub fn assume(ctx: &mut CommandContext, op: SetOp) -> Result<()> {
    let changed = match op {
        SetOp::Add(name) => ctx.db.assume_found(&name),
        SetOp::Remove(name) => match name.parse::<usize>() {
            Ok(at) => ctx.db.unassume_found_index(at),
            Err(_) => ctx.db.unassume_found(&name),
        },
    };
    apply(ctx, changed, true)
}

pub fn base(ctx: &mut CommandContext, op: SetOp) -> Result<()> {
    let changed = match op {
        SetOp::Add(name) => ctx.db.add_base_package(&name),
        SetOp::Remove(name) => match name.parse::<usize>() {
            Ok(at) => ctx.db.remove_base_package_index(at),
            Err(_) => ctx.db.remove_base_package(&name),
        },
    };
    // base packages only steer the integrity check
    apply(ctx, changed, false)
}

pub fn set_name(ctx: &mut CommandContext, name: &str) -> Result<()> {
    ctx.db.name = name.to_string();
    ctx.modified = true;
    Ok(())
}

pub fn set_strict(ctx: &mut CommandContext, strict: bool) -> Result<()> {
    let changed = ctx.db.strict_linking != strict;
    ctx.db.strict_linking = strict;
    apply(ctx, changed, true)
}

pub fn relink(ctx: &mut CommandContext) -> Result<()> {
    ctx.db.relink_all(ctx.max_jobs, !ctx.quiet);
    ctx.modified = true;
    Ok(())
}

pub fn wipe_packages(ctx: &mut CommandContext) -> Result<()> {
    if ctx.db.wipe_packages() {
        ctx.modified = true;
        info!("wiped all packages");
    }
    Ok(())
}

pub fn wipe_filelists(ctx: &mut CommandContext) -> Result<()> {
    if ctx.db.wipe_filelists() {
        ctx.modified = true;
        info!("wiped file lists");
    }
    Ok(())
}

fn apply(ctx: &mut CommandContext, changed: bool, needs_relink: bool) -> Result<()> {
    if !changed {
        info!("no change");
        return Ok(());
    }
    ctx.modified = true;
    if needs_relink {
        ctx.db.relink_all(ctx.max_jobs, !ctx.quiet);
    }
    Ok(())
}
