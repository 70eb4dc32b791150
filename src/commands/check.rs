//! Run the integrity check and print its findings.

use anyhow::Result;
use log::info;

use crate::filter::{ObjectFilter, PackageFilter};

use super::CommandContext;

pub fn check(
    ctx: &CommandContext,
    pkg_filters: &[PackageFilter],
    obj_filters: &[ObjectFilter],
) -> Result<()> {
    info!("checking package dependencies...");
    let findings = ctx
        .db
        .check_integrity(pkg_filters, obj_filters, ctx.max_jobs);

    for finding in &findings {
        println!("{}", finding);
        if ctx.verbosity >= 1
            && let crate::db::Finding::FileConflict { packages, .. } = finding
        {
            for pkg in packages {
                println!("\t{}", pkg);
            }
        }
    }
    if findings.is_empty() && !ctx.quiet {
        println!("no problems found");
    }
    Ok(())
}
