//! Install packages from archive files.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use log::info;

use crate::package::load_package;

use super::CommandContext;

pub fn install(ctx: &mut CommandContext, archives: &[PathBuf]) -> Result<()> {
    for path in archives {
        let pkg = load_package(path)
            .with_context(|| format!("failed to load package {:?}", path))?;
        let name = pkg.meta.name.clone();
        let version = pkg.meta.version.clone();
        let objects = pkg.objects.len();

        if !ctx.db.install_package(pkg) {
            bail!("failed to install {} {}", name, version);
        }
        ctx.modified = true;
        info!("installed {} {} ({} objects)", name, version, objects);
        if !ctx.quiet {
            println!("installed: {} {}", name, version);
        }
    }
    Ok(())
}
