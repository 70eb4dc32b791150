//! Remove installed packages by name.

use anyhow::Result;
use log::warn;

use super::CommandContext;

pub fn remove(ctx: &mut CommandContext, names: &[String]) -> Result<()> {
    for name in names {
        if ctx.db.find_pkg(name).is_none() {
            warn!("package not installed: {}", name);
            continue;
        }
        ctx.db.delete_package(name);
        ctx.modified = true;
        if !ctx.quiet {
            println!("removed: {}", name);
        }
    }
    Ok(())
}
