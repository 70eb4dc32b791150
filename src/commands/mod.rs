//! Command implementations behind the CLI surface.

mod check;
mod install;
mod list;
mod remove;
mod rules;

pub use check::check;
pub use install::install;
pub use list::{files, found, info, missing, objects, packages};
pub use remove::remove;
pub use rules::{
    LdOp, PkgLdOp, SetOp, assume, base, ignore, ld, pkg_ld, relink, set_name, set_strict,
    wipe_filelists, wipe_packages,
};

use crate::db::Db;

/// Shared state threaded through every command.
pub struct CommandContext {
    pub db: Db,
    pub verbosity: u8,
    pub quiet: bool,
    pub json: bool,
    pub max_jobs: usize,
    /// Set by mutating commands so the driver knows to save the database.
    pub modified: bool,
}

impl CommandContext {
    pub fn new(db: Db) -> Self {
        CommandContext {
            db,
            verbosity: 0,
            quiet: false,
            json: false,
            max_jobs: 0,
            modified: false,
        }
    }
}
