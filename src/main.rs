use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use elfdepdb::commands::{self, CommandContext, LdOp, PkgLdOp, SetOp};
use elfdepdb::config::Config;
use elfdepdb::db::{Db, load_db, save_db};
use elfdepdb::filter::{ObjectFilter, PackageFilter, StringFilter};
use std::path::PathBuf;

/// elfdepdb - ELF dependency database
///
/// Tracks the dynamic-linker dependencies of binaries contained in
/// package archives without installing them. Packages are recorded into
/// a database file which the query commands operate on.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file (also via config or ELFDEPDB_DB); .gz is compressed
    #[arg(long = "db", short = 'd', env = "ELFDEPDB_DB", value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    /// Only print machine-relevant output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Increase verbosity (may be repeated)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print query results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Worker threads; 0 uses all CPUs, 1 forces serial
    #[arg(long = "jobs", short = 'j', value_name = "N", global = true)]
    max_jobs: Option<usize>,

    /// Do not write the database back
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install package archives into the database
    Install {
        #[arg(value_name = "ARCHIVE", required = true)]
        archives: Vec<PathBuf>,
    },

    /// Remove installed packages by name
    Remove {
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,
    },

    /// Show database header and rule stores
    Info,

    /// List installed packages
    Packages {
        /// Only packages with broken objects
        #[arg(long)]
        broken: bool,
        /// Hide packages with no visible objects
        #[arg(long = "not-empty")]
        not_empty: bool,
        /// Package name filter ('!' negates, globs allowed)
        #[arg(long = "filter", short = 'f', value_name = "PATTERN")]
        filters: Vec<String>,
        /// Object filter applied to the contained objects
        #[arg(long = "obj-filter", value_name = "PATTERN")]
        obj_filters: Vec<String>,
    },

    /// List ELF objects
    Objects {
        #[arg(long = "filter", short = 'f', value_name = "PATTERN")]
        filters: Vec<String>,
        #[arg(long = "obj-filter", value_name = "PATTERN")]
        obj_filters: Vec<String>,
    },

    /// List objects with unresolved sonames
    Missing,

    /// List objects with resolved dependencies
    Found,

    /// List package file lists
    Files {
        #[arg(long = "filter", short = 'f', value_name = "PATTERN")]
        filters: Vec<String>,
        /// Filter on the file paths themselves
        #[arg(long = "file-filter", value_name = "PATTERN")]
        file_filters: Vec<String>,
    },

    /// Simulate recursive installation and report broken dependencies
    Check {
        #[arg(long = "filter", short = 'f', value_name = "PATTERN")]
        filters: Vec<String>,
        #[arg(long = "obj-filter", value_name = "PATTERN")]
        obj_filters: Vec<String>,
    },

    /// Recompute every object's resolution
    Relink,

    /// Remove bulk data from the database
    Wipe {
        #[command(subcommand)]
        what: WipeCommands,
    },

    /// Manage the additional library path list
    Ld {
        #[command(subcommand)]
        action: LdCommands,
    },

    /// Manage per-package library paths
    PkgLd {
        /// Package name the paths apply to
        package: String,
        #[command(subcommand)]
        action: PkgLdCommands,
    },

    /// Manage the ignored-file rules
    Ignore {
        #[command(subcommand)]
        action: SetCommands,
    },

    /// Manage the assume-found rules
    Assume {
        #[command(subcommand)]
        action: SetCommands,
    },

    /// Manage the base-package set used by the integrity check
    Base {
        #[command(subcommand)]
        action: SetCommands,
    },

    /// Change database attributes
    Set {
        #[command(subcommand)]
        what: SetAttrCommands,
    },
}

#[derive(Subcommand, Debug)]
enum WipeCommands {
    /// Drop all packages and objects
    Packages,
    /// Drop every package's file list
    Filelists,
}

#[derive(Subcommand, Debug)]
enum LdCommands {
    /// Append a directory to the list
    Append { dir: String },
    /// Prepend a directory to the list
    Prepend { dir: String },
    /// Insert a directory at an index (moves an existing entry)
    Insert { index: usize, dir: String },
    /// Delete by path, or by index if numeric
    Delete { dir: String },
    /// Clear the list
    Clear,
}

#[derive(Subcommand, Debug)]
enum PkgLdCommands {
    Insert { index: usize, dir: String },
    /// Delete by path, or by index if numeric
    Delete { dir: String },
    Clear,
}

#[derive(Subcommand, Debug)]
enum SetCommands {
    Add { value: String },
    /// Remove by value, or by index if numeric
    Remove { value: String },
}

#[derive(Subcommand, Debug)]
enum SetAttrCommands {
    /// Set the database label
    Name { name: String },
    /// Toggle strict OSABI matching (relinks)
    Strict {
        #[arg(value_parser = clap::builder::BoolishValueParser::new())]
        value: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let config = Config::load()?;

    let Some(db_path) = cli.database.clone().or(config.database.clone()) else {
        bail!("no database file; pass --db or set `database` in the config");
    };

    let db = if db_path.exists() {
        load_db(&db_path)?
    } else {
        Db::new(&db_path.to_string_lossy())
    };

    let mut ctx = CommandContext::new(db);
    ctx.quiet = cli.quiet || config.quiet.unwrap_or(false);
    ctx.verbosity = if cli.verbose > 0 {
        cli.verbose
    } else {
        config.verbosity.unwrap_or(0)
    };
    ctx.json = cli.json || config.json.unwrap_or(false);
    ctx.max_jobs = cli.max_jobs.or(config.max_jobs).unwrap_or(0);

    match cli.command {
        Commands::Install { archives } => commands::install(&mut ctx, &archives)?,
        Commands::Remove { names } => commands::remove(&mut ctx, &names)?,
        Commands::Info => commands::info(&ctx)?,
        Commands::Packages {
            broken,
            not_empty,
            filters,
            obj_filters,
        } => commands::packages(
            &ctx,
            broken,
            not_empty,
            &pkg_filters(&filters),
            &obj_filters_of(&obj_filters),
        )?,
        Commands::Objects {
            filters,
            obj_filters,
        } => commands::objects(&ctx, &pkg_filters(&filters), &obj_filters_of(&obj_filters))?,
        Commands::Missing => commands::missing(&ctx)?,
        Commands::Found => commands::found(&ctx)?,
        Commands::Files {
            filters,
            file_filters,
        } => {
            let file_filters: Vec<StringFilter> =
                file_filters.iter().map(|s| StringFilter::parse(s)).collect();
            commands::files(&ctx, &pkg_filters(&filters), &file_filters)?
        }
        Commands::Check {
            filters,
            obj_filters,
        } => commands::check(&ctx, &pkg_filters(&filters), &obj_filters_of(&obj_filters))?,
        Commands::Relink => commands::relink(&mut ctx)?,
        Commands::Wipe { what } => match what {
            WipeCommands::Packages => commands::wipe_packages(&mut ctx)?,
            WipeCommands::Filelists => commands::wipe_filelists(&mut ctx)?,
        },
        Commands::Ld { action } => {
            let op = match action {
                LdCommands::Append { dir } => LdOp::Append(dir),
                LdCommands::Prepend { dir } => LdOp::Prepend(dir),
                LdCommands::Insert { index, dir } => LdOp::Insert(index, dir),
                LdCommands::Delete { dir } => LdOp::Delete(dir),
                LdCommands::Clear => LdOp::Clear,
            };
            commands::ld(&mut ctx, op)?
        }
        Commands::PkgLd { package, action } => {
            let op = match action {
                PkgLdCommands::Insert { index, dir } => PkgLdOp::Insert(index, dir),
                PkgLdCommands::Delete { dir } => PkgLdOp::Delete(dir),
                PkgLdCommands::Clear => PkgLdOp::Clear,
            };
            commands::pkg_ld(&mut ctx, &package, op)?
        }
        Commands::Ignore { action } => commands::ignore(&mut ctx, set_op(action))?,
        Commands::Assume { action } => commands::assume(&mut ctx, set_op(action))?,
        Commands::Base { action } => commands::base(&mut ctx, set_op(action))?,
        Commands::Set { what } => match what {
            SetAttrCommands::Name { name } => commands::set_name(&mut ctx, &name)?,
            SetAttrCommands::Strict { value } => commands::set_strict(&mut ctx, value)?,
        },
    }

    if ctx.modified && !cli.dry_run {
        save_db(&ctx.db, &db_path)
            .with_context(|| format!("failed to save database to {:?}", db_path))?;
    }
    Ok(())
}

fn pkg_filters(patterns: &[String]) -> Vec<PackageFilter> {
    patterns.iter().map(|s| PackageFilter::parse(s)).collect()
}

fn obj_filters_of(patterns: &[String]) -> Vec<ObjectFilter> {
    patterns.iter().map(|s| ObjectFilter::parse(s)).collect()
}

fn set_op(action: SetCommands) -> SetOp {
    match action {
        SetCommands::Add { value } => SetOp::Add(value),
        SetCommands::Remove { value } => SetOp::Remove(value),
    }
}
