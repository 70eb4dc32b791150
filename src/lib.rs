//! elfdepdb — track dynamic-linker dependencies across a set of package
//! archives by simulating a virtual installation.
//!
//! Packages are read entry by entry, their ELF objects recorded, and each
//! object's `DT_NEEDED` sonames resolved against every other known object
//! using the linker's own visibility rules (RPATH/RUNPATH, trusted paths,
//! configured library paths). The result is a queryable graph of found
//! and missing dependencies that stays consistent under incremental
//! installs and removals.

pub mod commands;
pub mod config;
pub mod db;
pub mod elf;
pub mod filter;
pub mod package;
pub mod paths;
pub mod vercmp;
