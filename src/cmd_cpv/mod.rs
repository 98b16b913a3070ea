//! Subcommand modules for the `cpv` binary.

pub mod acf;
pub mod region_p;
