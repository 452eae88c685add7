//! Bundle Reader (C3): turns a checked-out commit + sub-path into an
//! in-memory Bundle (spec §4.3).

pub mod chart;
pub mod compress;
pub mod fleet_yaml;
pub mod ignore;
pub mod reader;

pub use reader::{build, BuildOptions, BuildOutcome};
