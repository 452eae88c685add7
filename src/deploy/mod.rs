//! Deployer (C7) and Drift Monitor (C8): Helm rendering/install/rollback
//! plus live-vs-desired resource comparison (spec §4.7, §4.8).

pub mod drift;
pub mod helm;
pub mod lookup_scan;
