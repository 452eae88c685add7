//! Source Poller (C1): resolves a GitRepo's `repo`/`branch`/`revision` to a
//! concrete commit, either via a lightweight provider-specific HTTP
//! shortcut or a full `git ls-remote` over `gix`.

pub mod auth;
pub mod client;
pub mod provider_shortcut;

pub use client::{GitClient, GixClient};
