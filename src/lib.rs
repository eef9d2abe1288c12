//! Unattended renewal engine for ACME-issued certificates.
//!
//! A [`Renewal`](core::types::Renewal) is resolved into one or more orders,
//! each served from the certificate cache or from the authority, and then
//! run through the configured store and installation plugins.

pub mod core;
pub mod domain;
pub mod issuance;
pub mod plugins;
pub mod renewal;
pub mod storage;

pub use crate::core::{
    prompt::{AutoConfirm, Prompt},
    run_level::RunLevel,
    settings::Settings,
    types::{OrderResult, RenewResult, Renewal},
};
pub use renewal::{RenewalExecutor, RenewalManager};

/// Installs the `env_logger` backend, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls leave the first logger in place.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
