//! Plugin roles consumed by the renewal engine.
//!
//! Each role is a trait with an explicit capability query. Concrete
//! implementations are resolved by stable identifier through
//! [`registry::PluginRegistry`].

use std::{collections::HashMap, ops::BitOr, path::Path};

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    core::{
        run_level::RunLevel,
        types::{Order, PrivateKeyPem, Renewal, StoreInfo, Target},
    },
    issuance::certificate::{CertificateInfo, CertificateInfoCache},
};

pub mod csr;
pub mod install;
pub mod order;
pub mod registry;
pub mod store;
pub mod target;
pub mod validation;

/// Whether a plugin can run in the current environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Enabled,
    Disabled(String),
}

impl Capability {
    pub fn disabled(reason: impl Into<String>) -> Self {
        Capability::Disabled(reason.into())
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Capability::Enabled => None,
            Capability::Disabled(reason) => Some(reason),
        }
    }
}

/// Which validation steps may run concurrently across orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParallelOperations(u8);

impl ParallelOperations {
    pub const NONE: ParallelOperations = ParallelOperations(0);
    /// Create challenge records for several orders at once.
    pub const PREPARE: ParallelOperations = ParallelOperations(1);
    /// Ask the authority to verify several challenges at once.
    pub const ANSWER: ParallelOperations = ParallelOperations(1 << 1);
    pub const ALL: ParallelOperations = ParallelOperations(0b11);

    pub fn contains(self, other: ParallelOperations) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ParallelOperations {
    type Output = ParallelOperations;

    fn bitor(self, rhs: ParallelOperations) -> ParallelOperations {
        ParallelOperations(self.0 | rhs.0)
    }
}

pub trait Plugin: Send + Sync {
    /// Stable identifier used in plugin options.
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    fn capability(&self) -> Capability {
        Capability::Enabled
    }
}

#[async_trait]
pub trait TargetPlugin: Plugin {
    async fn generate(&self) -> Result<Option<Target>>;
}

pub trait OrderPlugin: Plugin {
    fn split(&self, renewal: &Renewal, target: &Target) -> Vec<Order>;
}

#[async_trait]
pub trait CsrPlugin: Plugin {
    /// Produces a DER signing request for the target, reusing the key at
    /// `key_path` when given and present.
    async fn generate_csr(&self, target: &Target, key_path: Option<&Path>) -> Result<Vec<u8>>;

    /// Private key belonging to the last generated request.
    async fn get_keys(&self) -> Result<PrivateKeyPem>;

    /// Optional rework of the issued certificate; `None` keeps it as is.
    async fn post_process(&self, _certificate: &CertificateInfo) -> Result<Option<CertificateInfo>> {
        Ok(None)
    }

    fn reuse_private_key(&self) -> bool {
        false
    }
}

/// Completes authority-side challenges for a batch of orders.
#[async_trait]
pub trait OrderValidator: Plugin {
    /// Updates each order's details in place; an order that could not be
    /// validated is left in a non-valid state.
    async fn validate_orders(&self, orders: &mut [&mut Order], run_level: RunLevel) -> Result<()>;

    fn parallelism(&self) -> ParallelOperations {
        ParallelOperations::NONE
    }
}

#[async_trait]
pub trait StorePlugin: Plugin {
    async fn save(&self, certificate: &CertificateInfoCache) -> Result<Option<StoreInfo>>;
    async fn delete(&self, certificate: &CertificateInfoCache) -> Result<()>;

    /// Leave superseded certificates in place after a renewal.
    fn keep_existing(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait InstallationPlugin: Plugin {
    /// Returns `false` when the installation step reported a problem.
    async fn install(
        &self,
        store_info: &HashMap<String, StoreInfo>,
        new_certificate: &CertificateInfoCache,
        old_certificate: Option<&CertificateInfoCache>,
    ) -> Result<bool>;
}
