use std::sync::Arc;

use crate::{
    core::types::{Order, OrderResult, Renewal},
    issuance::certificate::CertificateInfoCache,
    plugins::{CsrPlugin, InstallationPlugin, StorePlugin, registry::PluginRegistry},
};

/// Plugin instances resolved for a single order.
///
/// Every order gets its own CSR plugin, which remembers the key of the
/// request it generated while downloads run concurrently.
pub struct OrderScope {
    pub csr: Arc<dyn CsrPlugin>,
    pub stores: Vec<Arc<dyn StorePlugin>>,
    pub installers: Vec<Arc<dyn InstallationPlugin>>,
}

impl OrderScope {
    pub fn resolve(registry: &PluginRegistry, renewal: &Renewal) -> Self {
        Self {
            csr: registry.csr(renewal),
            stores: registry.stores(renewal),
            installers: registry.installers(renewal),
        }
    }
}

/// State of one order during a single execution pass.
pub struct OrderContext {
    pub order: Order,
    pub scope: OrderScope,
    pub should_run: bool,
    pub previous: Option<CertificateInfoCache>,
    pub new_certificate: Option<CertificateInfoCache>,
    pub result: OrderResult,
}

impl OrderContext {
    pub fn new(order: Order, scope: OrderScope) -> Self {
        let result = OrderResult::new(order.friendly_name_intermediate());
        Self {
            order,
            scope,
            should_run: false,
            previous: None,
            new_certificate: None,
            result,
        }
    }

    pub fn name(&self) -> &str {
        &self.result.name
    }
}
