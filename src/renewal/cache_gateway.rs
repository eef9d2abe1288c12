use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};

use crate::{
    core::{run_level::RunLevel, types::Order},
    issuance::certificate::CertificateInfoCache,
    storage::cache::CertificateCache,
};

/// Serves recently issued certificates instead of contacting the authority.
pub struct CacheGateway {
    cache: Arc<CertificateCache>,
    reuse_days: i64,
}

impl CacheGateway {
    pub fn new(cache: Arc<CertificateCache>, reuse_days: i64) -> Self {
        Self { cache, reuse_days }
    }

    pub fn try_reuse(&self, order: &Order, run_level: RunLevel) -> Option<CertificateInfoCache> {
        reusable(
            self.cache.cached_info(order),
            self.reuse_days,
            run_level,
            &order.friendly_name_intermediate(),
            Utc::now(),
        )
    }
}

/// Applies the reuse rules to a cache entry; the first failing rule wins.
pub fn reusable(
    cached: Option<CertificateInfoCache>,
    reuse_days: i64,
    run_level: RunLevel,
    friendly_name: &str,
    now: DateTime<Utc>,
) -> Option<CertificateInfoCache> {
    let cached = cached?;
    if now - cached.last_write >= Duration::days(reuse_days) {
        debug!("[cache] entry for {friendly_name} is too old to reuse");
        return None;
    }
    // Without the key the certificate cannot be installed again.
    if !cached.certificate.has_private_key() {
        debug!("[cache] entry for {friendly_name} has no private key");
        return None;
    }
    if run_level.contains(RunLevel::NO_CACHE) {
        warn!("[cache] cached certificate available but not used due to --nocache switch");
        return None;
    }
    info!(
        "[cache] using cache for {friendly_name}. To get a new certificate within {reuse_days} days, run with --nocache."
    );
    Some(cached)
}
