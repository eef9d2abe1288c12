use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use pem::Pem;
use thiserror::Error;

use super::{
    authority::{AcmeAuthority, AuthorityError, OrderStatus},
    certificate::{CertificateInfoCache, CertificateOption},
    pem::parse_certificate,
    picker::CertificatePicker,
};
use crate::{
    core::types::{Order, PrivateKeyPem, Renewal},
    plugins::CsrPlugin,
    storage::cache::CertificateCache,
};

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("no order details found")]
    MissingOrderDetails,
    #[error("missing CSR plugin")]
    MissingCsrPlugin,
    #[error("unable to generate signing request: {0}")]
    Csr(String),
    #[error("unable to complete order, status {0:?}")]
    UnexpectedStatus(OrderStatus),
    #[error("unable to get certificate: {0}")]
    Download(String),
    #[error("no certificate could be parsed from the response")]
    NoCertificate,
    #[error("the first certificate in the response could not be parsed")]
    MalformedLeaf,
    #[error("unable to cache certificate: {0}")]
    Cache(String),
    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

/// Turns authority-side orders into cached certificates.
pub struct CertificateService {
    authority: Arc<dyn AcmeAuthority>,
    cache: Arc<CertificateCache>,
    picker: CertificatePicker,
}

impl CertificateService {
    pub fn new(
        authority: Arc<dyn AcmeAuthority>,
        cache: Arc<CertificateCache>,
        picker: CertificatePicker,
    ) -> Self {
        Self {
            authority,
            cache,
            picker,
        }
    }

    pub fn authority(&self) -> &Arc<dyn AcmeAuthority> {
        &self.authority
    }

    /// Finalizes the order, downloads every offered chain, picks one and caches it.
    pub async fn request_certificate(
        &self,
        csr_plugin: Option<&dyn CsrPlugin>,
        order: &mut Order,
    ) -> Result<CertificateInfoCache, AcquisitionError> {
        let details = order
            .details
            .clone()
            .ok_or(AcquisitionError::MissingOrderDetails)?;
        let friendly_name = format!(
            "{} @ {}",
            order.friendly_name_intermediate(),
            Utc::now().format("%Y/%m/%d")
        );

        // The request is generated and cached even when the authority
        // already holds a valid order, so the cache keeps an audit trail.
        order.target.csr = order.target.user_csr.clone();
        if order.target.user_private_key.is_some() {
            order.target.private_key = order.target.user_private_key.clone();
        }
        if order.target.csr.is_none() {
            let plugin = csr_plugin.ok_or(AcquisitionError::MissingCsrPlugin)?;
            let csr = plugin
                .generate_csr(&order.target, order.key_path.as_deref())
                .await
                .map_err(|e| AcquisitionError::Csr(format!("{e:#}")))?;
            let keys = plugin
                .get_keys()
                .await
                .map_err(|e| AcquisitionError::Csr(format!("{e:#}")))?;
            order.target.csr = Some(csr);
            order.target.private_key = Some(keys);
        }
        let csr = order
            .target
            .csr
            .clone()
            .ok_or_else(|| AcquisitionError::Csr("no signing request available".into()))?;
        let csr_pem = pem::encode(&Pem::new("CERTIFICATE REQUEST", csr.clone()));
        self.cache
            .store_csr(order, &csr_pem)
            .map_err(|e| AcquisitionError::Cache(format!("{e:#}")))?;

        let mut details = details;
        if details.status != OrderStatus::Valid {
            debug!("[issuance] submitting signing request");
            details = self.authority.submit_csr(&details, &csr).await?;
            order.details = Some(details.clone());
            if details.status != OrderStatus::Valid {
                error!("[issuance] unexpected order status {:?}", details.status);
                return Err(AcquisitionError::UnexpectedStatus(details.status));
            }
        }

        info!(
            "[issuance] downloading certificate {}",
            order.friendly_name_intermediate()
        );
        let selected = self
            .download_certificate(&details, &friendly_name, order.target.private_key.clone())
            .await?;

        let selected = match csr_plugin {
            Some(plugin) => post_process(plugin, selected, &friendly_name).await,
            None => selected,
        };

        self.cache
            .store_certificate(order, &selected)
            .map_err(|e| AcquisitionError::Cache(format!("{e:#}")))
    }

    async fn download_certificate(
        &self,
        details: &super::authority::OrderDetails,
        friendly_name: &str,
        private_key: Option<PrivateKeyPem>,
    ) -> Result<CertificateOption, AcquisitionError> {
        let primary = self
            .authority
            .get_certificate(details)
            .await
            .map_err(|e| AcquisitionError::Download(e.to_string()))?;
        if primary.certificate.is_empty() {
            return Err(AcquisitionError::Download("empty response".into()));
        }
        let mut options = vec![CertificateOption::new(parse_certificate(
            &primary.certificate,
            friendly_name,
            private_key.clone(),
        )?)];

        let alternates = join_all(
            primary
                .alternate_links
                .iter()
                .map(|link| self.authority.get_alternate(link)),
        )
        .await;
        for (link, downloaded) in primary.alternate_links.iter().zip(alternates) {
            let parsed = downloaded
                .map_err(AcquisitionError::from)
                .and_then(|bytes| parse_certificate(&bytes, friendly_name, private_key.clone()));
            match parsed {
                Ok(info) => options.push(CertificateOption::new(info)),
                Err(err) => warn!("[issuance] unable to get alternate certificate {link}: {err}"),
            }
        }
        debug!("[issuance] {} chain option(s) available", options.len());
        self.picker.select(options)
    }

    /// Revokes every cached certificate of a renewal.
    ///
    /// Cache files are removed one by one as their certificate is revoked;
    /// the whole renewal cache is cleared only when all revocations succeed.
    pub async fn revoke_certificate(&self, renewal: &Renewal) -> bool {
        let renewal_id = renewal.id.as_str();
        let mut all_revoked = true;
        for entry in self.cache.cached_infos(renewal_id) {
            let name = entry.certificate.friendly_name.clone();
            match self
                .authority
                .revoke_certificate(&entry.certificate.leaf().der)
                .await
            {
                Ok(()) => {
                    warn!("[issuance] revoked certificate {name}");
                    if let Err(err) = self.cache.delete_entry(&entry) {
                        warn!("[cache] {err:#}");
                    }
                }
                Err(err) => {
                    all_revoked = false;
                    error!("[issuance] error revoking certificate {name}, please retry: {err}");
                }
            }
        }
        if all_revoked {
            if let Err(err) = self.cache.delete_renewal(renewal_id) {
                warn!("[cache] {err:#}");
            }
        }
        all_revoked
    }
}

async fn post_process(
    plugin: &dyn CsrPlugin,
    selected: CertificateOption,
    friendly_name: &str,
) -> CertificateOption {
    match plugin.post_process(&selected.with_private_key).await {
        Ok(Some(replacement)) => {
            debug!("[issuance] certificate replaced by post-processing");
            let replacement = replacement.with_friendly_name(friendly_name);
            CertificateOption {
                without_private_key: replacement.without_private_key(),
                with_private_key: replacement,
            }
        }
        Ok(None) => selected,
        Err(err) => {
            warn!("[issuance] private key conversion error: {err:#}");
            selected
        }
    }
}
