use log::{debug, info, warn};

use super::{certificate::CertificateOption, service::AcquisitionError};

/// Chooses one chain among the primary certificate and its alternates.
#[derive(Debug, Clone, Default)]
pub struct CertificatePicker {
    preferred_issuer: Option<String>,
}

impl CertificatePicker {
    pub fn new(preferred_issuer: Option<String>) -> Self {
        Self {
            preferred_issuer: preferred_issuer
                .map(|issuer| issuer.trim().to_string())
                .filter(|issuer| !issuer.is_empty()),
        }
    }

    /// Options are expected in download order, primary first.
    pub fn select(
        &self,
        mut options: Vec<CertificateOption>,
    ) -> Result<CertificateOption, AcquisitionError> {
        if options.is_empty() {
            return Err(AcquisitionError::NoCertificate);
        }
        if let Some(preferred) = &self.preferred_issuer {
            let matched = options.iter().position(|option| {
                option
                    .without_private_key
                    .root_issuer_common_name()
                    .is_some_and(|issuer| issuer.eq_ignore_ascii_case(preferred))
            });
            match matched {
                Some(index) => {
                    info!("[issuance] selected chain issued by preferred issuer {preferred}");
                    return Ok(options.swap_remove(index));
                }
                None => warn!(
                    "[issuance] no chain issued by preferred issuer {preferred}, using default"
                ),
            }
        }
        debug!(
            "[issuance] selecting default chain out of {} option(s)",
            options.len()
        );
        Ok(options.swap_remove(0))
    }
}
