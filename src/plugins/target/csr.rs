use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use x509_parser::{
    certification_request::X509CertificationRequest, extensions::GeneralName,
    extensions::ParsedExtension, prelude::FromDer,
};

use crate::{
    core::types::{PrivateKeyPem, Target, TargetPart},
    domain::Identifier,
    plugins::{Capability, Plugin, TargetPlugin},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CsrTargetOptions {
    pub csr_path: Option<PathBuf>,
    /// Private key matching the request, needed by stores that export keys.
    #[serde(default)]
    pub pkey_path: Option<PathBuf>,
}

/// Target read from a signing request prepared outside this program.
pub struct CsrTarget {
    options: CsrTargetOptions,
}

impl CsrTarget {
    pub fn new(options: CsrTargetOptions) -> Self {
        Self { options }
    }
}

impl Plugin for CsrTarget {
    fn id(&self) -> &str {
        "csr"
    }

    fn name(&self) -> &str {
        "CSR"
    }

    fn capability(&self) -> Capability {
        match &self.options.csr_path {
            Some(_) => Capability::Enabled,
            None => Capability::disabled("no CSR file configured"),
        }
    }
}

#[async_trait]
impl TargetPlugin for CsrTarget {
    async fn generate(&self) -> Result<Option<Target>> {
        let Some(path) = &self.options.csr_path else {
            return Ok(None);
        };
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read CSR from {}", path.display()))?;
        let der = match pem::parse(&raw) {
            Ok(block) => block.contents().to_vec(),
            Err(_) => raw,
        };
        let mut target = target_from_csr(&der)?;
        if let Some(key_path) = &self.options.pkey_path {
            let key = tokio::fs::read_to_string(key_path)
                .await
                .with_context(|| format!("failed to read private key from {}", key_path.display()))?;
            target.user_private_key = Some(PrivateKeyPem::new(key));
        }
        debug!("[target] read {} identifier(s) from {}", target.identifiers().len(), path.display());
        Ok(Some(target))
    }
}

fn target_from_csr(der: &[u8]) -> Result<Target> {
    let (_, request) = X509CertificationRequest::from_der(der)
        .map_err(|e| anyhow!("failed to parse CSR: {e}"))?;
    let common_name = request
        .certification_request_info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(Identifier::parse)
        .transpose()?;

    let mut identifiers: Vec<Identifier> = Vec::new();
    if let Some(extensions) = request.requested_extensions() {
        for extension in extensions {
            let ParsedExtension::SubjectAlternativeName(san) = extension else {
                continue;
            };
            for name in &san.general_names {
                let identifier = match name {
                    GeneralName::DNSName(dns) => Identifier::parse(dns)?,
                    GeneralName::IPAddress(bytes) => match bytes.len() {
                        4 => {
                            let octets: [u8; 4] = (*bytes).try_into()?;
                            Identifier::Ip(octets.into())
                        }
                        16 => {
                            let octets: [u8; 16] = (*bytes).try_into()?;
                            Identifier::Ip(octets.into())
                        }
                        _ => continue,
                    },
                    _ => continue,
                };
                if !identifiers.contains(&identifier) {
                    identifiers.push(identifier);
                }
            }
        }
    }
    if let Some(cn) = &common_name {
        if !identifiers.contains(cn) {
            identifiers.insert(0, cn.clone());
        }
    }

    let mut target = Target::new(
        common_name.as_ref().map(|cn| format!("[CSR] {}", cn.display_value())),
        common_name,
        vec![TargetPart::new(identifiers)],
    );
    target.user_csr = Some(der.to_vec());
    Ok(target)
}
