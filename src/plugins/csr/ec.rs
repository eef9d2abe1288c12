use std::{path::Path, sync::Mutex};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::{debug, info};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_ECDSA_P256_SHA256,
    PKCS_ECDSA_P384_SHA384, SignatureAlgorithm,
};
use serde::{Deserialize, Serialize};

use crate::{
    core::types::{PrivateKeyPem, Target},
    plugins::{CsrPlugin, Plugin},
    storage::files::write_secure_file,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EcCurve {
    #[default]
    P256,
    P384,
}

impl EcCurve {
    fn algorithm(self) -> &'static SignatureAlgorithm {
        match self {
            EcCurve::P256 => &PKCS_ECDSA_P256_SHA256,
            EcCurve::P384 => &PKCS_ECDSA_P384_SHA384,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EcCsrOptions {
    #[serde(default)]
    pub curve: EcCurve,
    /// Keep using the same key across renewals.
    #[serde(default)]
    pub reuse_private_key: bool,
}

/// Elliptic-curve key pair and signing request generated with rcgen.
pub struct EcCsr {
    options: EcCsrOptions,
    last_key: Mutex<Option<PrivateKeyPem>>,
}

impl EcCsr {
    pub fn new(options: EcCsrOptions) -> Self {
        Self {
            options,
            last_key: Mutex::new(None),
        }
    }

    async fn key_pair(&self, key_path: Option<&Path>) -> Result<KeyPair> {
        if let Some(path) = key_path.filter(|_| self.options.reuse_private_key) {
            if path.exists() {
                let pem = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read key from {}", path.display()))?;
                debug!("[csr] reusing private key from {}", path.display());
                return KeyPair::from_pem(&pem).map_err(|e| anyhow!("invalid cached key: {e}"));
            }
            let key = KeyPair::generate_for(self.options.curve.algorithm())
                .map_err(|e| anyhow!("failed to generate key pair: {e}"))?;
            write_secure_file(path, key.serialize_pem().as_bytes())?;
            info!("[csr] stored reusable private key at {}", path.display());
            return Ok(key);
        }
        KeyPair::generate_for(self.options.curve.algorithm())
            .map_err(|e| anyhow!("failed to generate key pair: {e}"))
    }
}

impl Plugin for EcCsr {
    fn id(&self) -> &str {
        "ec"
    }

    fn name(&self) -> &str {
        "EC"
    }
}

#[async_trait]
impl CsrPlugin for EcCsr {
    async fn generate_csr(&self, target: &Target, key_path: Option<&Path>) -> Result<Vec<u8>> {
        let names: Vec<String> = target.identifiers().iter().map(|i| i.value()).collect();
        let mut params = CertificateParams::new(names)
            .map_err(|e| anyhow!("invalid subject alternative names: {e}"))?;
        if let Some(cn) = target.common_name() {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, cn.value());
            params.distinguished_name = dn;
        }
        let key = self.key_pair(key_path).await?;
        let csr = params
            .serialize_request(&key)
            .map_err(|e| anyhow!("failed to create CSR: {e}"))?;
        let pem = PrivateKeyPem::new(key.serialize_pem());
        *self
            .last_key
            .lock()
            .map_err(|err| anyhow!("key slot poisoned: {err}"))? = Some(pem);
        Ok(csr.der().to_vec())
    }

    async fn get_keys(&self) -> Result<PrivateKeyPem> {
        self.last_key
            .lock()
            .map_err(|err| anyhow!("key slot poisoned: {err}"))?
            .clone()
            .ok_or_else(|| anyhow!("no key pair generated yet"))
    }

    fn reuse_private_key(&self) -> bool {
        self.options.reuse_private_key
    }
}
