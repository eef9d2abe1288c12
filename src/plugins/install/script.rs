use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    core::{script::ScriptClient, types::StoreInfo},
    issuance::certificate::CertificateInfoCache,
    plugins::{Capability, InstallationPlugin, Plugin},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptInstallerOptions {
    #[serde(default)]
    pub script: Option<String>,
    /// Whitespace separated arguments; `{Token}` placeholders are replaced
    /// inside each argument.
    #[serde(default)]
    pub parameters: Option<String>,
}

/// Runs an external program after the certificate has been stored.
pub struct ScriptInstaller {
    options: ScriptInstallerOptions,
    renewal_id: String,
    client: ScriptClient,
}

impl ScriptInstaller {
    pub fn new(options: ScriptInstallerOptions, renewal_id: &str, client: ScriptClient) -> Self {
        Self {
            options,
            renewal_id: renewal_id.to_string(),
            client,
        }
    }

    fn arguments(
        &self,
        store_info: &HashMap<String, StoreInfo>,
        new_certificate: &CertificateInfoCache,
        old_certificate: Option<&CertificateInfoCache>,
    ) -> Vec<String> {
        let template = self.options.parameters.as_deref().unwrap_or_default();
        // Lowest plugin id first so the choice does not depend on map order.
        let store = store_info
            .iter()
            .min_by(|a, b| a.0.cmp(b.0))
            .map(|(_, info)| info);
        let certificate = &new_certificate.certificate;
        let tokens: [(&str, String); 8] = [
            (
                "{CertCommonName}",
                certificate.common_name.clone().unwrap_or_default(),
            ),
            ("{CertFriendlyName}", certificate.friendly_name.clone()),
            ("{CertThumbprint}", certificate.thumbprint.clone()),
            (
                "{OldCertThumbprint}",
                old_certificate
                    .map(|old| old.thumbprint().to_string())
                    .unwrap_or_default(),
            ),
            (
                "{StorePath}",
                store.and_then(|s| s.path.clone()).unwrap_or_default(),
            ),
            (
                "{StoreType}",
                store.map(|s| s.name.clone()).unwrap_or_default(),
            ),
            ("{RenewalId}", self.renewal_id.clone()),
            (
                "{CacheFile}",
                new_certificate.cache_file.display().to_string(),
            ),
        ];
        template
            .split_whitespace()
            .map(|argument| {
                tokens
                    .iter()
                    .fold(argument.to_string(), |acc, (token, value)| {
                        acc.replace(token, value)
                    })
            })
            .collect()
    }
}

impl Plugin for ScriptInstaller {
    fn id(&self) -> &str {
        "script"
    }

    fn name(&self) -> &str {
        "Script"
    }

    fn capability(&self) -> Capability {
        match self.options.script.as_deref().map(str::trim) {
            Some(script) if !script.is_empty() => Capability::Enabled,
            _ => Capability::disabled("no script configured"),
        }
    }
}

#[async_trait]
impl InstallationPlugin for ScriptInstaller {
    async fn install(
        &self,
        store_info: &HashMap<String, StoreInfo>,
        new_certificate: &CertificateInfoCache,
        old_certificate: Option<&CertificateInfoCache>,
    ) -> Result<bool> {
        let script = self.options.script.as_deref().unwrap_or_default();
        let arguments = self.arguments(store_info, new_certificate, old_certificate);
        Ok(self.client.run_script(script, &arguments).await)
    }
}
