use std::{collections::BTreeSet, fmt, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::domain::Identifier;
use crate::issuance::authority::{OrderDetails, OrderStatus};

/// ACME servers reject orders with more identifiers than this.
pub const MAX_IDENTIFIERS: usize = 100;

/// Plugin identifier used to state "do nothing" explicitly in store/install lists.
pub const NULL_PLUGIN: &str = "none";

/// Reference to a plugin by stable identifier plus its free-form parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginOptions {
    pub plugin: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl PluginOptions {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn is_null(&self) -> bool {
        self.plugin == NULL_PLUGIN
    }

    /// Deserializes the parameters into the plugin's own options type.
    pub fn parse<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if self.params.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.params.clone())
            .with_context(|| format!("invalid options for plugin '{}'", self.plugin))
    }
}

/// Persisted configuration describing one certificate lifecycle goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Renewal {
    pub id: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub last_friendly_name: Option<String>,
    pub target_plugin_options: PluginOptions,
    pub validation_plugin_options: PluginOptions,
    #[serde(default)]
    pub order_plugin_options: Option<PluginOptions>,
    #[serde(default)]
    pub csr_plugin_options: Option<PluginOptions>,
    #[serde(default)]
    pub store_plugin_options: Vec<PluginOptions>,
    #[serde(default)]
    pub installation_plugin_options: Vec<PluginOptions>,
    /// Append-only, oldest first.
    #[serde(default)]
    pub history: Vec<RenewResult>,
    #[serde(skip)]
    pub new: bool,
    #[serde(skip)]
    pub updated: bool,
    #[serde(skip)]
    pub deleted: bool,
}

impl Renewal {
    pub fn create(target: PluginOptions, validation: PluginOptions) -> Self {
        Self {
            id: Uuid::new_v4().as_simple().to_string(),
            friendly_name: None,
            last_friendly_name: None,
            target_plugin_options: target,
            validation_plugin_options: validation,
            order_plugin_options: None,
            csr_plugin_options: None,
            store_plugin_options: Vec::new(),
            installation_plugin_options: Vec::new(),
            history: Vec::new(),
            new: true,
            updated: false,
            deleted: false,
        }
    }

    pub fn display_name(&self) -> &str {
        self.last_friendly_name
            .as_deref()
            .or(self.friendly_name.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Outcome of one execution pass for a renewal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewResult {
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub success: Option<bool>,
    /// Nothing needed to be done; never persisted.
    #[serde(skip)]
    pub abort: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_messages: Vec<String>,
    #[serde(default)]
    pub order_results: Vec<OrderResult>,
}

impl Default for RenewResult {
    fn default() -> Self {
        Self {
            date: Utc::now(),
            success: None,
            abort: false,
            error_messages: Vec::new(),
            order_results: Vec::new(),
        }
    }
}

impl RenewResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let mut result = Self::default();
        result.add_error_message(message);
        result
    }

    pub fn aborted() -> Self {
        Self {
            abort: true,
            ..Self::default()
        }
    }

    pub fn add_error_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.error_messages.contains(&message) {
            self.error_messages.push(message);
        }
        self.success = Some(false);
    }

    /// Sorted, `|`-joined thumbprints of the successful orders.
    pub fn thumbprint_summary(&self) -> String {
        let thumbprints: BTreeSet<&str> = self
            .order_results
            .iter()
            .filter(|o| o.success == Some(true))
            .filter_map(|o| o.thumbprint.as_deref())
            .collect();
        thumbprints.into_iter().collect::<Vec<_>>().join("|")
    }

    /// Earliest expiry among the orders of this result.
    pub fn expire_date(&self) -> Option<DateTime<Utc>> {
        self.order_results.iter().filter_map(|o| o.expire_date).min()
    }

    /// Every error message, pass-level first, then per order.
    pub fn all_error_messages(&self) -> Vec<String> {
        let mut messages = self.error_messages.clone();
        for order in &self.order_results {
            messages.extend(order.error_messages.iter().cloned());
        }
        messages
    }
}

/// Outcome of a single order within a pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub name: String,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_messages: Vec<String>,
    #[serde(default)]
    pub thumbprint: Option<String>,
    #[serde(default)]
    pub expire_date: Option<DateTime<Utc>>,
}

impl OrderResult {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Records a deduplicated error; a fatal one marks the order as failed.
    pub fn add_error_message(&mut self, message: impl Into<String>, fatal: bool) {
        let message = message.into();
        if !self.error_messages.contains(&message) {
            self.error_messages.push(message);
        }
        if fatal {
            self.success = Some(false);
        }
    }

    /// Marks the order successful unless a failure was already recorded.
    pub fn set_success(&mut self) {
        if self.success != Some(false) {
            self.success = Some(true);
        }
    }

    pub fn is_failed(&self) -> bool {
        self.success == Some(false)
    }
}

/// PEM encoded private key, wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKeyPem(Zeroizing<String>);

impl PrivateKeyPem {
    pub fn new(pem: impl Into<String>) -> Self {
        Self(Zeroizing::new(pem.into()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for PrivateKeyPem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKeyPem(<redacted>)")
    }
}

/// Identifiers sharing deployment metadata, e.g. the bindings of one web site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPart {
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub label: Option<String>,
}

impl TargetPart {
    pub fn new(identifiers: Vec<Identifier>) -> Self {
        Self {
            identifiers,
            label: None,
        }
    }
}

/// Resolved set of identifiers to certify for one renewal at a point in time.
#[derive(Debug, Clone)]
pub struct Target {
    pub friendly_name: Option<String>,
    /// Explicit common name; must be one of the identifiers.
    pub common_name: Option<Identifier>,
    pub parts: Vec<TargetPart>,
    /// DER signing request supplied by the user, bypassing CSR generation.
    pub user_csr: Option<Vec<u8>>,
    pub user_private_key: Option<PrivateKeyPem>,
    /// DER signing request actually submitted.
    pub csr: Option<Vec<u8>>,
    pub private_key: Option<PrivateKeyPem>,
}

impl Target {
    pub fn new(friendly_name: Option<String>, common_name: Option<Identifier>, parts: Vec<TargetPart>) -> Self {
        Self {
            friendly_name,
            common_name,
            parts,
            user_csr: None,
            user_private_key: None,
            csr: None,
            private_key: None,
        }
    }

    pub fn from_identifier(identifier: Identifier) -> Self {
        Self::new(
            Some(identifier.value()),
            Some(identifier.clone()),
            vec![TargetPart::new(vec![identifier])],
        )
    }

    /// Union of all identifiers across parts, sorted and deduplicated.
    pub fn identifiers(&self) -> Vec<Identifier> {
        let unique: BTreeSet<&Identifier> =
            self.parts.iter().flat_map(|p| p.identifiers.iter()).collect();
        unique.into_iter().cloned().collect()
    }

    /// Explicit common name, otherwise the first identifier of the first part.
    pub fn common_name(&self) -> Option<Identifier> {
        self.common_name.clone().or_else(|| {
            self.parts
                .iter()
                .flat_map(|p| p.identifiers.iter())
                .next()
                .cloned()
        })
    }

    pub fn is_valid(&self) -> bool {
        if self.parts.is_empty() || self.parts.iter().any(|p| p.identifiers.is_empty()) {
            warn!("[target] target has no identifiers");
            return false;
        }
        let identifiers = self.identifiers();
        if identifiers.len() > MAX_IDENTIFIERS {
            warn!(
                "[target] target has {} identifiers, more than the maximum of {}",
                identifiers.len(),
                MAX_IDENTIFIERS
            );
            return false;
        }
        if let Some(cn) = &self.common_name {
            if !identifiers.contains(cn) {
                warn!("[target] common name {cn} is not one of the identifiers");
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cn = self
            .common_name()
            .map(|c| c.display_value())
            .unwrap_or_else(|| "(empty)".to_string());
        write!(f, "{cn}")?;
        let alternatives = self.identifiers().len().saturating_sub(1);
        if alternatives > 0 {
            write!(
                f,
                " and {alternatives} alternative{}",
                if alternatives > 1 { "s" } else { "" }
            )?;
        }
        Ok(())
    }
}

/// One certificate request derived from splitting a target.
#[derive(Debug, Clone)]
pub struct Order {
    pub renewal_id: String,
    pub target: Target,
    /// Disambiguates cache files when a renewal yields several orders.
    pub cache_key_part: Option<String>,
    pub friendly_name_part: Option<String>,
    renewal_friendly_name: Option<String>,
    pub details: Option<OrderDetails>,
    /// Location of a reusable private key, when the CSR plugin asks for reuse.
    pub key_path: Option<PathBuf>,
}

impl Order {
    pub fn new(
        renewal: &Renewal,
        target: Target,
        friendly_name_part: Option<String>,
        cache_key_part: Option<String>,
    ) -> Self {
        Self {
            renewal_id: renewal.id.clone(),
            target,
            cache_key_part,
            friendly_name_part,
            renewal_friendly_name: renewal.friendly_name.clone(),
            details: None,
            key_path: None,
        }
    }

    pub fn friendly_name_base(&self) -> String {
        self.renewal_friendly_name
            .clone()
            .or_else(|| self.target.friendly_name.clone())
            .or_else(|| self.target.common_name().map(|c| c.display_value()))
            .unwrap_or_else(|| self.renewal_id.clone())
    }

    pub fn friendly_name_intermediate(&self) -> String {
        match &self.friendly_name_part {
            Some(part) => format!("{} [{}]", self.friendly_name_base(), part),
            None => self.friendly_name_base(),
        }
    }

    pub fn cache_part(&self) -> &str {
        self.cache_key_part.as_deref().unwrap_or("main")
    }

    /// Short hash of the certificate shape (common name and identifiers).
    pub fn shape_key(&self) -> String {
        let mut hasher = Sha256::new();
        if let Some(cn) = self.target.common_name() {
            hasher.update(cn.value().as_bytes());
        }
        for identifier in self.target.identifiers() {
            hasher.update(b"|");
            hasher.update(identifier.value().as_bytes());
        }
        if let Some(csr) = &self.target.user_csr {
            hasher.update(b"|csr|");
            hasher.update(csr);
        }
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }

    /// Authorizations are complete (ready) or the certificate is issued (valid).
    pub fn valid(&self) -> bool {
        matches!(
            self.details.as_ref().map(|d| d.status),
            Some(OrderStatus::Ready) | Some(OrderStatus::Valid)
        )
    }
}

/// Feedback from a store plugin, consumed by installation plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub name: String,
    pub path: Option<String>,
}
