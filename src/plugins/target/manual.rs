use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    core::types::{Target, TargetPart},
    domain::Identifier,
    plugins::{Plugin, TargetPlugin},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualTargetOptions {
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Defaults to the first host.
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub friendly_name: Option<String>,
}

/// Target built from a host list typed in by the user.
pub struct ManualTarget {
    options: ManualTargetOptions,
}

impl ManualTarget {
    pub fn new(options: ManualTargetOptions) -> Self {
        Self { options }
    }
}

impl Plugin for ManualTarget {
    fn id(&self) -> &str {
        "manual"
    }

    fn name(&self) -> &str {
        "Manual"
    }
}

#[async_trait]
impl TargetPlugin for ManualTarget {
    async fn generate(&self) -> Result<Option<Target>> {
        let mut identifiers = Vec::with_capacity(self.options.hosts.len());
        for host in &self.options.hosts {
            let identifier = Identifier::parse(host)
                .map_err(|e| anyhow!("invalid host '{host}': {e}"))?;
            if !identifiers.contains(&identifier) {
                identifiers.push(identifier);
            }
        }
        let Some(first) = identifiers.first().cloned() else {
            return Ok(None);
        };
        let common_name = match &self.options.common_name {
            Some(cn) => Identifier::parse(cn)?,
            None => first,
        };
        let friendly_name = self
            .options
            .friendly_name
            .clone()
            .or_else(|| Some(format!("[Manual] {}", common_name.display_value())));
        Ok(Some(Target::new(
            friendly_name,
            Some(common_name),
            vec![TargetPart::new(identifiers)],
        )))
    }
}
