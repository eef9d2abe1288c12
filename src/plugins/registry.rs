use std::{collections::HashMap, sync::Arc};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::warn;

use super::{
    Capability, CsrPlugin, InstallationPlugin, OrderPlugin, OrderValidator, Plugin, StorePlugin,
    TargetPlugin,
    csr::EcCsr,
    install::ScriptInstaller,
    order::{HostOrder, SingleOrder},
    store::PemFilesStore,
    target::{CsrTarget, ManualTarget},
    validation::{SELF_HOSTING_VALIDATOR, SelfHostingValidator},
};
use crate::{
    core::{
        run_level::RunLevel,
        script::ScriptClient,
        settings::Settings,
        types::{Order, PluginOptions, PrivateKeyPem, Renewal, StoreInfo, Target},
    },
    issuance::{
        authority::AcmeAuthority, certificate::CertificateInfoCache, challenge::ChallengeListener,
    },
};

pub const DEFAULT_ORDER_PLUGIN: &str = "single";
pub const DEFAULT_CSR_PLUGIN: &str = "ec";

/// What a factory may draw on when building a plugin for one renewal.
pub struct PluginContext<'a> {
    pub settings: &'a Settings,
    pub scripts: &'a ScriptClient,
    pub renewal: &'a Renewal,
}

type Factory<P> = Box<dyn Fn(&PluginOptions, &PluginContext<'_>) -> Result<Arc<P>> + Send + Sync>;

/// Resolves plugin options to implementations by stable identifier.
pub struct PluginRegistry {
    settings: Arc<Settings>,
    scripts: ScriptClient,
    targets: HashMap<String, Factory<dyn TargetPlugin>>,
    orders: HashMap<String, Factory<dyn OrderPlugin>>,
    csrs: HashMap<String, Factory<dyn CsrPlugin>>,
    validators: HashMap<String, Factory<dyn OrderValidator>>,
    stores: HashMap<String, Factory<dyn StorePlugin>>,
    installers: HashMap<String, Factory<dyn InstallationPlugin>>,
}

impl PluginRegistry {
    pub fn new(settings: Arc<Settings>) -> Self {
        let scripts = ScriptClient::new(&settings.script);
        Self {
            settings,
            scripts,
            targets: HashMap::new(),
            orders: HashMap::new(),
            csrs: HashMap::new(),
            validators: HashMap::new(),
            stores: HashMap::new(),
            installers: HashMap::new(),
        }
    }

    /// Registry with every plugin shipped in this crate.
    pub fn with_builtins(settings: Arc<Settings>) -> Self {
        let mut registry = Self::new(settings);
        registry.register_target("manual", |options, _| {
            Ok(Arc::new(ManualTarget::new(options.parse()?)))
        });
        registry.register_target("csr", |options, _| Ok(Arc::new(CsrTarget::new(options.parse()?))));
        registry.register_order("single", |_, _| Ok(Arc::new(SingleOrder)));
        registry.register_order("host", |_, _| Ok(Arc::new(HostOrder)));
        registry.register_csr("ec", |options, _| Ok(Arc::new(EcCsr::new(options.parse()?))));
        registry.register_store("pemfiles", |options, context| {
            Ok(Arc::new(PemFilesStore::new(
                options.parse()?,
                context.settings.store.pem_files_path.as_deref(),
            )))
        });
        registry.register_installer("script", |options, context| {
            Ok(Arc::new(ScriptInstaller::new(
                options.parse()?,
                &context.renewal.id,
                context.scripts.clone(),
            )))
        });
        registry
    }

    /// Registers the `selfhosting` validator, answering challenges through
    /// `listener` for orders placed with `authority`.
    pub fn register_self_hosting(
        &mut self,
        authority: Arc<dyn AcmeAuthority>,
        listener: Arc<ChallengeListener>,
    ) {
        self.register_validator(SELF_HOSTING_VALIDATOR, move |_, context| {
            Ok(Arc::new(SelfHostingValidator::new(
                authority.clone(),
                listener.clone(),
                &context.settings.validation,
            )))
        });
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn scripts(&self) -> &ScriptClient {
        &self.scripts
    }

    pub fn register_target<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&PluginOptions, &PluginContext<'_>) -> Result<Arc<dyn TargetPlugin>> + Send + Sync + 'static,
    {
        self.targets.insert(id.to_string(), Box::new(factory));
    }

    pub fn register_order<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&PluginOptions, &PluginContext<'_>) -> Result<Arc<dyn OrderPlugin>> + Send + Sync + 'static,
    {
        self.orders.insert(id.to_string(), Box::new(factory));
    }

    pub fn register_csr<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&PluginOptions, &PluginContext<'_>) -> Result<Arc<dyn CsrPlugin>> + Send + Sync + 'static,
    {
        self.csrs.insert(id.to_string(), Box::new(factory));
    }

    pub fn register_validator<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&PluginOptions, &PluginContext<'_>) -> Result<Arc<dyn OrderValidator>> + Send + Sync + 'static,
    {
        self.validators.insert(id.to_string(), Box::new(factory));
    }

    pub fn register_store<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&PluginOptions, &PluginContext<'_>) -> Result<Arc<dyn StorePlugin>> + Send + Sync + 'static,
    {
        self.stores.insert(id.to_string(), Box::new(factory));
    }

    pub fn register_installer<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&PluginOptions, &PluginContext<'_>) -> Result<Arc<dyn InstallationPlugin>> + Send + Sync + 'static,
    {
        self.installers.insert(id.to_string(), Box::new(factory));
    }

    fn context<'a>(&'a self, renewal: &'a Renewal) -> PluginContext<'a> {
        PluginContext {
            settings: &self.settings,
            scripts: &self.scripts,
            renewal,
        }
    }

    fn resolve<P: ?Sized>(
        &self,
        factories: &HashMap<String, Factory<P>>,
        role: &str,
        options: &PluginOptions,
        renewal: &Renewal,
        unsupported: fn(Unsupported) -> Arc<P>,
    ) -> Arc<P> {
        let Some(factory) = factories.get(&options.plugin) else {
            return unsupported(Unsupported::new(
                &options.plugin,
                format!("{role} plugin '{}' is not available", options.plugin),
            ));
        };
        match factory(options, &self.context(renewal)) {
            Ok(plugin) => plugin,
            Err(err) => {
                warn!(
                    "[renewal] unable to create {role} plugin '{}': {err:#}",
                    options.plugin
                );
                unsupported(Unsupported::new(
                    &options.plugin,
                    format!("{role} plugin '{}' could not be created: {err:#}", options.plugin),
                ))
            }
        }
    }

    pub fn target(&self, renewal: &Renewal) -> Arc<dyn TargetPlugin> {
        self.resolve(&self.targets, "target", &renewal.target_plugin_options, renewal, |u| {
            Arc::new(u)
        })
    }

    pub fn order(&self, renewal: &Renewal) -> Arc<dyn OrderPlugin> {
        let options = renewal
            .order_plugin_options
            .clone()
            .unwrap_or_else(|| PluginOptions::new(DEFAULT_ORDER_PLUGIN));
        self.resolve(&self.orders, "order", &options, renewal, |u| Arc::new(u))
    }

    /// A fresh instance per call, since CSR plugins hold the key of their last request.
    pub fn csr(&self, renewal: &Renewal) -> Arc<dyn CsrPlugin> {
        let options = renewal
            .csr_plugin_options
            .clone()
            .unwrap_or_else(|| PluginOptions::new(DEFAULT_CSR_PLUGIN));
        self.resolve(&self.csrs, "CSR", &options, renewal, |u| Arc::new(u))
    }

    pub fn validator(&self, renewal: &Renewal) -> Arc<dyn OrderValidator> {
        self.resolve(
            &self.validators,
            "validation",
            &renewal.validation_plugin_options,
            renewal,
            |u| Arc::new(u),
        )
    }

    /// Store plugins in declared order, skipping explicit `none` entries.
    pub fn stores(&self, renewal: &Renewal) -> Vec<Arc<dyn StorePlugin>> {
        renewal
            .store_plugin_options
            .iter()
            .filter(|options| !options.is_null())
            .map(|options| self.resolve(&self.stores, "store", options, renewal, |u| Arc::new(u)))
            .collect()
    }

    pub fn installers(&self, renewal: &Renewal) -> Vec<Arc<dyn InstallationPlugin>> {
        renewal
            .installation_plugin_options
            .iter()
            .filter(|options| !options.is_null())
            .map(|options| {
                self.resolve(&self.installers, "installation", options, renewal, |u| {
                    Arc::new(u)
                })
            })
            .collect()
    }
}

/// Stand-in for a plugin that could not be resolved; always disabled.
pub struct Unsupported {
    id: String,
    reason: String,
}

impl Unsupported {
    pub fn new(id: &str, reason: String) -> Self {
        Self {
            id: id.to_string(),
            reason,
        }
    }
}

impl Plugin for Unsupported {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> Capability {
        Capability::Disabled(self.reason.clone())
    }
}

#[async_trait]
impl TargetPlugin for Unsupported {
    async fn generate(&self) -> Result<Option<Target>> {
        Err(anyhow!(self.reason.clone()))
    }
}

impl OrderPlugin for Unsupported {
    fn split(&self, _renewal: &Renewal, _target: &Target) -> Vec<Order> {
        Vec::new()
    }
}

#[async_trait]
impl CsrPlugin for Unsupported {
    async fn generate_csr(&self, _target: &Target, _key_path: Option<&std::path::Path>) -> Result<Vec<u8>> {
        Err(anyhow!(self.reason.clone()))
    }

    async fn get_keys(&self) -> Result<PrivateKeyPem> {
        Err(anyhow!(self.reason.clone()))
    }
}

#[async_trait]
impl OrderValidator for Unsupported {
    async fn validate_orders(&self, _orders: &mut [&mut Order], _run_level: RunLevel) -> Result<()> {
        Err(anyhow!(self.reason.clone()))
    }
}

#[async_trait]
impl StorePlugin for Unsupported {
    async fn save(&self, _certificate: &CertificateInfoCache) -> Result<Option<StoreInfo>> {
        Err(anyhow!(self.reason.clone()))
    }

    async fn delete(&self, _certificate: &CertificateInfoCache) -> Result<()> {
        Err(anyhow!(self.reason.clone()))
    }
}

#[async_trait]
impl InstallationPlugin for Unsupported {
    async fn install(
        &self,
        _store_info: &HashMap<String, StoreInfo>,
        _new_certificate: &CertificateInfoCache,
        _old_certificate: Option<&CertificateInfoCache>,
    ) -> Result<bool> {
        Err(anyhow!(self.reason.clone()))
    }
}
