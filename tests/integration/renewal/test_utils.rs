use std::{
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use serde_json::json;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use uuid::Uuid;

use sslboard_renewal::{
    AutoConfirm, Prompt, RenewalExecutor, Settings,
    core::types::{Order, PluginOptions, Renewal, StoreInfo},
    domain::Identifier,
    issuance::{
        authority::{
            AcmeAuthority, AcmeCertificate, AuthorityError, HttpChallenge, OrderDetails,
            OrderStatus,
        },
        certificate::CertificateInfoCache,
        challenge::ChallengeListener,
        picker::CertificatePicker,
        service::CertificateService,
    },
    plugins::{
        InstallationPlugin, OrderValidator, Plugin, StorePlugin, registry::PluginRegistry,
        validation::SELF_HOSTING_VALIDATOR,
    },
    storage::cache::CertificateCache,
    RunLevel,
};

pub const VALIDATION_PLUGIN: &str = "fake-http";
pub const RECORDING_STORE: &str = "recording";
pub const RECORDING_INSTALLER: &str = "recording";

/// Leaf + CA chain in PEM form for the given names.
pub fn issue_chain(names: &[String], ca_name: &str) -> Result<String> {
    let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
    let mut ca_dn = DistinguishedName::new();
    ca_dn.push(DnType::CommonName, ca_name);
    ca_params.distinguished_name = ca_dn;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_key = KeyPair::generate()?;
    let ca = ca_params.self_signed(&ca_key)?;

    let mut leaf_params = CertificateParams::new(names.to_vec())?;
    let mut leaf_dn = DistinguishedName::new();
    leaf_dn.push(
        DnType::CommonName,
        names.first().cloned().unwrap_or_default(),
    );
    leaf_params.distinguished_name = leaf_dn;
    let leaf_key = KeyPair::generate()?;
    let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key)?;
    Ok(format!("{}{}", leaf.pem(), ca.pem()))
}

/// Authority that issues throwaway chains from an in-memory CA.
///
/// HTTP-01 answers are checked against the listener given to
/// [`FakeAuthority::checking`]; without one every answer is rejected.
pub struct FakeAuthority {
    pub orders_created: AtomicUsize,
    pub csrs_submitted: AtomicUsize,
    pub revoked: AtomicUsize,
    alternates: Vec<String>,
    initial_status: OrderStatus,
    revocation_limit: usize,
    listener: Option<Arc<ChallengeListener>>,
    verified: Mutex<HashSet<String>>,
}

impl FakeAuthority {
    pub fn new() -> Self {
        Self::with_alternates(&[])
    }

    /// Links containing `broken` fail to download.
    pub fn with_alternates(links: &[&str]) -> Self {
        Self {
            orders_created: AtomicUsize::new(0),
            csrs_submitted: AtomicUsize::new(0),
            revoked: AtomicUsize::new(0),
            alternates: links.iter().map(|l| l.to_string()).collect(),
            initial_status: OrderStatus::Pending,
            revocation_limit: usize::MAX,
            listener: None,
            verified: Mutex::new(HashSet::new()),
        }
    }

    /// Verifies challenge answers by fetching them from `listener`.
    pub fn checking(listener: Arc<ChallengeListener>) -> Self {
        Self {
            listener: Some(listener),
            ..Self::new()
        }
    }

    /// Accepts only the first `limit` revocations.
    pub fn revoking_at_most(limit: usize) -> Self {
        Self {
            revocation_limit: limit,
            ..Self::new()
        }
    }

    pub fn rejecting_orders() -> Self {
        Self {
            initial_status: OrderStatus::Invalid,
            ..Self::new()
        }
    }

    pub fn orders_created(&self) -> usize {
        self.orders_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AcmeAuthority for FakeAuthority {
    async fn create_order(&self, identifiers: &[Identifier]) -> Result<OrderDetails, AuthorityError> {
        let n = self.orders_created.fetch_add(1, Ordering::SeqCst);
        Ok(OrderDetails {
            url: format!("https://acme.test/order/{n}"),
            status: self.initial_status,
            identifiers: identifiers.to_vec(),
            authorizations: vec![format!("https://acme.test/authz/{n}")],
            finalize_url: format!("https://acme.test/order/{n}/finalize"),
            certificate_url: None,
            expires: None,
        })
    }

    async fn submit_csr(
        &self,
        details: &OrderDetails,
        csr_der: &[u8],
    ) -> Result<OrderDetails, AuthorityError> {
        if csr_der.is_empty() {
            return Err(AuthorityError::Rejected("empty CSR".into()));
        }
        self.csrs_submitted.fetch_add(1, Ordering::SeqCst);
        let mut details = details.clone();
        if details.status != OrderStatus::Ready {
            return Err(AuthorityError::Rejected(format!(
                "order is {:?}",
                details.status
            )));
        }
        details.status = OrderStatus::Valid;
        details.certificate_url = Some(format!("{}/cert", details.url));
        Ok(details)
    }

    async fn get_certificate(&self, details: &OrderDetails) -> Result<AcmeCertificate, AuthorityError> {
        let names: Vec<String> = details.identifiers.iter().map(Identifier::value).collect();
        let chain = issue_chain(&names, "Fake Root")
            .map_err(|e| AuthorityError::Operation(e.to_string()))?;
        Ok(AcmeCertificate {
            certificate: chain.into_bytes(),
            alternate_links: self
                .alternates
                .iter()
                .map(|link| format!("{link}|{}", names.join(",")))
                .collect(),
        })
    }

    async fn get_alternate(&self, link: &str) -> Result<Vec<u8>, AuthorityError> {
        let (root, names) = link
            .split_once('|')
            .ok_or_else(|| AuthorityError::Operation(format!("bad link {link}")))?;
        if root.contains("broken") {
            return Err(AuthorityError::Unavailable(format!("{root} timed out")));
        }
        let names: Vec<String> = names.split(',').map(str::to_string).collect();
        issue_chain(&names, root)
            .map(String::into_bytes)
            .map_err(|e| AuthorityError::Operation(e.to_string()))
    }

    async fn revoke_certificate(&self, _certificate_der: &[u8]) -> Result<(), AuthorityError> {
        let previous = self.revoked.fetch_add(1, Ordering::SeqCst);
        if previous >= self.revocation_limit {
            return Err(AuthorityError::Unavailable("revocation endpoint down".into()));
        }
        Ok(())
    }

    async fn http_challenges(&self, details: &OrderDetails) -> Result<Vec<HttpChallenge>, AuthorityError> {
        Ok(vec![challenge_for(details)])
    }

    async fn answer_challenge(&self, challenge: &HttpChallenge) -> Result<(), AuthorityError> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| AuthorityError::Rejected("nobody to check the answer".into()))?;
        let addr = listener
            .local_addr()
            .await
            .ok_or_else(|| AuthorityError::Rejected("listener is not running".into()))?;
        let body = fetch(addr.port(), &challenge.token)
            .await
            .map_err(|e| AuthorityError::Unavailable(e.to_string()))?;
        if body != challenge.key_authorization {
            return Err(AuthorityError::Rejected(format!("unexpected answer {body:?}")));
        }
        self.verified
            .lock()
            .map_err(|_| AuthorityError::Operation("poisoned".into()))?
            .insert(challenge.url.clone());
        Ok(())
    }

    async fn refresh_order(&self, details: &OrderDetails) -> Result<OrderDetails, AuthorityError> {
        let mut details = details.clone();
        let verified = self
            .verified
            .lock()
            .map_err(|_| AuthorityError::Operation("poisoned".into()))?
            .contains(&challenge_for(&details).url);
        if verified && details.status == OrderStatus::Pending {
            details.status = OrderStatus::Ready;
        }
        Ok(details)
    }
}

fn challenge_for(details: &OrderDetails) -> HttpChallenge {
    let n = details.url.rsplit('/').next().unwrap_or_default();
    HttpChallenge {
        url: format!("https://acme.test/chall/{n}"),
        token: format!("token-{n}"),
        key_authorization: format!("token-{n}.fake-thumbprint"),
    }
}

/// Body of `GET /.well-known/acme-challenge/<token>`, or an error for non-200 replies.
async fn fetch(port: u16, token: &str) -> Result<String> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let request = format!(
        "GET /.well-known/acme-challenge/{token} HTTP/1.1\r\nHost: acme.test\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;
    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    if !response.starts_with("HTTP/1.1 200") {
        return Err(anyhow!("challenge not served: {}", response.lines().next().unwrap_or_default()));
    }
    let (_, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| anyhow!("malformed response"))?;
    Ok(body.to_string())
}

/// Marks every order it sees as ready and remembers the batch sizes.
#[derive(Default)]
pub struct FakeValidator {
    pub batches: Mutex<Vec<usize>>,
}

impl FakeValidator {
    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

impl Plugin for FakeValidator {
    fn id(&self) -> &str {
        VALIDATION_PLUGIN
    }
}

#[async_trait]
impl OrderValidator for FakeValidator {
    async fn validate_orders(&self, orders: &mut [&mut Order], _run_level: RunLevel) -> Result<()> {
        self.batches
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(orders.len());
        for order in orders.iter_mut() {
            if let Some(details) = order.details.as_mut() {
                details.status = OrderStatus::Ready;
            }
        }
        Ok(())
    }
}

/// Store that keeps saved thumbprints in memory; fails for listed common names.
#[derive(Default)]
pub struct RecordingStore {
    pub saved: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_for: Vec<String>,
}

impl RecordingStore {
    pub fn failing_for(common_names: &[&str]) -> Self {
        Self {
            fail_for: common_names.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn saved(&self) -> Vec<String> {
        self.saved.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Plugin for RecordingStore {
    fn id(&self) -> &str {
        RECORDING_STORE
    }
}

#[async_trait]
impl StorePlugin for RecordingStore {
    async fn save(&self, certificate: &CertificateInfoCache) -> Result<Option<StoreInfo>> {
        let common_name = certificate.certificate.common_name.clone().unwrap_or_default();
        if self.fail_for.contains(&common_name) {
            return Err(anyhow!("no space left for {common_name}"));
        }
        self.saved
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(certificate.thumbprint().to_string());
        Ok(Some(StoreInfo {
            name: "Recording".into(),
            path: Some(format!("memory://{common_name}")),
        }))
    }

    async fn delete(&self, certificate: &CertificateInfoCache) -> Result<()> {
        self.deleted
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push(certificate.thumbprint().to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingInstaller {
    pub installs: Mutex<Vec<(Vec<String>, Option<String>)>>,
}

impl RecordingInstaller {
    pub fn count(&self) -> usize {
        self.installs.lock().map(|i| i.len()).unwrap_or_default()
    }

    /// Store ids and previous thumbprint seen by each install call.
    pub fn installs(&self) -> Vec<(Vec<String>, Option<String>)> {
        self.installs.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

impl Plugin for RecordingInstaller {
    fn id(&self) -> &str {
        RECORDING_INSTALLER
    }
}

#[async_trait]
impl InstallationPlugin for RecordingInstaller {
    async fn install(
        &self,
        store_info: &HashMap<String, StoreInfo>,
        _new_certificate: &CertificateInfoCache,
        old_certificate: Option<&CertificateInfoCache>,
    ) -> Result<bool> {
        let mut stores: Vec<String> = store_info.keys().cloned().collect();
        stores.sort();
        self.installs.lock().map_err(|_| anyhow!("poisoned"))?.push((
            stores,
            old_certificate.map(|old| old.thumbprint().to_string()),
        ));
        Ok(true)
    }
}

/// Everything an executor needs, backed by a fresh temp directory.
pub struct Harness {
    pub dir: PathBuf,
    pub settings: Settings,
    pub authority: Arc<FakeAuthority>,
    pub validator: Arc<FakeValidator>,
    pub store: Arc<RecordingStore>,
    pub installer: Arc<RecordingInstaller>,
    pub prompt: Arc<dyn Prompt>,
}

impl Harness {
    pub fn new() -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("sslboard-renewal-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir)?;
        let mut settings = Settings::with_data_dir(&dir);
        settings.store.pem_files_path = Some(dir.join("pem"));
        Ok(Self {
            dir,
            settings,
            authority: Arc::new(FakeAuthority::new()),
            validator: Arc::new(FakeValidator::default()),
            store: Arc::new(RecordingStore::default()),
            installer: Arc::new(RecordingInstaller::default()),
            prompt: Arc::new(AutoConfirm),
        })
    }

    pub fn cache(&self) -> Result<CertificateCache> {
        CertificateCache::new(&self.settings.cache)
    }

    pub fn service(&self) -> Result<CertificateService> {
        Ok(CertificateService::new(
            self.authority.clone(),
            Arc::new(self.cache()?),
            CertificatePicker::new(self.settings.acme.preferred_issuer.clone()),
        ))
    }

    /// Names of the files the cache holds for a renewal.
    pub fn cached_files(&self, renewal_id: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.settings.cache.path)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.starts_with(renewal_id) {
                names.push(name);
            }
        }
        Ok(names)
    }

    pub fn executor(&self) -> Result<RenewalExecutor> {
        self.executor_with(|_| {})
    }

    /// Builds an executor after letting the test register extra plugins.
    pub fn executor_with(
        &self,
        configure: impl FnOnce(&mut PluginRegistry),
    ) -> Result<RenewalExecutor> {
        let settings = Arc::new(self.settings.clone());
        let mut registry = PluginRegistry::with_builtins(settings.clone());
        let validator = self.validator.clone();
        registry.register_validator(VALIDATION_PLUGIN, move |_, _| {
            Ok(validator.clone() as Arc<dyn OrderValidator>)
        });
        let store = self.store.clone();
        registry.register_store(RECORDING_STORE, move |_, _| {
            Ok(store.clone() as Arc<dyn StorePlugin>)
        });
        let installer = self.installer.clone();
        registry.register_installer(RECORDING_INSTALLER, move |_, _| {
            Ok(installer.clone() as Arc<dyn InstallationPlugin>)
        });
        configure(&mut registry);

        Ok(RenewalExecutor::new(
            Arc::new(registry),
            Arc::new(self.cache()?),
            Arc::new(self.service()?),
            self.prompt.clone(),
        ))
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

/// Manual renewal validated by the fake validator, stored by the recording
/// store and installed by the recording installer.
pub fn manual_renewal(hosts: &[&str]) -> Renewal {
    let mut renewal = Renewal::create(
        PluginOptions::new("manual").with_params(json!({ "hosts": hosts })),
        PluginOptions::new(VALIDATION_PLUGIN),
    );
    renewal.store_plugin_options = vec![PluginOptions::new(RECORDING_STORE)];
    renewal.installation_plugin_options = vec![PluginOptions::new(RECORDING_INSTALLER)];
    renewal
}

/// Manual renewal validated by the self-hosted HTTP-01 listener.
pub fn self_hosted_renewal(hosts: &[&str]) -> Renewal {
    let mut renewal = manual_renewal(hosts);
    renewal.validation_plugin_options = PluginOptions::new(SELF_HOSTING_VALIDATOR);
    renewal
}

/// Same renewal split into one order per host.
pub fn per_host_renewal(hosts: &[&str]) -> Renewal {
    let mut renewal = manual_renewal(hosts);
    renewal.order_plugin_options = Some(PluginOptions::new("host"));
    renewal
}

/// Records a finished pass the way the manager does after persisting it.
pub fn settle(renewal: &mut Renewal, result: sslboard_renewal::RenewResult) {
    renewal.history.push(result);
    renewal.new = false;
    renewal.updated = false;
}
