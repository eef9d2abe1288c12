use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use sslboard_renewal::{
    Prompt, RunLevel,
    core::types::PluginOptions,
    plugins::StorePlugin,
};

use super::test_utils::{
    FakeAuthority, Harness, RECORDING_STORE, RecordingStore, manual_renewal, per_host_renewal,
    settle,
};

struct Decline;

#[async_trait]
impl Prompt for Decline {
    async fn confirm(&self, _question: &str, _default: bool) -> bool {
        false
    }
}

#[tokio::test]
async fn new_renewal_is_issued_stored_and_installed() -> Result<()> {
    let harness = Harness::new()?;
    let executor = harness.executor()?;
    let mut renewal = manual_renewal(&["example.com", "www.example.com"]);

    let result = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert_eq!(result.success, Some(true), "{:?}", result.all_error_messages());
    assert!(!result.abort);
    assert_eq!(result.order_results.len(), 1);
    let order = &result.order_results[0];
    assert!(order.thumbprint.is_some());
    assert!(order.expire_date.is_some());
    assert_eq!(harness.authority.orders_created(), 1);
    assert_eq!(harness.validator.batches(), vec![1]);
    assert_eq!(harness.store.saved(), vec![order.thumbprint.clone().unwrap_or_default()]);
    assert_eq!(
        harness.installer.installs(),
        vec![(vec![RECORDING_STORE.to_string()], None)]
    );
    assert_eq!(renewal.last_friendly_name.as_deref(), Some("[Manual] example.com"));
    Ok(())
}

#[tokio::test]
async fn disabled_store_fails_order_before_next_store() -> Result<()> {
    let harness = Harness::new()?;
    let executor = harness.executor()?;
    let mut renewal = manual_renewal(&["example.com"]);
    renewal.store_plugin_options = vec![
        PluginOptions::new("offline"),
        PluginOptions::new(RECORDING_STORE),
    ];

    let result = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert_eq!(result.success, Some(false));
    let order = &result.order_results[0];
    assert_eq!(order.success, Some(false));
    assert_eq!(
        order.error_messages,
        vec!["Store plugin is not available. store plugin 'offline' is not available".to_string()]
    );
    assert!(harness.store.saved().is_empty());
    assert_eq!(harness.installer.count(), 0);
    Ok(())
}

#[tokio::test]
async fn only_uncached_order_contacts_authority() -> Result<()> {
    let harness = Harness::new()?;
    let executor = harness.executor()?;
    let mut renewal = per_host_renewal(&["a.example.com", "b.example.com"]);
    let first = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;
    assert_eq!(first.success, Some(true), "{:?}", first.all_error_messages());
    assert_eq!(harness.authority.orders_created(), 2);
    settle(&mut renewal, first);

    let cache = harness.cache()?;
    for entry in cache.cached_infos_for_part(&renewal.id, "b.example.com") {
        cache.delete_entry(&entry)?;
    }

    let second = executor
        .handle_renewal(&mut renewal, RunLevel::UNATTENDED | RunLevel::FORCE)
        .await;
    assert_eq!(second.success, Some(true), "{:?}", second.all_error_messages());
    assert_eq!(harness.authority.orders_created(), 3);
    assert_eq!(second.order_results.len(), 2);
    assert_eq!(harness.installer.count(), 4);
    Ok(())
}

#[tokio::test]
async fn new_order_in_fresh_renewal_runs_early() -> Result<()> {
    let harness = Harness::new()?;
    let executor = harness.executor()?;
    let mut renewal = per_host_renewal(&["a.example.com"]);
    let first = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;
    assert_eq!(first.success, Some(true), "{:?}", first.all_error_messages());
    settle(&mut renewal, first);

    renewal.target_plugin_options = PluginOptions::new("manual")
        .with_params(serde_json::json!({ "hosts": ["a.example.com", "b.example.com"] }));
    let second = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert!(!second.abort);
    assert_eq!(second.success, Some(true), "{:?}", second.all_error_messages());
    assert_eq!(second.order_results.len(), 1);
    assert_eq!(second.order_results[0].name, "[Manual] a.example.com [b.example.com]");
    assert_eq!(harness.authority.orders_created(), 2);
    Ok(())
}

#[tokio::test]
async fn renewal_that_is_not_due_aborts() -> Result<()> {
    let harness = Harness::new()?;
    let executor = harness.executor()?;
    let mut renewal = manual_renewal(&["example.com"]);
    let first = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;
    settle(&mut renewal, first);

    let second = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert!(second.abort);
    assert!(second.order_results.is_empty());
    assert_eq!(harness.authority.orders_created(), 1);
    assert_eq!(harness.installer.count(), 1);
    Ok(())
}

#[tokio::test]
async fn failing_store_is_isolated_to_its_order() -> Result<()> {
    let harness = Harness::new()?;
    let flaky = Arc::new(RecordingStore::failing_for(&["a.example.com"]));
    let registered = flaky.clone();
    let executor = harness.executor_with(move |registry| {
        registry.register_store("flaky", move |_, _| {
            Ok(registered.clone() as Arc<dyn StorePlugin>)
        });
    })?;
    let mut renewal = per_host_renewal(&["a.example.com", "b.example.com"]);
    renewal.store_plugin_options = vec![PluginOptions::new("flaky")];

    let result = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert_eq!(result.success, Some(false));
    let by_name = |name: &str| {
        result
            .order_results
            .iter()
            .find(|o| o.name.ends_with(&format!("[{name}]")))
            .ok_or_else(|| anyhow!("missing order {name}"))
    };
    let a = by_name("a.example.com")?;
    let b = by_name("b.example.com")?;
    assert_eq!(a.success, Some(false));
    assert_eq!(
        a.error_messages,
        vec!["Store failed: no space left for a.example.com".to_string()]
    );
    assert_eq!(b.success, Some(true));
    assert_eq!(flaky.saved().len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_alternate_download_does_not_fail_pass() -> Result<()> {
    let mut harness = Harness::new()?;
    harness.authority = Arc::new(FakeAuthority::with_alternates(&["Alt Root", "broken mirror"]));
    harness.settings.acme.preferred_issuer = Some("alt root".into());
    let executor = harness.executor()?;
    let mut renewal = manual_renewal(&["example.com"]);

    let result = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert_eq!(result.success, Some(true), "{:?}", result.all_error_messages());
    let cached = harness
        .cache()?
        .cached_infos(&renewal.id)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("nothing cached"))?;
    assert_eq!(cached.certificate.root_issuer_common_name(), Some("Alt Root"));
    assert!(cached.certificate.has_private_key());
    Ok(())
}

#[tokio::test]
async fn previous_certificate_is_deleted_after_install() -> Result<()> {
    let harness = Harness::new()?;
    let executor = harness.executor()?;
    let mut renewal = manual_renewal(&["example.com"]);
    let first = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;
    let old_thumbprint = first.order_results[0].thumbprint.clone();
    settle(&mut renewal, first);

    let second = executor
        .handle_renewal(&mut renewal, RunLevel::UNATTENDED | RunLevel::NO_CACHE)
        .await;

    assert_eq!(second.success, Some(true), "{:?}", second.all_error_messages());
    assert_ne!(second.order_results[0].thumbprint, old_thumbprint);
    let old_thumbprint = old_thumbprint.ok_or_else(|| anyhow!("no thumbprint"))?;
    assert_eq!(harness.store.deleted(), vec![old_thumbprint.clone()]);
    let installs = harness.installer.installs();
    assert_eq!(installs[1].1.as_deref(), Some(old_thumbprint.as_str()));
    Ok(())
}

#[tokio::test]
async fn invalid_authority_order_fails_without_download() -> Result<()> {
    let mut harness = Harness::new()?;
    harness.authority = Arc::new(FakeAuthority::rejecting_orders());
    let executor = harness.executor()?;
    let mut renewal = manual_renewal(&["example.com"]);

    let result = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert_eq!(result.success, Some(false));
    assert!(harness.validator.batches().is_empty());
    assert_eq!(
        result.order_results[0].error_messages,
        vec![
            "Created order was invalid".to_string(),
            "No certificate generated".to_string()
        ]
    );
    Ok(())
}

#[tokio::test]
async fn unknown_validation_plugin_is_reported() -> Result<()> {
    let harness = Harness::new()?;
    let executor = harness.executor()?;
    let mut renewal = manual_renewal(&["example.com"]);
    renewal.validation_plugin_options = PluginOptions::new("dns-azure");

    let result = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert_eq!(result.success, Some(false));
    assert!(
        result.order_results[0]
            .error_messages
            .iter()
            .any(|m| m.starts_with("Validation plugin is not available."))
    );
    assert_eq!(harness.installer.count(), 0);
    Ok(())
}

#[tokio::test]
async fn empty_target_stops_pass() -> Result<()> {
    let harness = Harness::new()?;
    let executor = harness.executor()?;
    let mut renewal = manual_renewal(&[]);

    let result = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert_eq!(result.success, Some(false));
    assert!(!result.abort);
    assert_eq!(
        result.error_messages,
        vec!["Plugin Manual did not generate a source".to_string()]
    );
    assert_eq!(harness.authority.orders_created(), 0);
    Ok(())
}

#[tokio::test]
async fn declined_test_run_validates_but_does_not_install() -> Result<()> {
    let mut harness = Harness::new()?;
    harness.prompt = Arc::new(Decline);
    let executor = harness.executor()?;
    let mut renewal = manual_renewal(&["example.com"]);

    let result = executor
        .handle_renewal(&mut renewal, RunLevel::INTERACTIVE | RunLevel::TEST)
        .await;

    assert!(result.abort);
    assert_eq!(harness.validator.batches(), vec![1]);
    assert!(harness.store.saved().is_empty());
    assert_eq!(harness.installer.count(), 0);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn hooks_receive_renewal_id() -> Result<()> {
    use std::{fs, os::unix::fs::PermissionsExt};

    let mut harness = Harness::new()?;
    let log = harness.dir.join("hooks.log");
    let script = harness.dir.join("hook.sh");
    fs::write(
        &script,
        format!("#!/bin/sh\necho \"$1\" >> {}\n", log.display()),
    )?;
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;
    let script = script.display().to_string();
    harness.settings.execution.default_pre_execution_script = Some(script.clone());
    harness.settings.execution.default_post_execution_script = Some(script);
    let executor = harness.executor()?;
    let mut renewal = manual_renewal(&["example.com"]);

    let result = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert_eq!(result.success, Some(true), "{:?}", result.all_error_messages());
    let lines: Vec<String> = fs::read_to_string(&log)?
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines, vec![renewal.id.clone(), renewal.id.clone()]);
    Ok(())
}
