use std::sync::Arc;

use anyhow::Result;

use sslboard_renewal::{
    RunLevel,
    core::{settings::ValidationSettings, types::PluginOptions},
    issuance::challenge::ChallengeListener,
};

use super::test_utils::{FakeAuthority, Harness, self_hosted_renewal};

#[tokio::test]
async fn self_hosted_challenges_are_served_and_withdrawn() -> Result<()> {
    let mut harness = Harness::new()?;
    let listener = Arc::new(ChallengeListener::new(0));
    harness.authority = Arc::new(FakeAuthority::checking(listener.clone()));
    harness.settings.validation.poll_interval_ms = 10;
    let authority = harness.authority.clone();
    let shared = listener.clone();
    let executor = harness.executor_with(move |registry| {
        registry.register_self_hosting(authority, shared);
    })?;
    let mut renewal = self_hosted_renewal(&["a.example.com", "b.example.com"]);
    renewal.order_plugin_options = Some(PluginOptions::new("host"));

    let result = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert_eq!(result.success, Some(true), "{:?}", result.all_error_messages());
    assert_eq!(result.order_results.len(), 2);
    assert!(harness.validator.batches().is_empty());
    assert_eq!(harness.installer.count(), 2);
    assert!(!listener.is_active().await);
    Ok(())
}

#[tokio::test]
async fn unreachable_challenge_fails_authorization() -> Result<()> {
    let mut harness = Harness::new()?;
    // The authority checks a listener that never starts.
    let elsewhere = Arc::new(ChallengeListener::new(0));
    harness.authority = Arc::new(FakeAuthority::checking(elsewhere));
    let listener = Arc::new(ChallengeListener::new(0));
    let authority = harness.authority.clone();
    let shared = listener.clone();
    let executor = harness.executor_with(move |registry| {
        registry.register_self_hosting(authority, shared);
    })?;
    let mut renewal = self_hosted_renewal(&["example.com"]);

    let result = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert_eq!(result.success, Some(false));
    let messages = &result.order_results[0].error_messages;
    assert!(
        messages.iter().any(|m| m.starts_with("Authorization failed for")),
        "{messages:?}"
    );
    assert_eq!(harness.authority.csrs_submitted.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(harness.installer.count(), 0);
    assert!(!listener.is_active().await);
    Ok(())
}

#[tokio::test]
async fn listener_without_port_disables_validation() -> Result<()> {
    let harness = Harness::new()?;
    let listener = Arc::new(ChallengeListener::from_settings(&ValidationSettings {
        http_port: 0,
        ..ValidationSettings::default()
    }));
    let authority = harness.authority.clone();
    let executor = harness.executor_with(move |registry| {
        registry.register_self_hosting(authority, listener);
    })?;
    let mut renewal = self_hosted_renewal(&["example.com"]);

    let result = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;

    assert_eq!(result.success, Some(false));
    assert_eq!(
        result.order_results[0].error_messages,
        vec![
            "Validation plugin is not available. self-hosting is disabled because no HTTP port is configured"
                .to_string()
        ]
    );
    Ok(())
}
