use std::sync::Arc;

use anyhow::Result;

use sslboard_renewal::RunLevel;

use super::test_utils::{FakeAuthority, Harness, per_host_renewal};

#[tokio::test]
async fn revoking_everything_clears_renewal_cache() -> Result<()> {
    let harness = Harness::new()?;
    let executor = harness.executor()?;
    let mut renewal = per_host_renewal(&["a.example.com", "b.example.com"]);
    let issued = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;
    assert_eq!(issued.success, Some(true), "{:?}", issued.all_error_messages());
    assert_eq!(harness.cache()?.cached_infos(&renewal.id).len(), 2);

    let revoked = harness.service()?.revoke_certificate(&renewal).await;

    assert!(revoked);
    assert_eq!(harness.authority.revoked.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert!(harness.cached_files(&renewal.id)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_revocation_keeps_unrevoked_entry() -> Result<()> {
    let mut harness = Harness::new()?;
    harness.authority = Arc::new(FakeAuthority::revoking_at_most(1));
    let executor = harness.executor()?;
    let mut renewal = per_host_renewal(&["a.example.com", "b.example.com"]);
    let issued = executor.handle_renewal(&mut renewal, RunLevel::UNATTENDED).await;
    assert_eq!(issued.success, Some(true), "{:?}", issued.all_error_messages());

    let revoked = harness.service()?.revoke_certificate(&renewal).await;

    assert!(!revoked);
    let cache = harness.cache()?;
    assert_eq!(cache.cached_infos(&renewal.id).len(), 1);
    // Signing requests stay until every certificate is revoked.
    assert!(
        harness
            .cached_files(&renewal.id)?
            .iter()
            .any(|name| !name.ends_with(".cert.json"))
    );
    Ok(())
}
