//! Store and install steps for an order whose certificate is ready.

use std::{collections::HashMap, sync::Arc};

use log::{error, info, warn};

use super::context::OrderContext;
use crate::{
    core::{
        prompt::Prompt,
        run_level::RunLevel,
        types::{OrderResult, StoreInfo},
    },
    issuance::certificate::CertificateInfoCache,
    plugins::{Capability, InstallationPlugin, StorePlugin},
};

/// Whether the batch may go on with the next order.
///
/// Kept apart from the order's own success flag: a failed order still lets
/// the batch continue, only an abort stops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderOutcome {
    pub continue_batch: bool,
}

impl OrderOutcome {
    pub const CONTINUE: OrderOutcome = OrderOutcome {
        continue_batch: true,
    };
    pub const ABORT: OrderOutcome = OrderOutcome {
        continue_batch: false,
    };
}

pub async fn process_order(
    context: &mut OrderContext,
    renewal_is_new: bool,
    run_level: RunLevel,
    prompt: &dyn Prompt,
) -> OrderOutcome {
    let Some(certificate) = context.new_certificate.clone() else {
        context.result.add_error_message("No certificate generated", true);
        return OrderOutcome::CONTINUE;
    };

    // Test runs of a new renewal may stop after validation.
    if renewal_is_new && run_level.contains(RunLevel::TEST) {
        let question = format!(
            "[--test] Store and install the certificate for order {}?",
            context.name()
        );
        if !prompt.confirm(&question, true).await {
            info!("[renewal] store and install skipped for {}", context.name());
            return OrderOutcome::ABORT;
        }
    }

    let mut store_info = HashMap::new();
    if !store_add(
        &context.scope.stores,
        &certificate,
        &mut store_info,
        &mut context.result,
    )
    .await
    {
        return OrderOutcome::CONTINUE;
    }
    if !install(
        &context.scope.installers,
        &store_info,
        &certificate,
        context.previous.as_ref(),
        &mut context.result,
    )
    .await
    {
        return OrderOutcome::CONTINUE;
    }
    context.result.set_success();

    if let Some(previous) = &context.previous {
        if previous.thumbprint() != certificate.thumbprint() {
            store_remove(&context.scope.stores, previous, &mut context.result).await;
        }
    }
    OrderOutcome::CONTINUE
}

fn announce(kind: &str, index: usize, steps: usize, name: &str) {
    if steps > 1 {
        info!("[renewal] {kind} step {}/{steps}: {name}...", index + 1);
    } else {
        info!("[renewal] {kind} with {name}...");
    }
}

async fn store_add(
    stores: &[Arc<dyn StorePlugin>],
    certificate: &CertificateInfoCache,
    store_info: &mut HashMap<String, StoreInfo>,
    result: &mut OrderResult,
) -> bool {
    for (index, store) in stores.iter().enumerate() {
        announce("Store", index, stores.len(), store.name());
        if let Capability::Disabled(reason) = store.capability() {
            result.add_error_message(format!("Store plugin is not available. {reason}"), true);
            return false;
        }
        match store.save(certificate).await {
            Ok(Some(info)) => {
                store_info.entry(store.id().to_string()).or_insert(info);
            }
            Ok(None) => warn!(
                "[store] {} didn't provide feedback, this may affect installation steps",
                store.name()
            ),
            Err(err) => {
                error!("[store] unable to store certificate: {err:#}");
                result.add_error_message(format!("Store failed: {err:#}"), true);
                return false;
            }
        }
    }
    true
}

async fn install(
    installers: &[Arc<dyn InstallationPlugin>],
    store_info: &HashMap<String, StoreInfo>,
    certificate: &CertificateInfoCache,
    previous: Option<&CertificateInfoCache>,
    result: &mut OrderResult,
) -> bool {
    for (index, installer) in installers.iter().enumerate() {
        announce("Installation", index, installers.len(), installer.name());
        if let Capability::Disabled(reason) = installer.capability() {
            result.add_error_message(
                format!("Installation plugin is not available. {reason}"),
                true,
            );
            return false;
        }
        match installer.install(store_info, certificate, previous).await {
            Ok(true) => {}
            // Scripts often report errors liberally; later installers still run.
            Ok(false) => result.add_error_message(
                format!("Installation plugin {} encountered an error", installer.name()),
                false,
            ),
            Err(err) => {
                error!("[install] unable to install certificate: {err:#}");
                result.add_error_message(format!("Install failed: {err:#}"), true);
                return false;
            }
        }
    }
    true
}

async fn store_remove(
    stores: &[Arc<dyn StorePlugin>],
    previous: &CertificateInfoCache,
    result: &mut OrderResult,
) {
    for store in stores.iter().filter(|store| !store.keep_existing()) {
        if let Err(err) = store.delete(previous).await {
            error!("[store] unable to delete previous certificate: {err:#}");
            result.add_error_message(format!("Delete failed: {err:#}"), false);
        }
    }
}
