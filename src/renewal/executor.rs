use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, info};

use super::{
    cache_gateway::CacheGateway,
    context::{OrderContext, OrderScope},
    due_date::DueDateService,
    pipeline::process_order,
};
use crate::{
    core::{
        prompt::Prompt,
        run_level::RunLevel,
        settings::Settings,
        types::{Order, RenewResult, Renewal},
    },
    issuance::{authority::OrderStatus, service::CertificateService},
    plugins::{Capability, registry::PluginRegistry},
    storage::cache::CertificateCache,
};

/// Runs one renewal from target resolution to installation.
pub struct RenewalExecutor {
    settings: Arc<Settings>,
    registry: Arc<PluginRegistry>,
    cache: Arc<CertificateCache>,
    certificates: Arc<CertificateService>,
    due_dates: DueDateService,
    gateway: CacheGateway,
    prompt: Arc<dyn Prompt>,
}

impl RenewalExecutor {
    pub fn new(
        registry: Arc<PluginRegistry>,
        cache: Arc<CertificateCache>,
        certificates: Arc<CertificateService>,
        prompt: Arc<dyn Prompt>,
    ) -> Self {
        let settings = registry.settings().clone();
        Self {
            due_dates: DueDateService::new(&settings.schedule),
            gateway: CacheGateway::new(cache.clone(), settings.cache.reuse_days),
            settings,
            registry,
            cache,
            certificates,
            prompt,
        }
    }

    pub fn due_dates(&self) -> &DueDateService {
        &self.due_dates
    }

    /// Never fails: every problem ends up in the returned result.
    pub async fn handle_renewal(&self, renewal: &mut Renewal, run_level: RunLevel) -> RenewResult {
        let target_plugin = self.registry.target(renewal);
        if let Capability::Disabled(reason) = target_plugin.capability() {
            return RenewResult::failure(format!(
                "Source plugin {} is disabled. {reason}",
                target_plugin.name()
            ));
        }
        let target = match target_plugin.generate().await {
            Ok(Some(target)) => target,
            Ok(None) => {
                return RenewResult::failure(format!(
                    "Plugin {} did not generate a source",
                    target_plugin.name()
                ));
            }
            Err(err) => {
                error!("[renewal] source plugin {} failed: {err:#}", target_plugin.name());
                return RenewResult::failure(format!(
                    "Plugin {} did not generate a source: {err:#}",
                    target_plugin.name()
                ));
            }
        };
        info!("[renewal] plugin {} generated source {target}", target_plugin.name());

        let order_plugin = self.registry.order(renewal);
        if let Capability::Disabled(reason) = order_plugin.capability() {
            return RenewResult::failure(format!(
                "Order plugin {} is disabled. {reason}",
                order_plugin.name()
            ));
        }
        let orders = order_plugin.split(renewal, &target);
        if orders.is_empty() {
            return RenewResult::failure(format!(
                "Order plugin {} failed to create order(s)",
                order_plugin.name()
            ));
        }
        info!(
            "[renewal] plugin {} created {} order{}",
            order_plugin.name(),
            orders.len(),
            if orders.len() > 1 { "s" } else { "" }
        );
        if orders.iter().any(|order| !order.target.is_valid()) {
            let (blame, plugin) = if orders.len() > 1 {
                ("Order", order_plugin.name())
            } else {
                ("Source", target_plugin.name())
            };
            return RenewResult::failure(format!("{blame} plugin {plugin} created invalid source"));
        }
        renewal.last_friendly_name = orders.first().map(Order::friendly_name_base);

        self.handle_orders(renewal, orders, run_level).await
    }

    fn should_run_renewal(&self, renewal: &Renewal, run_level: RunLevel) -> bool {
        if renewal.new {
            return true;
        }
        if run_level.contains(RunLevel::FORCE) {
            info!("[renewal] force renewing {}", renewal.display_name());
            return true;
        }
        renewal.updated || self.due_dates.is_due(renewal)
    }

    fn abort(&self, renewal: &Renewal) -> RenewResult {
        if let Some(due) = self.due_dates.due_date(renewal) {
            info!(
                "[renewal] {} is due after {}",
                renewal.display_name(),
                due.format("%Y-%m-%d %H:%M")
            );
        }
        RenewResult::aborted()
    }

    async fn handle_orders(
        &self,
        renewal: &Renewal,
        orders: Vec<Order>,
        run_level: RunLevel,
    ) -> RenewResult {
        let order_count = orders.len();
        let all_parts: Vec<String> = orders
            .iter()
            .map(|order| order.cache_part().to_string())
            .collect();
        let mut contexts: Vec<OrderContext> = orders
            .into_iter()
            .map(|order| OrderContext::new(order, OrderScope::resolve(&self.registry, renewal)))
            .collect();

        let main_due = self.should_run_renewal(renewal, run_level);
        for context in &mut contexts {
            context.should_run = run_level.contains(RunLevel::FORCE)
                || self
                    .due_dates
                    .should_run_order(renewal, &context.order, &self.cache);
            debug!("[renewal] order {} should run: {}", context.name(), context.should_run);
        }
        if !main_due && !contexts.iter().any(|context| context.should_run) {
            return self.abort(renewal);
        }

        let run_all = run_level.contains(RunLevel::NO_CACHE) || renewal.new || renewal.updated;
        let mut runnable: Vec<OrderContext> = contexts
            .into_iter()
            .filter(|context| run_all || context.should_run)
            .collect();
        if runnable.is_empty() {
            debug!("[renewal] none of the orders are currently due to run");
            return self.abort(renewal);
        }
        if !renewal.new && !run_level.contains(RunLevel::FORCE) {
            info!("[renewal] renewing {}", renewal.display_name());
        }
        if order_count > runnable.len() {
            info!("[renewal] {} of {order_count} orders are due to run", runnable.len());
        }

        // From here on the pass is committed to doing real work.
        self.run_hook(
            self.settings.execution.default_pre_execution_script.as_deref(),
            renewal,
        )
        .await;

        self.execute_orders(renewal, &mut runnable, &all_parts, run_level)
            .await;

        let mut result = RenewResult::new();
        for (index, context) in runnable.iter_mut().enumerate() {
            debug!(
                "[renewal] processing order {}/{}: {}",
                index + 1,
                order_count,
                context.name()
            );
            if let Some(certificate) = &context.new_certificate {
                context.result.thumbprint = Some(certificate.thumbprint().to_string());
                context.result.expire_date = Some(certificate.certificate.not_after);
            }
            let outcome =
                process_order(context, renewal.new, run_level, self.prompt.as_ref()).await;
            if !outcome.continue_batch {
                result.abort = true;
                break;
            }
        }

        self.run_hook(
            self.settings.execution.default_post_execution_script.as_deref(),
            renewal,
        )
        .await;

        result.success = Some(
            runnable
                .iter()
                .all(|context| context.result.success == Some(true)),
        );
        result.order_results = runnable.into_iter().map(|context| context.result).collect();
        result
    }

    async fn run_hook(&self, script: Option<&str>, renewal: &Renewal) {
        if let Some(script) = script.filter(|s| !s.trim().is_empty()) {
            self.registry
                .scripts()
                .run_script(script, &[renewal.id.clone()])
                .await;
        }
    }

    /// Fills in `new_certificate` for every runnable order, from the cache
    /// when possible and from the authority otherwise.
    async fn execute_orders(
        &self,
        renewal: &Renewal,
        contexts: &mut [OrderContext],
        all_parts: &[String],
        run_level: RunLevel,
    ) {
        for context in contexts.iter_mut() {
            context.previous = self.cache.previous_certificate(&context.order, all_parts);
            if let Some(previous) = &context.previous {
                debug!(
                    "[renewal] previous certificate found at {}",
                    previous.cache_file.display()
                );
            }
            context.new_certificate = self.gateway.try_reuse(&context.order, run_level);
        }

        let mut from_server = Vec::new();
        for (index, context) in contexts.iter_mut().enumerate() {
            if context.new_certificate.is_none() {
                self.create_order(context).await;
                from_server.push(index);
            }
        }

        let always_validate =
            run_level.contains(RunLevel::TEST) || run_level.contains(RunLevel::NO_CACHE);
        let validation_required: Vec<usize> = from_server
            .into_iter()
            .filter(|&index| {
                let context = &contexts[index];
                !context.result.is_failed()
                    && context.order.details.is_some()
                    && (!context.order.valid() || always_validate)
            })
            .collect();
        if !validation_required.is_empty() {
            self.validate(renewal, contexts, &validation_required, run_level)
                .await;
        }

        let total = contexts.len();
        join_all(
            contexts
                .iter_mut()
                .enumerate()
                .map(|(index, context)| async move {
                    if context.result.is_failed() {
                        debug!(
                            "[renewal] order {}/{total} ({}): error {}",
                            index + 1,
                            context.name(),
                            context
                                .result
                                .error_messages
                                .first()
                                .map(String::as_str)
                                .unwrap_or("unknown")
                        );
                    } else if context.new_certificate.is_none() {
                        debug!(
                            "[renewal] order {}/{total} ({}): processing...",
                            index + 1,
                            context.name()
                        );
                        self.download(context).await;
                    } else {
                        debug!(
                            "[renewal] order {}/{total} ({}): handle from cache",
                            index + 1,
                            context.name()
                        );
                    }
                }),
        )
        .await;
    }

    async fn create_order(&self, context: &mut OrderContext) {
        debug!("[renewal] obtain order details for {}", context.name());
        context.order.key_path = context
            .scope
            .csr
            .reuse_private_key()
            .then(|| self.cache.key_path(&context.order));
        let identifiers = context.order.target.identifiers();
        match self.certificates.authority().create_order(&identifiers).await {
            Ok(details) => {
                let invalid = details.status == OrderStatus::Invalid;
                context.order.details = Some(details);
                if invalid {
                    context.result.add_error_message("Created order was invalid", true);
                }
            }
            Err(err) => {
                error!("[renewal] unable to create order {}: {err}", context.name());
                context.result.add_error_message("Unable to create order", true);
            }
        }
    }

    /// Hands all orders needing validation to the validator as one batch.
    async fn validate(
        &self,
        renewal: &Renewal,
        contexts: &mut [OrderContext],
        required: &[usize],
        run_level: RunLevel,
    ) {
        let validator = self.registry.validator(renewal);
        if let Capability::Disabled(reason) = validator.capability() {
            for &index in required {
                contexts[index].result.add_error_message(
                    format!("Validation plugin is not available. {reason}"),
                    true,
                );
            }
            return;
        }
        let outcome = {
            let mut batch: Vec<&mut Order> = contexts
                .iter_mut()
                .enumerate()
                .filter(|(index, _)| required.contains(index))
                .map(|(_, context)| &mut context.order)
                .collect();
            validator.validate_orders(&mut batch, run_level).await
        };
        if let Err(err) = &outcome {
            error!("[renewal] validation with {} failed: {err:#}", validator.name());
        }
        for &index in required {
            let context = &mut contexts[index];
            if let Err(err) = &outcome {
                context
                    .result
                    .add_error_message(format!("Validation failed: {err:#}"), true);
            } else if !context.order.valid() {
                context.result.add_error_message(
                    format!("Authorization failed for {}", context.order.target),
                    true,
                );
            }
        }
    }

    async fn download(&self, context: &mut OrderContext) {
        let csr_plugin = context
            .order
            .target
            .user_csr
            .is_none()
            .then(|| context.scope.csr.clone());
        if let Some(plugin) = &csr_plugin {
            if let Capability::Disabled(reason) = plugin.capability() {
                context
                    .result
                    .add_error_message(format!("CSR plugin is not available. {reason}"), true);
                return;
            }
        }
        match self
            .certificates
            .request_certificate(csr_plugin.as_deref(), &mut context.order)
            .await
        {
            Ok(certificate) => context.new_certificate = Some(certificate),
            Err(err) => {
                error!(
                    "[renewal] error requesting certificate {}: {err}",
                    context.order.friendly_name_intermediate()
                );
                context.result.add_error_message(err.to_string(), true);
            }
        }
    }
}
