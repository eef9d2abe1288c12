use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};

use super::executor::RenewalExecutor;
use crate::{
    core::{run_level::RunLevel, types::RenewResult},
    storage::renewals::RenewalStore,
};

/// Runs every stored renewal through the executor and records the outcome.
pub struct RenewalManager {
    store: RenewalStore,
    executor: RenewalExecutor,
}

impl RenewalManager {
    pub fn new(store: RenewalStore, executor: RenewalExecutor) -> Self {
        Self { store, executor }
    }

    pub fn store(&self) -> &RenewalStore {
        &self.store
    }

    /// One pass over all renewals, earliest due first.
    ///
    /// Each renewal is persisted as soon as it has run, so a crash later in
    /// the pass does not lose the results already obtained.
    pub async fn run_due(&self, run_level: RunLevel) -> Result<Vec<(String, RenewResult)>> {
        let mut renewals = self.store.list()?;
        let due_dates = self.executor.due_dates();
        renewals.sort_by_key(|renewal| due_dates.due_date(renewal));
        info!("[renewal] checking {} renewal(s)", renewals.len());

        let mut results = Vec::new();
        for index in 0..renewals.len() {
            let renewal = &mut renewals[index];
            let result = self.executor.handle_renewal(renewal, run_level).await;
            if result.abort {
                results.push((renewal.id.clone(), result));
                continue;
            }
            match result.success {
                Some(true) => info!("[renewal] {} succeeded", renewal.display_name()),
                _ => warn!(
                    "[renewal] {} failed: {}",
                    renewal.display_name(),
                    result.all_error_messages().join("; ")
                ),
            }
            renewal.history.push(result.clone());
            renewal.updated = true;
            results.push((renewal.id.clone(), result));
            self.store.save(&mut renewals)?;
        }
        Ok(results)
    }

    /// Repeats [`run_due`](Self::run_due) forever; failed passes are logged
    /// and retried on the next tick.
    pub async fn run_loop(&self, period: Duration, run_level: RunLevel) {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_due(run_level).await {
                error!("[renewal] scheduled pass failed: {err:#}");
            }
        }
    }
}
