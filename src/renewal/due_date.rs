use chrono::{DateTime, Duration, Utc};
use log::info;

use crate::{
    core::{
        settings::ScheduleSettings,
        types::{Order, Renewal},
    },
    storage::cache::CertificateCache,
};

/// Decides when a renewal (or one of its orders) should run again.
#[derive(Debug, Clone)]
pub struct DueDateService {
    renewal_days: i64,
    minimum_valid_days: i64,
}

impl DueDateService {
    pub fn new(settings: &ScheduleSettings) -> Self {
        Self {
            renewal_days: settings.renewal_days,
            minimum_valid_days: settings.minimum_valid_days(),
        }
    }

    /// `None` when the renewal never succeeded.
    ///
    /// The fixed interval counts from the first time the current set of
    /// thumbprints was recorded, not from the last confirmation of it.
    pub fn due_date(&self, renewal: &Renewal) -> Option<DateTime<Utc>> {
        let last_success = renewal
            .history
            .iter()
            .rev()
            .find(|entry| entry.success == Some(true))?;
        let summary = last_success.thumbprint_summary();
        let first_occurrence = renewal
            .history
            .iter()
            .find(|entry| entry.thumbprint_summary() == summary)
            .unwrap_or(last_success);
        let interval_due = first_occurrence.date + Duration::days(self.renewal_days);
        match last_success.expire_date() {
            Some(expires) => Some(interval_due.min(expires - Duration::days(self.minimum_valid_days))),
            None => Some(interval_due),
        }
    }

    pub fn is_due(&self, renewal: &Renewal) -> bool {
        self.is_due_at(renewal, Utc::now())
    }

    pub fn is_due_at(&self, renewal: &Renewal, now: DateTime<Utc>) -> bool {
        self.due_date(renewal).is_none_or(|due| due < now)
    }

    /// An order runs early when no certificate matching its current shape
    /// was ever cached, e.g. after a host was added to the target.
    pub fn should_run_order(&self, renewal: &Renewal, order: &Order, cache: &CertificateCache) -> bool {
        if self.is_due(renewal) {
            return true;
        }
        if cache.cached_info(order).is_none() {
            info!(
                "[renewal] {} running prematurely due to source change in order {}",
                renewal.display_name(),
                order.friendly_name_intermediate()
            );
            return true;
        }
        false
    }
}
