use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};

use crate::{
    core::{run_level::RunLevel, settings::ValidationSettings, types::Order},
    issuance::{
        authority::{AcmeAuthority, HttpChallenge, OrderStatus},
        challenge::ChallengeListener,
    },
    plugins::{Capability, OrderValidator, ParallelOperations, Plugin},
};

pub const SELF_HOSTING_VALIDATOR: &str = "selfhosting";

/// Answers HTTP-01 challenges from the shared in-process listener.
pub struct SelfHostingValidator {
    authority: Arc<dyn AcmeAuthority>,
    listener: Arc<ChallengeListener>,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl SelfHostingValidator {
    pub fn new(
        authority: Arc<dyn AcmeAuthority>,
        listener: Arc<ChallengeListener>,
        settings: &ValidationSettings,
    ) -> Self {
        Self {
            authority,
            listener,
            poll_attempts: settings.poll_attempts.max(1),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        }
    }

    /// Publishes every pending challenge of the orders, returning them per order index.
    async fn prepare(&self, orders: &[&mut Order]) -> Vec<(usize, Vec<HttpChallenge>)> {
        let mut prepared = Vec::new();
        for (index, order) in orders.iter().enumerate() {
            let Some(details) = order.details.as_ref() else {
                continue;
            };
            let challenges = match self.authority.http_challenges(details).await {
                Ok(challenges) => challenges,
                Err(err) => {
                    warn!(
                        "[listener] no challenges for {}: {err}",
                        order.friendly_name_intermediate()
                    );
                    continue;
                }
            };
            let mut published = Vec::with_capacity(challenges.len());
            for challenge in challenges {
                match self
                    .listener
                    .add_challenge(&challenge.token, &challenge.key_authorization)
                {
                    Ok(()) => published.push(challenge),
                    Err(err) => warn!("[listener] {err:#}"),
                }
            }
            prepared.push((index, published));
        }
        prepared
    }

    /// Polls the order until the authority has settled its authorizations.
    async fn settle(&self, order: &mut Order) {
        let Some(mut details) = order.details.clone() else {
            return;
        };
        for attempt in 1..=self.poll_attempts {
            match self.authority.refresh_order(&details).await {
                Ok(refreshed) => details = refreshed,
                Err(err) => {
                    warn!(
                        "[listener] unable to refresh {}: {err}",
                        order.friendly_name_intermediate()
                    );
                    break;
                }
            }
            if details.status != OrderStatus::Pending || attempt == self.poll_attempts {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        debug!(
            "[listener] order {} is {:?}",
            order.friendly_name_intermediate(),
            details.status
        );
        order.details = Some(details);
    }
}

impl Plugin for SelfHostingValidator {
    fn id(&self) -> &str {
        SELF_HOSTING_VALIDATOR
    }

    fn name(&self) -> &str {
        "SelfHosting"
    }

    fn capability(&self) -> Capability {
        self.listener.capability().clone()
    }
}

#[async_trait]
impl OrderValidator for SelfHostingValidator {
    async fn validate_orders(&self, orders: &mut [&mut Order], _run_level: RunLevel) -> Result<()> {
        self.listener.commit().await?;
        let prepared = self.prepare(orders).await;

        let answers = join_all(prepared.iter().map(|(index, challenges)| async move {
            for challenge in challenges {
                if let Err(err) = self.authority.answer_challenge(challenge).await {
                    warn!("[listener] challenge {} was not accepted: {err}", challenge.url);
                    return (*index, false);
                }
            }
            (*index, true)
        }))
        .await;
        for (index, answered) in answers {
            if answered {
                self.settle(&mut *orders[index]).await;
            }
        }

        for (_, challenges) in &prepared {
            for challenge in challenges {
                if let Err(err) = self.listener.remove_challenge(&challenge.token) {
                    warn!("[listener] {err:#}");
                }
            }
        }
        self.listener.clean_up().await;
        info!("[listener] validated {} order(s)", prepared.len());
        Ok(())
    }

    fn parallelism(&self) -> ParallelOperations {
        ParallelOperations::ANSWER
    }
}
