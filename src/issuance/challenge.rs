//! In-memory HTTP-01 responder shared by every order of a process.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, RwLock},
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use log::{debug, info, warn};
use tokio::{
    net::TcpListener,
    sync::{Mutex, oneshot},
};

use crate::{core::settings::ValidationSettings, plugins::Capability};

type Challenges = Arc<RwLock<HashMap<String, String>>>;

#[derive(Default)]
struct ListenerState {
    references: usize,
    shutdown: Option<oneshot::Sender<()>>,
    local_addr: Option<SocketAddr>,
}

/// Reference-counted listener answering `/.well-known/acme-challenge/<token>`.
pub struct ChallengeListener {
    port: u16,
    capability: Capability,
    challenges: Challenges,
    state: Mutex<ListenerState>,
}

impl ChallengeListener {
    pub fn new(port: u16) -> Self {
        Self::with_capability(port, Capability::Enabled)
    }

    pub fn with_capability(port: u16, capability: Capability) -> Self {
        Self {
            port,
            capability,
            challenges: Arc::new(RwLock::new(HashMap::new())),
            state: Mutex::new(ListenerState::default()),
        }
    }

    pub fn from_settings(settings: &ValidationSettings) -> Self {
        if settings.http_port == 0 {
            return Self::with_capability(
                0,
                Capability::disabled("self-hosting is disabled because no HTTP port is configured"),
            );
        }
        Self::new(settings.http_port)
    }

    /// Callers must check this before [`commit`](Self::commit).
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn add_challenge(&self, token: &str, key_authorization: &str) -> Result<()> {
        self.challenges
            .write()
            .map_err(|err| anyhow!("challenge table poisoned: {err}"))?
            .insert(token.to_string(), key_authorization.to_string());
        Ok(())
    }

    pub fn remove_challenge(&self, token: &str) -> Result<()> {
        self.challenges
            .write()
            .map_err(|err| anyhow!("challenge table poisoned: {err}"))?
            .remove(token);
        Ok(())
    }

    /// Takes a reference, starting the listener on first use.
    ///
    /// Returns whether the listener was already active.
    pub async fn commit(&self) -> Result<bool> {
        if let Capability::Disabled(reason) = &self.capability {
            return Err(anyhow!("challenge listener is not available: {reason}"));
        }
        let mut state = self.state.lock().await;
        if state.shutdown.is_some() {
            state.references += 1;
            debug!("[listener] already active, {} reference(s)", state.references);
            return Ok(true);
        }
        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .with_context(|| format!("failed to bind challenge listener on port {}", self.port))?;
        let local_addr = listener.local_addr()?;
        let (shutdown, signal) = oneshot::channel::<()>();
        let app = challenge_router(Arc::clone(&self.challenges));
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await;
            if let Err(err) = served {
                warn!("[listener] server error: {err}");
            }
        });
        state.shutdown = Some(shutdown);
        state.local_addr = Some(local_addr);
        state.references = 1;
        info!("[listener] listening on {local_addr}");
        Ok(false)
    }

    /// Releases a reference, stopping the listener when none remain.
    ///
    /// Returns whether the listener was active before the call.
    pub async fn clean_up(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.shutdown.is_none() {
            return false;
        }
        state.references = state.references.saturating_sub(1);
        if state.references == 0 {
            if let Some(shutdown) = state.shutdown.take() {
                let _ = shutdown.send(());
            }
            state.local_addr = None;
            info!("[listener] stopped");
        }
        true
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.local_addr
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.shutdown.is_some()
    }
}

fn challenge_router(challenges: Challenges) -> Router {
    Router::new()
        .route("/.well-known/acme-challenge/:token", get(answer_challenge))
        .with_state(challenges)
}

async fn answer_challenge(State(challenges): State<Challenges>, Path(token): Path<String>) -> Response {
    let answer = challenges
        .read()
        .ok()
        .and_then(|table| table.get(&token).cloned());
    match answer {
        Some(body) => {
            debug!("[listener] answered challenge {token}");
            (StatusCode::OK, [("content-type", "text/plain")], body).into_response()
        }
        None => {
            debug!("[listener] unknown challenge {token}");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
