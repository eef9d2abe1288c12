use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Identifier;

/// Authority-side order state as reported by the ACME server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub url: String,
    pub status: OrderStatus,
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub authorizations: Vec<String>,
    pub finalize_url: String,
    #[serde(default)]
    pub certificate_url: Option<String>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

/// Raw issued chain plus the links to alternate chains offered for it.
#[derive(Debug, Clone, Default)]
pub struct AcmeCertificate {
    pub certificate: Vec<u8>,
    pub alternate_links: Vec<String>,
}

/// One pending HTTP-01 challenge of an order's authorizations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpChallenge {
    pub url: String,
    pub token: String,
    pub key_authorization: String,
}

/// Operations the renewal engine needs from an ACME certificate authority.
///
/// The wire protocol (account keys, JWS, nonces) lives behind this trait.
#[async_trait]
pub trait AcmeAuthority: Send + Sync {
    async fn create_order(&self, identifiers: &[Identifier]) -> Result<OrderDetails, AuthorityError>;
    async fn submit_csr(
        &self,
        details: &OrderDetails,
        csr_der: &[u8],
    ) -> Result<OrderDetails, AuthorityError>;
    async fn get_certificate(&self, details: &OrderDetails) -> Result<AcmeCertificate, AuthorityError>;
    async fn get_alternate(&self, link: &str) -> Result<Vec<u8>, AuthorityError>;
    async fn revoke_certificate(&self, certificate_der: &[u8]) -> Result<(), AuthorityError>;

    /// HTTP-01 challenges still to be answered for the order.
    async fn http_challenges(&self, details: &OrderDetails) -> Result<Vec<HttpChallenge>, AuthorityError>;
    /// Tells the authority the challenge response is in place.
    async fn answer_challenge(&self, challenge: &HttpChallenge) -> Result<(), AuthorityError>;
    /// Current state of the order.
    async fn refresh_order(&self, details: &OrderDetails) -> Result<OrderDetails, AuthorityError>;
}

#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("authority unavailable: {0}")]
    Unavailable(String),
    #[error("authority rejected the request: {0}")]
    Rejected(String),
    #[error("authority operation failed: {0}")]
    Operation(String),
}
