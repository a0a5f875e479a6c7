//! The Remote Session Gateway seam.
//!
//! The rest of the system talks to the remote API only through these two
//! traits. Implementations must be thread-safe (`Send + Sync`); one session
//! is shared by every request made with the same credentials.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use unirest_core::{Company, ErrorCode, FilterPredicate, LoginStatus};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::types::{
    InvoiceOutcome, InvoiceRequest, JournalPosting, PostingOutcome, ReadOutcome, WriteOutcome,
};

/// Factory for remote sessions.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    /// Opens a fresh, unauthenticated session.
    async fn open_session(&self) -> Result<Arc<dyn RemoteSession>, GatewayError>;
}

/// A session against the remote API.
///
/// # Example
///
/// ```ignore
/// let session = gateway.open_session().await?;
/// if session.login("user", "pass", affiliate_key).await?.is_success() {
///     let companies = session.companies().await?;
/// }
/// ```
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Authenticates the session.
    ///
    /// A rejected login is reported through the returned status, not as an error.
    async fn login(
        &self,
        username: &str,
        password: &str,
        affiliate_key: Uuid,
    ) -> Result<LoginStatus, GatewayError>;

    /// Lists the companies visible to the session.
    ///
    /// `None` is a documented transient answer of the remote API and callers
    /// are expected to retry.
    async fn companies(&self) -> Result<Option<Vec<Company>>, GatewayError>;

    /// Runs a query against an entity table of one company.
    async fn query(
        &self,
        company: &Company,
        entity: &str,
        predicates: &[FilterPredicate],
    ) -> Result<Vec<Value>, GatewayError>;

    /// Reads one row identified by the key fields present in `key`.
    async fn read(
        &self,
        company: &Company,
        entity: &str,
        key: &Value,
    ) -> Result<ReadOutcome, GatewayError>;

    /// Loads the detail rows that belong to a master row.
    async fn query_lines(
        &self,
        company: &Company,
        line_entity: &str,
        master: &Value,
    ) -> Result<Vec<Value>, GatewayError>;

    async fn insert(
        &self,
        company: &Company,
        entity: &str,
        rows: Vec<Value>,
    ) -> Result<WriteOutcome, GatewayError>;

    async fn update(
        &self,
        company: &Company,
        entity: &str,
        rows: Vec<Value>,
    ) -> Result<WriteOutcome, GatewayError>;

    async fn delete(
        &self,
        company: &Company,
        entity: &str,
        rows: Vec<Value>,
    ) -> Result<ErrorCode, GatewayError>;

    async fn post_invoice(
        &self,
        company: &Company,
        request: &InvoiceRequest,
    ) -> Result<InvoiceOutcome, GatewayError>;

    async fn post_journal(
        &self,
        company: &Company,
        request: &JournalPosting,
    ) -> Result<PostingOutcome, GatewayError>;
}
