//! HTTP adapter for the remote API.
//!
//! Every session holds its own session id, issued by `POST /session/login`
//! and sent back in the `X-Session-Id` header on subsequent calls. Company
//! scoped operations live under `/companies/{id}/...`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::RwLock;
use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use unirest_core::{Company, ErrorCode, FilterPredicate, LoginStatus};
use url::Url;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::traits::{RemoteSession, SessionGateway};
use crate::types::{
    InvoiceOutcome, InvoiceRequest, JournalPosting, PostingOutcome, ReadOutcome, WriteOutcome,
};

const SESSION_HEADER: &str = "X-Session-Id";

/// Gateway that opens sessions against a remote HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: Url,
}

impl HttpGateway {
    /// Creates a gateway for `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GatewayError::connection(format!("Invalid base URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::connection(format!(
                "Base URL cannot carry a path: {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::connection(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl SessionGateway for HttpGateway {
    async fn open_session(&self) -> Result<Arc<dyn RemoteSession>, GatewayError> {
        Ok(Arc::new(HttpSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            session_id: RwLock::new(None),
        }))
    }
}

/// One remote session. Unauthenticated until `login` succeeds.
pub struct HttpSession {
    client: Client,
    base_url: Url,
    session_id: RwLock<Option<String>>,
}

impl HttpSession {
    fn url(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::connection("Base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn company_url(&self, company: &Company, segments: &[&str]) -> Result<Url, GatewayError> {
        let id = company.company_id.to_string();
        let mut all = vec!["companies", id.as_str()];
        all.extend_from_slice(segments);
        self.url(&all)
    }

    async fn call<B, T>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        authenticated: bool,
    ) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        tracing::debug!(method = %method, path = url.path(), "remote call");

        let mut request = self.client.request(method, url);
        if authenticated {
            let session_id = self
                .session_id
                .read()
                .clone()
                .ok_or(GatewayError::NotLoggedIn)?;
            request = request.header(SESSION_HEADER, session_id);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::protocol(e.to_string()))
    }

    async fn post<B, T>(&self, url: Url, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.call(Method::POST, url, Some(body), true).await
    }
}

fn take_status(object: &mut Map<String, Value>) -> Result<ErrorCode, GatewayError> {
    let status = object
        .remove("status")
        .ok_or_else(|| GatewayError::protocol("Response is missing a status"))?;
    serde_json::from_value(status).map_err(|e| GatewayError::protocol(e.to_string()))
}

#[async_trait]
impl RemoteSession for HttpSession {
    async fn login(
        &self,
        username: &str,
        password: &str,
        affiliate_key: Uuid,
    ) -> Result<LoginStatus, GatewayError> {
        let url = self.url(&["session", "login"])?;
        let body = json!({
            "username": username,
            "password": password,
            "affiliateKey": affiliate_key,
        });

        let mut response: Map<String, Value> =
            self.call(Method::POST, url, Some(&body), false).await?;
        let status = take_status(&mut response)?;

        if status.is_success() {
            let session_id = response
                .remove("sessionId")
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| GatewayError::protocol("Login succeeded without a session id"))?;
            *self.session_id.write() = Some(session_id);
        }

        Ok(status)
    }

    async fn companies(&self) -> Result<Option<Vec<Company>>, GatewayError> {
        let url = self.url(&["session", "companies"])?;
        self.call::<(), _>(Method::GET, url, None, true).await
    }

    async fn query(
        &self,
        company: &Company,
        entity: &str,
        predicates: &[FilterPredicate],
    ) -> Result<Vec<Value>, GatewayError> {
        let url = self.company_url(company, &["query", entity])?;
        self.post(url, &json!({ "predicates": predicates })).await
    }

    async fn read(
        &self,
        company: &Company,
        entity: &str,
        key: &Value,
    ) -> Result<ReadOutcome, GatewayError> {
        let url = self.company_url(company, &["crud", entity, "read"])?;
        self.post(url, key).await
    }

    async fn query_lines(
        &self,
        company: &Company,
        line_entity: &str,
        master: &Value,
    ) -> Result<Vec<Value>, GatewayError> {
        let url = self.company_url(company, &["crud", line_entity, "lines"])?;
        self.post(url, master).await
    }

    async fn insert(
        &self,
        company: &Company,
        entity: &str,
        rows: Vec<Value>,
    ) -> Result<WriteOutcome, GatewayError> {
        let url = self.company_url(company, &["crud", entity, "insert"])?;
        self.post(url, &rows).await
    }

    async fn update(
        &self,
        company: &Company,
        entity: &str,
        rows: Vec<Value>,
    ) -> Result<WriteOutcome, GatewayError> {
        let url = self.company_url(company, &["crud", entity, "update"])?;
        self.post(url, &rows).await
    }

    async fn delete(
        &self,
        company: &Company,
        entity: &str,
        rows: Vec<Value>,
    ) -> Result<ErrorCode, GatewayError> {
        let url = self.company_url(company, &["crud", entity, "delete"])?;
        let mut response: Map<String, Value> = self.post(url, &rows).await?;
        take_status(&mut response)
    }

    async fn post_invoice(
        &self,
        company: &Company,
        request: &InvoiceRequest,
    ) -> Result<InvoiceOutcome, GatewayError> {
        let url = self.company_url(company, &["invoice"])?;
        let mut response: Map<String, Value> = self.post(url, request).await?;
        let status = take_status(&mut response)?;

        let pdf = match response.remove("pdf") {
            Some(Value::String(encoded)) => Some(
                STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| GatewayError::protocol(format!("Invalid PDF payload: {e}")))?,
            ),
            _ => None,
        };

        Ok(InvoiceOutcome {
            status,
            pdf,
            details: response,
        })
    }

    async fn post_journal(
        &self,
        company: &Company,
        request: &JournalPosting,
    ) -> Result<PostingOutcome, GatewayError> {
        let url = self.company_url(company, &["posting", "journal"])?;
        self.post(url, request).await
    }
}
