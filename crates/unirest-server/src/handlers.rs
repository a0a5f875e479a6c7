use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use json_patch::{Patch, PatchOperation, patch};
use serde_json::{Value, json};
use time::OffsetDateTime;
use unirest_core::{Company, Credentials, ErrorCode};
use unirest_filter::{EntitySchema, FilterParams};
use unirest_gateway::{InvoiceRequest, JournalPosting, OrderKind};
use url::form_urlencoded;

use crate::auth::BasicCredentials;
use crate::cache::ConnectionEntry;
use crate::error::ApiError;
use crate::server::AppState;

const LIMIT_PARAM: &str = "limit";
const DEFAULT_DOCUMENT_TYPE: &str = "Invoice";
const JOURNAL_ENTITY: &str = "InvJournal";
const ROW_ID: &str = "RowId";

pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "queryEndpoint": "/Companies/:companyId/Query/:type",
        "crudEndpoint": "/Companies/:companyId/Crud/:type",
        "invoiceOrderEndpoint": "/Companies/:companyId/Invoice/DebtorOrders/:orderNumber",
        "invoiceCreditorOrderEndpoint": "/Companies/:companyId/Invoice/CreditorOrders/:orderNumber",
        "postingJournalEndpoint": "/Companies/:companyId/Posting/InventoryJournals/:journalId",
        "types": state.schemas.names(),
    }))
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// A connected session scoped to one company.
struct CompanyScope {
    connection: Arc<ConnectionEntry>,
    company: Company,
}

async fn connect(
    state: &AppState,
    credentials: &Credentials,
) -> Result<Arc<ConnectionEntry>, ApiError> {
    let cancel = state.shutdown.child_token();
    Ok(state.cache.get_connection(credentials, &cancel).await?)
}

impl CompanyScope {
    fn new(connection: Arc<ConnectionEntry>, company_id: i32) -> Result<Self, ApiError> {
        let company = connection
            .company(company_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("Company {company_id} was not found")))?;
        Ok(Self {
            connection,
            company,
        })
    }
}

fn resolve_type(state: &AppState, type_name: &str) -> Result<Arc<EntitySchema>, ApiError> {
    state
        .schemas
        .get(type_name)
        .ok_or_else(|| ApiError::bad_request(format!("The type {type_name} was not found")))
}

/// Query rows of one entity type. Every non-reserved query parameter is a filter.
pub async fn query_entities(
    State(state): State<AppState>,
    BasicCredentials(credentials): BasicCredentials,
    Path((company_id, type_name)): Path<(i32, String)>,
    RawQuery(raw): RawQuery,
) -> Result<Json<Vec<Value>>, ApiError> {
    let connection = connect(&state, &credentials).await?;
    let schema = resolve_type(&state, &type_name)?;
    let scope = CompanyScope::new(connection, company_id)?;
    let params = FilterParams::parse_query(raw.as_deref().unwrap_or_default(), &[]);
    let rows = fetch(&state, &scope, &schema, &params).await?;
    Ok(Json(rows))
}

async fn fetch(
    state: &AppState,
    scope: &CompanyScope,
    schema: &EntitySchema,
    params: &FilterParams,
) -> Result<Vec<Value>, ApiError> {
    let compiled = state.compiler.compile(schema, params)?;
    let rows = scope
        .connection
        .session()
        .query(&scope.company, schema.name(), &compiled.server_predicates)
        .await?;
    Ok(compiled.apply(rows))
}

fn parse_limit(raw: Option<&str>) -> Result<usize, ApiError> {
    let value = raw
        .map(|q| {
            form_urlencoded::parse(q.as_bytes())
                .filter(|(k, _)| k.eq_ignore_ascii_case(LIMIT_PARAM))
                .last()
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or_default();

    match value {
        None => Ok(0),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ApiError::bad_request(format!("Invalid limit '{v}'"))),
    }
}

fn ensure_within_limit(count: usize, limit: usize) -> Result<(), ApiError> {
    if count > limit {
        return Err(ApiError::conflict(format!(
            "There are more values ({count}) matching filter than allowed by the limit ({limit})"
        )));
    }
    Ok(())
}

fn ensure_success(status: ErrorCode) -> Result<(), ApiError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ApiError::Remote(status))
    }
}

/// Insert one object or an array of objects.
pub async fn create_entities(
    State(state): State<AppState>,
    BasicCredentials(credentials): BasicCredentials,
    Path((company_id, type_name)): Path<(i32, String)>,
    body: Bytes,
) -> Result<Json<Vec<Value>>, ApiError> {
    let connection = connect(&state, &credentials).await?;
    let schema = resolve_type(&state, &type_name)?;
    let scope = CompanyScope::new(connection, company_id)?;

    let expected = || ApiError::bad_request("Object or array is expected");
    let rows = match serde_json::from_slice::<Value>(&body).map_err(|_| expected())? {
        Value::Object(o) => vec![Value::Object(o)],
        Value::Array(items) if items.iter().all(Value::is_object) => items,
        _ => return Err(expected()),
    };

    let outcome = scope
        .connection
        .session()
        .insert(&scope.company, schema.name(), rows)
        .await?;
    ensure_success(outcome.status)?;

    tracing::info!(
        company_id,
        entity = schema.name(),
        count = outcome.rows.len(),
        "inserted rows"
    );
    Ok(Json(outcome.rows))
}

/// Parse a JSON Patch document, refusing operations on the row key.
fn parse_patch(body: &[u8]) -> Result<Patch, ApiError> {
    let operations: Patch = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON Patch document: {e}")))?;

    for op in operations.0.iter() {
        let path = match op {
            PatchOperation::Add(op) => op.path.as_str(),
            PatchOperation::Remove(op) => op.path.as_str(),
            PatchOperation::Replace(op) => op.path.as_str(),
            PatchOperation::Move(op) => op.path.as_str(),
            PatchOperation::Copy(op) => op.path.as_str(),
            PatchOperation::Test(_) => continue,
        };
        let target = path.trim_start_matches('/');
        if target.eq_ignore_ascii_case(ROW_ID) || target.eq_ignore_ascii_case("_RowId") {
            return Err(ApiError::bad_request(format!(
                "Cannot modify {ROW_ID} via JSON Patch"
            )));
        }
    }

    Ok(operations)
}

/// Apply a JSON Patch to every row matching the filter.
pub async fn patch_entities(
    State(state): State<AppState>,
    BasicCredentials(credentials): BasicCredentials,
    Path((company_id, type_name)): Path<(i32, String)>,
    RawQuery(raw): RawQuery,
    body: Bytes,
) -> Result<Json<Vec<Value>>, ApiError> {
    let connection = connect(&state, &credentials).await?;
    let schema = resolve_type(&state, &type_name)?;
    let scope = CompanyScope::new(connection, company_id)?;
    let limit = parse_limit(raw.as_deref())?;
    let operations = parse_patch(&body)?;
    let params = FilterParams::parse_query(raw.as_deref().unwrap_or_default(), &[LIMIT_PARAM]);

    let mut rows = fetch(&state, &scope, &schema, &params).await?;
    ensure_within_limit(rows.len(), limit)?;

    for row in rows.iter_mut() {
        patch(row, &operations)
            .map_err(|e| ApiError::bad_request(format!("Patch operation failed: {e}")))?;
    }

    let outcome = scope
        .connection
        .session()
        .update(&scope.company, schema.name(), rows)
        .await?;
    ensure_success(outcome.status)?;

    tracing::info!(
        company_id,
        entity = schema.name(),
        count = outcome.rows.len(),
        "patched rows"
    );
    Ok(Json(outcome.rows))
}

/// Delete every row matching the filter.
pub async fn delete_entities(
    State(state): State<AppState>,
    BasicCredentials(credentials): BasicCredentials,
    Path((company_id, type_name)): Path<(i32, String)>,
    RawQuery(raw): RawQuery,
) -> Result<StatusCode, ApiError> {
    let connection = connect(&state, &credentials).await?;
    let schema = resolve_type(&state, &type_name)?;
    let scope = CompanyScope::new(connection, company_id)?;
    let limit = parse_limit(raw.as_deref())?;
    let params = FilterParams::parse_query(raw.as_deref().unwrap_or_default(), &[LIMIT_PARAM]);

    let rows = fetch(&state, &scope, &schema, &params).await?;
    ensure_within_limit(rows.len(), limit)?;

    let count = rows.len();
    let status = scope
        .connection
        .session()
        .delete(&scope.company, schema.name(), rows)
        .await?;
    ensure_success(status)?;

    tracing::info!(company_id, entity = schema.name(), count, "deleted rows");
    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters of the invoice routes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InvoiceParams {
    simulate: bool,
    document_type: String,
    emails: Vec<String>,
}

impl InvoiceParams {
    fn parse(raw: Option<&str>) -> Result<Self, ApiError> {
        let mut params = Self {
            simulate: false,
            document_type: DEFAULT_DOCUMENT_TYPE.to_string(),
            emails: Vec::new(),
        };
        for (key, value) in form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
            match key.to_ascii_lowercase().as_str() {
                "simulate" => params.simulate = parse_bool("simulate", &value)?,
                "documenttype" => params.document_type = value.into_owned(),
                "email" if !value.is_empty() => params.emails.push(value.into_owned()),
                _ => {}
            }
        }
        Ok(params)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ApiError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(ApiError::bad_request(format!("Invalid {name} '{value}'"))),
    }
}

fn accepts_pdf(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| {
            v.split(';')
                .next()
                .is_some_and(|m| m.trim().eq_ignore_ascii_case("application/pdf"))
        })
}

pub async fn invoice_debtor_order(
    State(state): State<AppState>,
    BasicCredentials(credentials): BasicCredentials,
    Path((company_id, order_number)): Path<(i32, i32)>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request = OrderInvoice {
        kind: OrderKind::Debtor,
        order_number,
        params: InvoiceParams::parse(raw.as_deref())?,
        return_pdf: accepts_pdf(&headers),
    };
    post_order_invoice(&state, &credentials, company_id, request).await
}

pub async fn invoice_creditor_order(
    State(state): State<AppState>,
    BasicCredentials(credentials): BasicCredentials,
    Path((company_id, order_number)): Path<(i32, i32)>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request = OrderInvoice {
        kind: OrderKind::Creditor,
        order_number,
        params: InvoiceParams::parse(raw.as_deref())?,
        return_pdf: accepts_pdf(&headers),
    };
    post_order_invoice(&state, &credentials, company_id, request).await
}

struct OrderInvoice {
    kind: OrderKind,
    order_number: i32,
    params: InvoiceParams,
    return_pdf: bool,
}

async fn post_order_invoice(
    state: &AppState,
    credentials: &Credentials,
    company_id: i32,
    invoice: OrderInvoice,
) -> Result<Response, ApiError> {
    let scope = CompanyScope::new(connect(state, credentials).await?, company_id)?;
    let session = scope.connection.session();

    let read = session
        .read(
            &scope.company,
            invoice.kind.order_entity(),
            &json!({ "OrderNumber": invoice.order_number }),
        )
        .await?;
    ensure_success(read.status.clone())?;
    let order = read
        .row
        .ok_or_else(|| ApiError::Remote(ErrorCode::Other("KeyNotFound".to_string())))?;

    let lines = session
        .query_lines(&scope.company, invoice.kind.line_entity(), &order)
        .await?;

    let emails = invoice.params.emails.join(";");
    let send_email = !emails.is_empty();
    if send_email {
        tracing::info!(emails = %emails, "Sending email to recipients");
    } else {
        tracing::info!("No email address specified, skipping...");
    }

    let request = InvoiceRequest {
        kind: invoice.kind,
        order,
        lines,
        date: OffsetDateTime::now_utc(),
        simulate: invoice.params.simulate,
        send_email,
        show_invoice: invoice.kind == OrderKind::Creditor,
        document_type: invoice.params.document_type,
        emails,
        return_pdf: invoice.return_pdf,
    };

    let mut outcome = session.post_invoice(&scope.company, &request).await?;
    ensure_success(outcome.status.clone())?;

    tracing::info!(
        company_id,
        order_number = invoice.order_number,
        simulate = request.simulate,
        "posted invoice"
    );

    if let Some(pdf) = outcome.pdf.take() {
        return Ok(([(header::CONTENT_TYPE, "application/pdf")], pdf).into_response());
    }
    Ok(Json(outcome).into_response())
}

pub async fn post_inventory_journal(
    State(state): State<AppState>,
    BasicCredentials(credentials): BasicCredentials,
    Path((company_id, journal_id)): Path<(i32, i64)>,
    RawQuery(raw): RawQuery,
) -> Result<Response, ApiError> {
    let mut simulate = false;
    for (key, value) in form_urlencoded::parse(raw.as_deref().unwrap_or_default().as_bytes()) {
        if key.eq_ignore_ascii_case("simulate") {
            simulate = parse_bool("simulate", &value)?;
        }
    }

    let scope = CompanyScope::new(connect(&state, &credentials).await?, company_id)?;
    let session = scope.connection.session();

    let read = session
        .read(&scope.company, JOURNAL_ENTITY, &json!({ ROW_ID: journal_id }))
        .await?;
    ensure_success(read.status.clone())?;
    let journal = read
        .row
        .ok_or_else(|| ApiError::Remote(ErrorCode::Other("KeyNotFound".to_string())))?;

    let posting = JournalPosting {
        journal,
        date: OffsetDateTime::now_utc(),
        simulate,
    };
    let outcome = session.post_journal(&scope.company, &posting).await?;

    if outcome.status == ErrorCode::NoLinesToUpdate {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    ensure_success(outcome.status.clone())?;

    tracing::info!(company_id, journal_id, simulate, "posted journal");
    Ok(Json(outcome).into_response())
}
