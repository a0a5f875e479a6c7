//! In-memory remote backend.
//!
//! Keeps accounts, companies and entity tables in process. Used for local
//! development (`remote.backend = "memory"`) and for tests that need a remote
//! API without a network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use unirest_core::{Company, ErrorCode, FilterPredicate, LoginStatus, PropertyMatch};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::traits::{RemoteSession, SessionGateway};
use crate::types::{
    InvoiceOutcome, InvoiceRequest, JournalPosting, PostingOutcome, ReadOutcome, WriteOutcome,
};

const ROW_ID: &str = "RowId";
const ORDER_KEY: &str = "OrderNumber";
const JOURNAL_KEY: &str = "Journal";
const JOURNAL_LINES: &str = "InvJournalLine";

#[derive(Default)]
struct Store {
    accounts: DashMap<String, String>,
    companies: RwLock<Vec<Company>>,
    tables: DashMap<(i32, String), Vec<Value>>,
    next_row_id: AtomicI64,
    next_document: AtomicI64,
    logins: AtomicUsize,
    sessions: AtomicUsize,
}

impl Store {
    fn table_key(company: &Company, entity: &str) -> (i32, String) {
        (company.company_id, entity.to_ascii_lowercase())
    }

    fn rows(&self, company: &Company, entity: &str) -> Vec<Value> {
        self.tables
            .get(&Self::table_key(company, entity))
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}

/// Process-local implementation of the remote API.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    store: Arc<Store>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.store.accounts.insert(username.into(), password.into());
        self
    }

    pub fn with_company(self, company: Company) -> Self {
        self.store.companies.write().push(company);
        self
    }

    /// Seeds an entity table. Rows without a `RowId` get one assigned.
    pub fn with_rows(self, company_id: i32, entity: &str, rows: Vec<Value>) -> Self {
        let rows: Vec<Value> = rows.into_iter().map(|r| self.assign_row_id(r)).collect();
        self.store
            .tables
            .entry((company_id, entity.to_ascii_lowercase()))
            .or_default()
            .extend(rows);
        self
    }

    /// Current contents of an entity table.
    pub fn rows(&self, company_id: i32, entity: &str) -> Vec<Value> {
        self.store
            .tables
            .get(&(company_id, entity.to_ascii_lowercase()))
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Number of login attempts made against this backend.
    pub fn login_count(&self) -> usize {
        self.store.logins.load(Ordering::SeqCst)
    }

    /// Number of sessions opened against this backend.
    pub fn session_count(&self) -> usize {
        self.store.sessions.load(Ordering::SeqCst)
    }

    fn assign_row_id(&self, row: Value) -> Value {
        assign_row_id(&self.store, row)
    }
}

fn assign_row_id(store: &Store, mut row: Value) -> Value {
    if let Some(object) = row.as_object_mut()
        && !object.contains_key(ROW_ID)
    {
        let id = store.next_row_id.fetch_add(1, Ordering::SeqCst) + 1;
        object.insert(ROW_ID.to_string(), json!(id));
    }
    row
}

#[async_trait]
impl SessionGateway for InMemoryGateway {
    async fn open_session(&self) -> Result<Arc<dyn RemoteSession>, GatewayError> {
        self.store.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemorySession {
            store: Arc::clone(&self.store),
            logged_in: AtomicBool::new(false),
        }))
    }
}

struct MemorySession {
    store: Arc<Store>,
    logged_in: AtomicBool,
}

impl MemorySession {
    fn ensure_logged_in(&self) -> Result<(), GatewayError> {
        if self.logged_in.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::NotLoggedIn)
        }
    }
}

/// Look a column up by name, ignoring case and the field underscore.
fn column<'a>(row: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    let bare = name.strip_prefix('_').unwrap_or(name);
    let field = format!("_{bare}");
    row.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(bare))
        .or_else(|| row.iter().find(|(k, _)| k.eq_ignore_ascii_case(&field)))
        .map(|(_, v)| v)
}

fn same_row_id(a: &Value, b: &Value) -> bool {
    match (a.get(ROW_ID), b.get(ROW_ID)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn matches_property(row: &Map<String, Value>, m: &PropertyMatch) -> bool {
    column(row, &m.property)
        .and_then(|v| m.value_type.normalize_json(v))
        .is_some_and(|v| m.values().contains(&v))
}

/// One `Name = literal` term of a folded WHERE expression.
struct Term {
    name: String,
    literal: String,
    quoted: bool,
}

/// Parse the `A = x or A = 'y'` subset of the remote query language.
fn parse_where(expression: &str) -> Option<Vec<Term>> {
    let lowered = expression.to_ascii_lowercase();
    let mut terms = Vec::new();
    let mut start = 0;
    loop {
        let end = lowered[start..]
            .find(" or ")
            .map(|i| start + i)
            .unwrap_or(expression.len());
        let (name, literal) = expression[start..end].split_once('=')?;
        let name = name.trim();
        let literal = literal.trim();
        if name.is_empty() || literal.is_empty() {
            return None;
        }
        let (literal, quoted) = match literal
            .strip_prefix('\'')
            .and_then(|l| l.strip_suffix('\''))
        {
            Some(inner) => (inner, true),
            None => (literal, false),
        };
        terms.push(Term {
            name: name.to_string(),
            literal: literal.to_string(),
            quoted,
        });
        if end == expression.len() {
            return Some(terms);
        }
        start = end + " or ".len();
    }
}

fn matches_term(row: &Map<String, Value>, term: &Term) -> bool {
    let Some(value) = column(row, &term.name) else {
        return false;
    };
    match value {
        Value::String(s) => term.quoted && *s == term.literal,
        Value::Number(n) => match (n.as_f64(), term.literal.parse::<f64>()) {
            (Some(a), Ok(b)) => a == b,
            _ => false,
        },
        Value::Bool(b) => term.literal.eq_ignore_ascii_case(&b.to_string()),
        _ => false,
    }
}

fn evaluate(row: &Value, predicates: &[(Option<&PropertyMatch>, Option<Vec<Term>>)]) -> bool {
    let Some(object) = row.as_object() else {
        return false;
    };
    predicates.iter().all(|(m, terms)| match (m, terms) {
        (Some(m), _) => matches_property(object, m),
        (None, Some(terms)) => terms.iter().any(|t| matches_term(object, t)),
        (None, None) => false,
    })
}

#[async_trait]
impl RemoteSession for MemorySession {
    async fn login(
        &self,
        username: &str,
        password: &str,
        _affiliate_key: Uuid,
    ) -> Result<LoginStatus, GatewayError> {
        self.store.logins.fetch_add(1, Ordering::SeqCst);
        let accepted = self
            .store
            .accounts
            .get(username)
            .is_some_and(|p| p.value() == password);
        if accepted {
            self.logged_in.store(true, Ordering::SeqCst);
            Ok(ErrorCode::Success)
        } else {
            Ok(ErrorCode::Other("UserOrPasswordIncorrect".to_string()))
        }
    }

    async fn companies(&self) -> Result<Option<Vec<Company>>, GatewayError> {
        self.ensure_logged_in()?;
        Ok(Some(self.store.companies.read().clone()))
    }

    async fn query(
        &self,
        company: &Company,
        entity: &str,
        predicates: &[FilterPredicate],
    ) -> Result<Vec<Value>, GatewayError> {
        self.ensure_logged_in()?;

        let compiled = predicates
            .iter()
            .map(|p| match p {
                FilterPredicate::Match(m) => Ok((Some(m), None)),
                FilterPredicate::RawWhere { expression } => parse_where(expression)
                    .map(|terms| (None, Some(terms)))
                    .ok_or_else(|| {
                        GatewayError::Unsupported(format!("where expression: {expression}"))
                    }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self
            .store
            .rows(company, entity)
            .into_iter()
            .filter(|row| evaluate(row, &compiled))
            .collect())
    }

    async fn read(
        &self,
        company: &Company,
        entity: &str,
        key: &Value,
    ) -> Result<ReadOutcome, GatewayError> {
        self.ensure_logged_in()?;
        let Some(key) = key.as_object().filter(|k| !k.is_empty()) else {
            return Ok(ReadOutcome {
                status: ErrorCode::Other("KeyNotFound".to_string()),
                row: None,
            });
        };

        let row = self.store.rows(company, entity).into_iter().find(|row| {
            row.as_object().is_some_and(|object| {
                key.iter()
                    .all(|(name, expected)| column(object, name) == Some(expected))
            })
        });

        Ok(match row {
            Some(row) => ReadOutcome {
                status: ErrorCode::Success,
                row: Some(row),
            },
            None => ReadOutcome {
                status: ErrorCode::Other("KeyNotFound".to_string()),
                row: None,
            },
        })
    }

    async fn query_lines(
        &self,
        company: &Company,
        line_entity: &str,
        master: &Value,
    ) -> Result<Vec<Value>, GatewayError> {
        self.ensure_logged_in()?;
        let Some(order) = master.get(ORDER_KEY) else {
            return Ok(Vec::new());
        };
        Ok(self
            .store
            .rows(company, line_entity)
            .into_iter()
            .filter(|line| line.get(ORDER_KEY) == Some(order))
            .collect())
    }

    async fn insert(
        &self,
        company: &Company,
        entity: &str,
        rows: Vec<Value>,
    ) -> Result<WriteOutcome, GatewayError> {
        self.ensure_logged_in()?;
        if rows.iter().any(|r| !r.is_object()) {
            return Ok(WriteOutcome {
                status: ErrorCode::Other("InvalidObject".to_string()),
                rows: Vec::new(),
            });
        }

        let stored: Vec<Value> = rows
            .into_iter()
            .map(|r| assign_row_id(&self.store, r))
            .collect();
        self.store
            .tables
            .entry(Store::table_key(company, entity))
            .or_default()
            .extend(stored.iter().cloned());

        Ok(WriteOutcome {
            status: ErrorCode::Success,
            rows: stored,
        })
    }

    async fn update(
        &self,
        company: &Company,
        entity: &str,
        rows: Vec<Value>,
    ) -> Result<WriteOutcome, GatewayError> {
        self.ensure_logged_in()?;
        let Some(mut table) = self.store.tables.get_mut(&Store::table_key(company, entity)) else {
            return Ok(WriteOutcome {
                status: ErrorCode::Other("RecordNotFound".to_string()),
                rows: Vec::new(),
            });
        };

        if !rows.iter().all(|r| table.iter().any(|t| same_row_id(t, r))) {
            return Ok(WriteOutcome {
                status: ErrorCode::Other("RecordNotFound".to_string()),
                rows: Vec::new(),
            });
        }

        for row in &rows {
            if let Some(existing) = table.iter_mut().find(|t| same_row_id(t, row)) {
                *existing = row.clone();
            }
        }

        Ok(WriteOutcome {
            status: ErrorCode::Success,
            rows,
        })
    }

    async fn delete(
        &self,
        company: &Company,
        entity: &str,
        rows: Vec<Value>,
    ) -> Result<ErrorCode, GatewayError> {
        self.ensure_logged_in()?;
        let Some(mut table) = self.store.tables.get_mut(&Store::table_key(company, entity)) else {
            return Ok(ErrorCode::Other("RecordNotFound".to_string()));
        };

        if !rows.iter().all(|r| table.iter().any(|t| same_row_id(t, r))) {
            return Ok(ErrorCode::Other("RecordNotFound".to_string()));
        }

        table.retain(|t| !rows.iter().any(|r| same_row_id(t, r)));
        Ok(ErrorCode::Success)
    }

    async fn post_invoice(
        &self,
        _company: &Company,
        request: &InvoiceRequest,
    ) -> Result<InvoiceOutcome, GatewayError> {
        self.ensure_logged_in()?;
        if request.lines.is_empty() {
            return Ok(InvoiceOutcome {
                status: ErrorCode::Other("NoLinesToInvoice".to_string()),
                pdf: None,
                details: Map::new(),
            });
        }

        let number = self.store.next_document.fetch_add(1, Ordering::SeqCst) + 1;
        let mut details = Map::new();
        details.insert("InvoiceNumber".to_string(), json!(number));
        details.insert("Simulated".to_string(), json!(request.simulate));
        details.insert("Lines".to_string(), json!(request.lines.len()));
        if request.send_email {
            details.insert("Emails".to_string(), json!(request.emails));
        }

        let pdf = request
            .return_pdf
            .then(|| format!("%PDF-1.4\n% invoice {number}\n").into_bytes());

        Ok(InvoiceOutcome {
            status: ErrorCode::Success,
            pdf,
            details,
        })
    }

    async fn post_journal(
        &self,
        company: &Company,
        request: &JournalPosting,
    ) -> Result<PostingOutcome, GatewayError> {
        self.ensure_logged_in()?;
        let journal = request.journal.get(JOURNAL_KEY).cloned();
        let key = Store::table_key(company, JOURNAL_LINES);

        let belongs = |line: &Value| journal.is_some() && line.get(JOURNAL_KEY) == journal.as_ref();
        let count = self
            .store
            .rows(company, JOURNAL_LINES)
            .iter()
            .filter(|l| belongs(l))
            .count();

        if count == 0 {
            return Ok(PostingOutcome {
                status: ErrorCode::NoLinesToUpdate,
                details: Map::new(),
            });
        }

        if !request.simulate
            && let Some(mut table) = self.store.tables.get_mut(&key)
        {
            table.retain(|l| !belongs(l));
        }

        let number = self.store.next_document.fetch_add(1, Ordering::SeqCst) + 1;
        let mut details = Map::new();
        details.insert("JournalPostedId".to_string(), json!(number));
        details.insert("Simulated".to_string(), json!(request.simulate));
        details.insert("Lines".to_string(), json!(count));

        Ok(PostingOutcome {
            status: ErrorCode::Success,
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unirest_core::{FieldKind, ValueType};

    fn acme() -> Company {
        Company::new(1, "Acme")
    }

    fn gateway() -> InMemoryGateway {
        InMemoryGateway::new()
            .with_account("alice", "secret")
            .with_company(acme())
            .with_rows(
                1,
                "Debtor",
                vec![
                    json!({ "Account": "1001", "Name": "North", "Blocked": false }),
                    json!({ "Account": "1002", "Name": "South", "Blocked": true }),
                    json!({ "Account": "1003", "Name": "East", "Blocked": false }),
                ],
            )
    }

    async fn session(gateway: &InMemoryGateway) -> Arc<dyn RemoteSession> {
        let session = gateway.open_session().await.unwrap();
        assert!(
            session
                .login("alice", "secret", Uuid::nil())
                .await
                .unwrap()
                .is_success()
        );
        session
    }

    #[tokio::test]
    async fn login_checks_password() {
        let gateway = gateway();
        let session = gateway.open_session().await.unwrap();
        let status = session.login("alice", "nope", Uuid::nil()).await.unwrap();
        assert!(!status.is_success());
        assert!(matches!(
            session.companies().await.unwrap_err(),
            GatewayError::NotLoggedIn
        ));
        assert_eq!(gateway.login_count(), 1);
    }

    #[tokio::test]
    async fn seeded_rows_get_row_ids() {
        let gateway = gateway();
        let rows = gateway.rows(1, "debtor");
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.get(ROW_ID).is_some()));
    }

    #[tokio::test]
    async fn query_evaluates_or_group() {
        let gateway = gateway();
        let session = session(&gateway).await;
        let m = PropertyMatch::new("Account", FieldKind::Property, ValueType::String, "1001")
            .or("1003");

        let rows = session
            .query(&acme(), "Debtor", &[m.into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn query_evaluates_folded_where() {
        let gateway = gateway();
        let session = session(&gateway).await;

        let rows = session
            .query(
                &acme(),
                "Debtor",
                &[FilterPredicate::raw_where(
                    "Account = '1002' or Account = '1003'",
                )],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let unsupported = session
            .query(
                &acme(),
                "Debtor",
                &[FilterPredicate::raw_where("Account > 5")],
            )
            .await;
        assert!(matches!(unsupported, Err(GatewayError::Unsupported(_))));
    }

    #[test]
    fn where_parser_handles_bare_and_quoted() {
        let terms = parse_where("Amount = 10 OR _Account = 'x y'").unwrap();
        assert_eq!(terms.len(), 2);
        assert!(!terms[0].quoted);
        assert_eq!(terms[1].name, "_Account");
        assert_eq!(terms[1].literal, "x y");
        assert!(parse_where("Amount").is_none());
    }

    #[tokio::test]
    async fn insert_update_delete_roundtrip() {
        let gateway = gateway();
        let session = session(&gateway).await;

        let inserted = session
            .insert(&acme(), "Debtor", vec![json!({ "Account": "2000" })])
            .await
            .unwrap();
        assert!(inserted.status.is_success());
        let mut row = inserted.rows[0].clone();
        row["Name"] = json!("Added");

        let updated = session
            .update(&acme(), "Debtor", vec![row.clone()])
            .await
            .unwrap();
        assert!(updated.status.is_success());
        assert!(gateway.rows(1, "Debtor").contains(&row));

        let status = session.delete(&acme(), "Debtor", vec![row]).await.unwrap();
        assert!(status.is_success());
        assert_eq!(gateway.rows(1, "Debtor").len(), 3);
    }

    #[tokio::test]
    async fn journal_without_lines_reports_no_lines() {
        let gateway = gateway();
        let session = session(&gateway).await;
        let posting = JournalPosting {
            journal: json!({ "Journal": "J1" }),
            date: time::OffsetDateTime::UNIX_EPOCH,
            simulate: false,
        };

        let outcome = session.post_journal(&acme(), &posting).await.unwrap();
        assert_eq!(outcome.status, ErrorCode::NoLinesToUpdate);
    }
}
