//! Request and outcome types for remote write and posting operations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use unirest_core::ErrorCode;

/// Which side of the ledger an order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Debtor,
    Creditor,
}

impl OrderKind {
    pub fn order_entity(&self) -> &'static str {
        match self {
            Self::Debtor => "DebtorOrder",
            Self::Creditor => "CreditorOrder",
        }
    }

    pub fn line_entity(&self) -> &'static str {
        match self {
            Self::Debtor => "DebtorOrderLine",
            Self::Creditor => "CreditorOrderLine",
        }
    }
}

/// Result of a remote insert or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub status: ErrorCode,
    /// Rows as stored remotely, including server-assigned fields.
    #[serde(default)]
    pub rows: Vec<Value>,
}

/// Result of reading a single row by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadOutcome {
    pub status: ErrorCode,
    #[serde(default)]
    pub row: Option<Value>,
}

/// Parameters for posting an invoice from an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRequest {
    pub kind: OrderKind,
    pub order: Value,
    pub lines: Vec<Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub simulate: bool,
    pub send_email: bool,
    pub show_invoice: bool,
    pub document_type: String,
    /// Recipients joined with `;`.
    pub emails: String,
    pub return_pdf: bool,
}

/// Result of posting an invoice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceOutcome {
    pub status: ErrorCode,
    #[serde(skip)]
    pub pdf: Option<Vec<u8>>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Parameters for posting a journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalPosting {
    pub journal: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub simulate: bool,
}

/// Result of posting a journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingOutcome {
    pub status: ErrorCode,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}
