//! Remote session gateway for unirest.
//!
//! Provides the [`SessionGateway`] / [`RemoteSession`] seam together with an
//! HTTP adapter and an in-memory backend.

pub mod error;
pub mod http;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::GatewayError;
pub use http::HttpGateway;
pub use memory::InMemoryGateway;
pub use traits::{RemoteSession, SessionGateway};
pub use types::{
    InvoiceOutcome, InvoiceRequest, JournalPosting, OrderKind, PostingOutcome, ReadOutcome,
    WriteOutcome,
};
