//! Storage collaborator interfaces and the bundled implementations.
//!
//! The engine never talks to a database directly. Every component borrows one
//! of the traits below, and [`MemoryStore`] and [`JsonFileStore`] implement
//! all of them.
mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::audit::AuditEntry;
use crate::customer::CustomerRecord;
use crate::issuance::InvoiceRecord;
use crate::numbering::{InvoiceNumber, Series};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint '{constraint}' violated by '{value}'")]
    Integrity {
        constraint: &'static str,
        value: String,
    },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("failed to access store file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store document is malformed: {source}")]
    Malformed {
        #[from]
        source: serde_json::Error,
    },
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

/// Opaque string configuration records keyed by name.
pub trait ConfigStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Store `value` unless `key` already exists. Returns the existing value
    /// when there is one, leaving it in place.
    fn put_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, StoreError>;
}

/// Per-series invoice counters.
pub trait SequenceStore {
    /// Highest committed sequence for `series`, `0` if none.
    fn last_sequence(&self, series: &Series) -> Result<u64, StoreError>;

    /// Run `f` with `last + 1` while holding the series exclusively.
    ///
    /// The counter moves to `last + 1` only if `f` returns `Ok`. Concurrent
    /// callers for the same series wait until the scope ends.
    fn with_next_sequence<T, E, F>(&self, series: &Series, f: F) -> Result<T, E>
    where
        F: FnOnce(u64) -> Result<T, E>,
        E: From<StoreError>;
}

pub trait CustomerStore {
    /// Insert a new customer. The store assigns `id`; identification is unique.
    fn insert_customer(&self, record: CustomerRecord) -> Result<CustomerRecord, StoreError>;
    fn customer(&self, id: u64) -> Result<Option<CustomerRecord>, StoreError>;
    fn customer_by_identification(
        &self,
        identification: &str,
    ) -> Result<Option<CustomerRecord>, StoreError>;
    fn replace_customer(&self, record: &CustomerRecord) -> Result<(), StoreError>;
    fn delete_customer(&self, id: u64) -> Result<(), StoreError>;
}

pub trait InvoiceStore {
    /// Insert an issued invoice. Digest and invoice number are unique.
    fn insert_invoice(&self, record: &InvoiceRecord) -> Result<(), StoreError>;
    fn invoice_by_digest(&self, digest: &str) -> Result<Option<InvoiceRecord>, StoreError>;
    fn invoice_by_number(&self, number: &InvoiceNumber)
        -> Result<Option<InvoiceRecord>, StoreError>;
}

/// Append-only audit storage: entries are never updated or removed.
pub trait AuditSink {
    fn append(&self, entry: &AuditEntry) -> Result<(), StoreError>;
}

/// Shorthand for a store that backs every engine component.
pub trait EngineStore: ConfigStore + SequenceStore + CustomerStore + InvoiceStore + AuditSink {}

impl<T> EngineStore for T where T: ConfigStore + SequenceStore + CustomerStore + InvoiceStore + AuditSink {}
