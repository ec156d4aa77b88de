use super::{AuditSink, ConfigStore, CustomerStore, InvoiceStore, SequenceStore, StoreError};
use crate::audit::AuditEntry;
use crate::customer::CustomerRecord;
use crate::issuance::InvoiceRecord;
use crate::numbering::{InvoiceNumber, Series};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use tracing::debug;

const SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    schema_version: u8,
    #[serde(default)]
    config: BTreeMap<String, String>,
    #[serde(default)]
    sequences: BTreeMap<String, u64>,
    #[serde(default)]
    next_customer_id: u64,
    #[serde(default)]
    customers: BTreeMap<u64, CustomerRecord>,
    #[serde(default)]
    invoices: Vec<InvoiceRecord>,
    #[serde(default)]
    audit_log: Vec<AuditEntry>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            config: BTreeMap::new(),
            sequences: BTreeMap::new(),
            next_customer_id: 0,
            customers: BTreeMap::new(),
            invoices: Vec::new(),
            audit_log: Vec::new(),
        }
    }
}

impl StoreDocument {
    /// Next sequence for `series`: one past the counter or the highest stored
    /// invoice of that series, whichever is larger.
    fn next_sequence(&self, series: &Series) -> u64 {
        let counter = self.sequences.get(&series.to_string()).copied().unwrap_or(0);
        let stored = self
            .invoices
            .iter()
            .filter(|row| row.number.series() == series)
            .map(|row| row.number.sequence())
            .max()
            .unwrap_or(0);
        counter.max(stored) + 1
    }
}

/// Holder of the cross-process writer lock within this handle.
///
/// Reentrant per thread, so a numbering scope can call back into the store
/// while it keeps the file locked.
#[derive(Default)]
struct WriterState {
    owner: Option<ThreadId>,
    depth: usize,
    lock_file: Option<File>,
}

struct WriterGuard<'a> {
    store: &'a JsonFileStore,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        let mut state = match self.store.writer.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.depth -= 1;
        if state.depth == 0 {
            if let Some(file) = state.lock_file.take() {
                // Closing the handle releases the lock as well.
                let _ = FileExt::unlock(&file);
            }
            state.owner = None;
            self.store.writer_released.notify_one();
        }
    }
}

/// Single-file JSON store for the command-line tool.
///
/// Every mutation rewrites the whole document through a temp file and a
/// rename, so readers never see a half-written file. Writers hold an
/// exclusive lock on a sidecar `<file>.lock`, which serializes handles in
/// other processes as well as threads in this one. A numbering scope keeps
/// that lock until its counter is committed.
///
/// The audit trail lives in the same document, so each append costs a full
/// rewrite. That is fine at command-line volumes; a long-lived service
/// should use a store with a real append path.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    writer: Mutex<WriterState>,
    writer_released: Condvar,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut lock_name = path.clone().into_os_string();
        lock_name.push(".lock");
        let store = Self {
            path,
            lock_path: PathBuf::from(lock_name),
            writer: Mutex::new(WriterState::default()),
            writer_released: Condvar::new(),
        };
        // Surface a corrupt file at open time.
        store.read_document()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the audit trail, oldest first.
    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self.read_document()?.audit_log)
    }

    fn read_document(&self) -> Result<StoreDocument, StoreError> {
        if !self.path.exists() {
            return Ok(StoreDocument::default());
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| self.io_error(source))?;
        if raw.trim().is_empty() {
            return Ok(StoreDocument::default());
        }
        let doc = serde_json::from_str::<StoreDocument>(&raw)?;
        if doc.schema_version != SCHEMA_VERSION {
            return Err(StoreError::Persistence(format!(
                "unsupported store schema version {}",
                doc.schema_version
            )));
        }
        Ok(doc)
    }

    fn write_document(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        self.ensure_parent()?;
        let serialized = serde_json::to_vec_pretty(doc)?;
        let mut tmp = self.path.clone();
        tmp.set_extension("tmp");
        fs::write(&tmp, serialized).map_err(|source| self.io_error(source))?;
        fs::rename(&tmp, &self.path).map_err(|source| self.io_error(source))?;
        Ok(())
    }

    fn ensure_parent(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn lock_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.lock_path.clone(),
            source,
        }
    }

    /// Take the writer lock, blocking until other threads and processes
    /// release it. Nested calls on the owning thread only bump the depth.
    fn lock_writer(&self) -> Result<WriterGuard<'_>, StoreError> {
        let me = thread::current().id();
        let mut state = self.writer.lock()?;
        while state.owner.is_some_and(|owner| owner != me) {
            state = self.writer_released.wait(state)?;
        }
        if state.owner.is_none() {
            self.ensure_parent()?;
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&self.lock_path)
                .map_err(|source| self.lock_error(source))?;
            FileExt::lock_exclusive(&file).map_err(|source| self.lock_error(source))?;
            debug!(path = %self.lock_path.display(), "acquired store writer lock");
            state.lock_file = Some(file);
            state.owner = Some(me);
        }
        state.depth += 1;
        Ok(WriterGuard { store: self })
    }

    fn read<T>(&self, f: impl FnOnce(&StoreDocument) -> T) -> Result<T, StoreError> {
        let doc = self.read_document()?;
        Ok(f(&doc))
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut StoreDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _writer = self.lock_writer()?;
        let mut doc = self.read_document()?;
        let out = f(&mut doc)?;
        self.write_document(&doc)?;
        Ok(out)
    }
}

impl ConfigStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(|doc| doc.config.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.config.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn put_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        self.update(|doc| {
            if let Some(existing) = doc.config.get(key) {
                return Ok(Some(existing.clone()));
            }
            doc.config.insert(key.to_string(), value.to_string());
            Ok(None)
        })
    }
}

impl SequenceStore for JsonFileStore {
    fn last_sequence(&self, series: &Series) -> Result<u64, StoreError> {
        self.read(|doc| doc.sequences.get(&series.to_string()).copied().unwrap_or(0))
    }

    fn with_next_sequence<T, E, F>(&self, series: &Series, f: F) -> Result<T, E>
    where
        F: FnOnce(u64) -> Result<T, E>,
        E: From<StoreError>,
    {
        // The writer lock spans the whole scope. Writes made by `f` reenter it.
        let _writer = self.lock_writer()?;
        let next = self.read_document()?.next_sequence(series);
        let out = f(next)?;
        self.update(|doc| {
            let slot = doc.sequences.entry(series.to_string()).or_insert(0);
            *slot = (*slot).max(next);
            Ok(())
        })?;
        Ok(out)
    }
}

impl CustomerStore for JsonFileStore {
    fn insert_customer(&self, mut record: CustomerRecord) -> Result<CustomerRecord, StoreError> {
        self.update(|doc| {
            if doc
                .customers
                .values()
                .any(|row| row.identification == record.identification)
            {
                return Err(StoreError::Integrity {
                    constraint: "customer.identification",
                    value: record.identification.clone(),
                });
            }
            doc.next_customer_id += 1;
            record.id = doc.next_customer_id;
            doc.customers.insert(record.id, record.clone());
            Ok(record)
        })
    }

    fn customer(&self, id: u64) -> Result<Option<CustomerRecord>, StoreError> {
        self.read(|doc| doc.customers.get(&id).cloned())
    }

    fn customer_by_identification(
        &self,
        identification: &str,
    ) -> Result<Option<CustomerRecord>, StoreError> {
        self.read(|doc| {
            doc.customers
                .values()
                .find(|row| row.identification == identification)
                .cloned()
        })
    }

    fn replace_customer(&self, record: &CustomerRecord) -> Result<(), StoreError> {
        self.update(|doc| {
            if doc
                .customers
                .values()
                .any(|row| row.id != record.id && row.identification == record.identification)
            {
                return Err(StoreError::Integrity {
                    constraint: "customer.identification",
                    value: record.identification.clone(),
                });
            }
            let Some(row) = doc.customers.get_mut(&record.id) else {
                return Err(StoreError::NotFound {
                    entity: "customer",
                    id: record.id.to_string(),
                });
            };
            *row = record.clone();
            Ok(())
        })
    }

    fn delete_customer(&self, id: u64) -> Result<(), StoreError> {
        self.update(|doc| match doc.customers.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                entity: "customer",
                id: id.to_string(),
            }),
        })
    }
}

impl InvoiceStore for JsonFileStore {
    fn insert_invoice(&self, record: &InvoiceRecord) -> Result<(), StoreError> {
        self.update(|doc| {
            if doc.invoices.iter().any(|row| row.digest == record.digest) {
                return Err(StoreError::Integrity {
                    constraint: "invoice.digest",
                    value: record.digest.clone(),
                });
            }
            if doc.invoices.iter().any(|row| row.number == record.number) {
                return Err(StoreError::Integrity {
                    constraint: "invoice.number",
                    value: record.number.to_string(),
                });
            }
            doc.invoices.push(record.clone());
            Ok(())
        })
    }

    fn invoice_by_digest(&self, digest: &str) -> Result<Option<InvoiceRecord>, StoreError> {
        self.read(|doc| doc.invoices.iter().find(|row| row.digest == digest).cloned())
    }

    fn invoice_by_number(
        &self,
        number: &InvoiceNumber,
    ) -> Result<Option<InvoiceRecord>, StoreError> {
        self.read(|doc| doc.invoices.iter().find(|row| &row.number == number).cloned())
    }
}

impl AuditSink for JsonFileStore {
    fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.audit_log.push(entry.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numbering::SequentialNumberer;

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::open(dir.path().join("store.json")).expect("open");
        assert_eq!(store.get("rsa_keys").expect("get"), None);
        assert_eq!(store.last_sequence(&Series::default()).expect("last"), 0);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("store.json");
        {
            let store = JsonFileStore::open(&path).expect("open");
            store.put("greeting", "hola").expect("put");
            let numberer = SequentialNumberer::new(&store);
            numberer
                .next_invoice_number(&Series::default())
                .expect("number");
        }
        let store = JsonFileStore::open(&path).expect("reopen");
        assert_eq!(store.get("greeting").expect("get").as_deref(), Some("hola"));
        let next = SequentialNumberer::new(&store)
            .next_invoice_number(&Series::default())
            .expect("number");
        assert_eq!(next.to_string(), "001-001-000000002");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn put_if_absent_keeps_first_value_across_handles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let first = JsonFileStore::open(&path).expect("open");
        let second = JsonFileStore::open(&path).expect("open");
        assert_eq!(first.put_if_absent("rsa_keys", "a").expect("put"), None);
        assert_eq!(
            second.put_if_absent("rsa_keys", "b").expect("put").as_deref(),
            Some("a")
        );
        assert_eq!(second.get("rsa_keys").expect("get").as_deref(), Some("a"));
    }

    #[test]
    fn failed_scope_leaves_counter_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::open(dir.path().join("store.json")).expect("open");
        let series = Series::default();
        let out: Result<(), StoreError> = store.with_next_sequence(&series, |_| {
            Err(StoreError::Persistence("boom".into()))
        });
        assert!(out.is_err());
        assert_eq!(store.last_sequence(&series).expect("last"), 0);
    }
}
