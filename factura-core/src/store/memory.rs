use super::{AuditSink, ConfigStore, CustomerStore, InvoiceStore, SequenceStore, StoreError};
use crate::audit::AuditEntry;
use crate::customer::CustomerRecord;
use crate::issuance::InvoiceRecord;
use crate::numbering::{InvoiceNumber, Series};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CustomerTable {
    next_id: u64,
    rows: BTreeMap<u64, CustomerRecord>,
}

#[derive(Default)]
struct InvoiceTable {
    by_digest: HashMap<String, InvoiceRecord>,
    digest_by_number: HashMap<String, String>,
}

/// In-process store. Each table sits behind its own mutex; each series has its
/// own counter lock so unrelated series never contend.
#[derive(Default)]
pub struct MemoryStore {
    config: Mutex<HashMap<String, String>>,
    sequences: Mutex<HashMap<Series, Arc<Mutex<u64>>>>,
    customers: Mutex<CustomerTable>,
    invoices: Mutex<InvoiceTable>,
    audit: Mutex<Vec<AuditEntry>>,
    fail_audit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the audit trail, oldest first.
    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self.audit.lock()?.clone())
    }

    fn sequence_slot(&self, series: &Series) -> Result<Arc<Mutex<u64>>, StoreError> {
        let mut sequences = self.sequences.lock()?;
        Ok(Arc::clone(sequences.entry(series.clone()).or_default()))
    }

    /// Mutate a stored invoice in place, bypassing every integrity check.
    #[cfg(any(test, feature = "test-hooks"))]
    pub fn tamper_invoice<F>(&self, digest: &str, f: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut InvoiceRecord),
    {
        let mut invoices = self.invoices.lock()?;
        Ok(match invoices.by_digest.get_mut(digest) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        })
    }

    /// Make every subsequent audit append fail until switched off.
    #[cfg(any(test, feature = "test-hooks"))]
    pub fn fail_audit_writes(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.config.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.config
            .lock()?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn put_if_absent(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let mut config = self.config.lock()?;
        if let Some(existing) = config.get(key) {
            return Ok(Some(existing.clone()));
        }
        config.insert(key.to_string(), value.to_string());
        Ok(None)
    }
}

impl SequenceStore for MemoryStore {
    fn last_sequence(&self, series: &Series) -> Result<u64, StoreError> {
        let slot = self.sequence_slot(series)?;
        let last = *slot.lock()?;
        Ok(last)
    }

    fn with_next_sequence<T, E, F>(&self, series: &Series, f: F) -> Result<T, E>
    where
        F: FnOnce(u64) -> Result<T, E>,
        E: From<StoreError>,
    {
        let slot = self.sequence_slot(series)?;
        let mut last = slot.lock().map_err(StoreError::from)?;
        let next = *last + 1;
        let out = f(next)?;
        *last = next;
        Ok(out)
    }
}

impl CustomerStore for MemoryStore {
    fn insert_customer(&self, mut record: CustomerRecord) -> Result<CustomerRecord, StoreError> {
        let mut table = self.customers.lock()?;
        if table
            .rows
            .values()
            .any(|row| row.identification == record.identification)
        {
            return Err(StoreError::Integrity {
                constraint: "customer.identification",
                value: record.identification,
            });
        }
        table.next_id += 1;
        record.id = table.next_id;
        table.rows.insert(record.id, record.clone());
        Ok(record)
    }

    fn customer(&self, id: u64) -> Result<Option<CustomerRecord>, StoreError> {
        Ok(self.customers.lock()?.rows.get(&id).cloned())
    }

    fn customer_by_identification(
        &self,
        identification: &str,
    ) -> Result<Option<CustomerRecord>, StoreError> {
        Ok(self
            .customers
            .lock()?
            .rows
            .values()
            .find(|row| row.identification == identification)
            .cloned())
    }

    fn replace_customer(&self, record: &CustomerRecord) -> Result<(), StoreError> {
        let mut table = self.customers.lock()?;
        if table
            .rows
            .values()
            .any(|row| row.id != record.id && row.identification == record.identification)
        {
            return Err(StoreError::Integrity {
                constraint: "customer.identification",
                value: record.identification.clone(),
            });
        }
        let Some(row) = table.rows.get_mut(&record.id) else {
            return Err(StoreError::NotFound {
                entity: "customer",
                id: record.id.to_string(),
            });
        };
        *row = record.clone();
        Ok(())
    }

    fn delete_customer(&self, id: u64) -> Result<(), StoreError> {
        match self.customers.lock()?.rows.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                entity: "customer",
                id: id.to_string(),
            }),
        }
    }
}

impl InvoiceStore for MemoryStore {
    fn insert_invoice(&self, record: &InvoiceRecord) -> Result<(), StoreError> {
        let mut table = self.invoices.lock()?;
        if table.by_digest.contains_key(&record.digest) {
            return Err(StoreError::Integrity {
                constraint: "invoice.digest",
                value: record.digest.clone(),
            });
        }
        let number = record.number.to_string();
        if table.digest_by_number.contains_key(&number) {
            return Err(StoreError::Integrity {
                constraint: "invoice.number",
                value: number,
            });
        }
        table
            .digest_by_number
            .insert(number, record.digest.clone());
        table
            .by_digest
            .insert(record.digest.clone(), record.clone());
        Ok(())
    }

    fn invoice_by_digest(&self, digest: &str) -> Result<Option<InvoiceRecord>, StoreError> {
        Ok(self.invoices.lock()?.by_digest.get(digest).cloned())
    }

    fn invoice_by_number(
        &self,
        number: &InvoiceNumber,
    ) -> Result<Option<InvoiceRecord>, StoreError> {
        let table = self.invoices.lock()?;
        Ok(table
            .digest_by_number
            .get(&number.to_string())
            .and_then(|digest| table.by_digest.get(digest))
            .cloned())
    }
}

impl AuditSink for MemoryStore {
    fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Persistence("audit sink unavailable".into()));
        }
        self.audit.lock()?.push(entry.clone());
        Ok(())
    }
}
