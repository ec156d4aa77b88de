//! Customer records with encrypted personal fields.
use crate::audit::{AuditAction, AuditContext, AuditEntry, AuditLogger};
use crate::cipher::{CipherError, CustomerFields, EncryptedFieldGroup, FieldCipher};
use crate::context::EngineContext;
use crate::store::{AuditSink, CustomerStore, StoreError};
use chrono::{DateTime, Utc};
use factura_derive::Validate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

pub const ENTITY_KIND: &str = "customer";

#[derive(Debug, Error)]
pub enum CustomerError {
    #[error("invalid customer: {0}")]
    Invalid(String),
    #[error("customer update changes nothing")]
    EmptyUpdate,
    #[error("customer {id} not found")]
    NotFound { id: u64 },
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<String> for CustomerError {
    fn from(message: String) -> Self {
        CustomerError::Invalid(message)
    }
}

/// Buyer identification kinds and their codes in the authority's tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentificationType {
    TaxId,
    NationalId,
    Passport,
    FinalConsumer,
}

impl IdentificationType {
    pub fn code(&self) -> &'static str {
        match self {
            IdentificationType::TaxId => "04",
            IdentificationType::NationalId => "05",
            IdentificationType::Passport => "06",
            IdentificationType::FinalConsumer => "07",
        }
    }
}

impl fmt::Display for IdentificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for IdentificationType {
    type Err = CustomerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "04" | "ruc" | "tax_id" => Ok(IdentificationType::TaxId),
            "05" | "cedula" | "national_id" => Ok(IdentificationType::NationalId),
            "06" | "pasaporte" | "passport" => Ok(IdentificationType::Passport),
            "07" | "consumidor_final" | "final_consumer" => Ok(IdentificationType::FinalConsumer),
            other => Err(CustomerError::Invalid(format!(
                "unknown identification type '{other}'"
            ))),
        }
    }
}

/// Create command for a customer.
///
/// # Examples
/// ```rust
/// use factura_core::customer::{IdentificationType, NewCustomer};
///
/// let err = NewCustomer::new(
///     IdentificationType::NationalId,
///     "0912345678".into(),
///     None,
///     "Ana".into(),
///     "Mora|Vera".into(),
///     "Av. Quito 100".into(),
///     "0999999999".into(),
///     "ana@example.ec".into(),
/// )
/// .unwrap_err();
/// assert!(err.to_string().contains("family_names"));
/// ```
#[derive(Validate, Debug, Clone)]
#[validate_error(CustomerError)]
#[validate(no_field_delimiter)]
pub struct NewCustomer {
    #[validate(skip)]
    identification_type: IdentificationType,
    #[validate(non_empty, no_field_delimiter)]
    identification: String,
    #[validate(skip)]
    legal_name: Option<String>,
    given_names: String,
    family_names: String,
    address: String,
    phone: String,
    email: String,
}

impl NewCustomer {
    pub fn identification_type(&self) -> IdentificationType {
        self.identification_type
    }

    pub fn identification(&self) -> &str {
        &self.identification
    }

    fn fields(&self) -> CustomerFields {
        CustomerFields {
            given_names: self.given_names.trim().to_string(),
            family_names: self.family_names.trim().to_string(),
            address: self.address.trim().to_string(),
            phone: self.phone.trim().to_string(),
            email: self.email.trim().to_string(),
        }
    }
}

/// Explicit update command. `None` leaves a field unchanged.
///
/// `legal_name: Some("")` clears the legal name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerUpdate {
    pub given_names: Option<String>,
    pub family_names: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub legal_name: Option<String>,
    pub active: Option<bool>,
}

impl CustomerUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn touches_fields(&self) -> bool {
        self.given_names.is_some()
            || self.family_names.is_some()
            || self.address.is_some()
            || self.phone.is_some()
            || self.email.is_some()
    }

    fn merge_into(&self, fields: &mut CustomerFields) {
        let pairs = [
            (&self.given_names, &mut fields.given_names),
            (&self.family_names, &mut fields.family_names),
            (&self.address, &mut fields.address),
            (&self.phone, &mut fields.phone),
            (&self.email, &mut fields.email),
        ];
        for (update, slot) in pairs {
            if let Some(value) = update {
                *slot = value.trim().to_string();
            }
        }
    }
}

/// Stored customer. Personal fields only exist inside `encrypted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub id: u64,
    pub identification_type: IdentificationType,
    pub identification: String,
    pub legal_name: Option<String>,
    pub encrypted: EncryptedFieldGroup,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomerRecord {
    /// Legal name when set, otherwise "given family".
    pub fn display_name(&self, fields: &CustomerFields) -> String {
        match self.legal_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => fields.full_name(),
        }
    }

    /// Audit snapshot. Identification metadata only, never PII.
    fn snapshot(&self) -> Value {
        json!({
            "id": self.id,
            "identification_type": self.identification_type,
            "identification": self.identification,
            "active": self.active,
        })
    }
}

/// Create, read, update and delete customers, auditing every mutation.
pub struct CustomerService<'a, S: CustomerStore + AuditSink> {
    store: &'a S,
    cipher: &'a FieldCipher,
    audit: AuditLogger<'a, S>,
}

impl<'a, S: CustomerStore + AuditSink> CustomerService<'a, S> {
    pub fn new(context: &'a EngineContext, store: &'a S) -> Self {
        Self::with_cipher(context.cipher(), store)
    }

    pub fn with_cipher(cipher: &'a FieldCipher, store: &'a S) -> Self {
        Self {
            store,
            cipher,
            audit: AuditLogger::new(store),
        }
    }

    pub fn create(
        &self,
        customer: NewCustomer,
        context: &AuditContext,
    ) -> Result<CustomerRecord, CustomerError> {
        let result = self.try_create(&customer);
        match &result {
            Ok(record) => {
                info!(customer_id = record.id, "customer created");
                self.audit.record(
                    AuditEntry::new(AuditAction::Create, ENTITY_KIND, context)
                        .entity_id(record.id)
                        .after(record.snapshot()),
                );
            }
            Err(e) => self.audit.record(
                AuditEntry::new(AuditAction::Create, ENTITY_KIND, context)
                    .after(json!({ "identification": customer.identification }))
                    .failed(e.to_string()),
            ),
        }
        result
    }

    fn try_create(&self, customer: &NewCustomer) -> Result<CustomerRecord, CustomerError> {
        let encrypted = self.cipher.encrypt_group(&customer.fields())?;
        let now = Utc::now();
        let legal_name = customer
            .legal_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let record = CustomerRecord {
            id: 0,
            identification_type: customer.identification_type,
            identification: customer.identification.trim().to_string(),
            legal_name,
            encrypted,
            active: true,
            created_at: now,
            updated_at: now,
        };
        Ok(self.store.insert_customer(record)?)
    }

    pub fn customer(&self, id: u64) -> Result<CustomerRecord, CustomerError> {
        self.store
            .customer(id)?
            .ok_or(CustomerError::NotFound { id })
    }

    /// Decrypted personal fields of a customer.
    pub fn fields(&self, id: u64) -> Result<CustomerFields, CustomerError> {
        let record = self.customer(id)?;
        Ok(self.cipher.decrypt_group(&record.encrypted)?)
    }

    /// Apply `update`. Personal fields are decrypted, merged and sealed again
    /// under a fresh nonce.
    pub fn update(
        &self,
        id: u64,
        update: CustomerUpdate,
        context: &AuditContext,
    ) -> Result<CustomerRecord, CustomerError> {
        if update.is_empty() {
            return Err(CustomerError::EmptyUpdate);
        }
        let before = self.customer(id)?;
        let result = self.try_update(&before, &update);
        let entry = AuditEntry::new(AuditAction::Update, ENTITY_KIND, context)
            .entity_id(id)
            .before(before.snapshot());
        match &result {
            Ok(after) => {
                info!(customer_id = id, "customer updated");
                self.audit.record(entry.after(after.snapshot()));
            }
            Err(e) => self.audit.record(entry.failed(e.to_string())),
        }
        result
    }

    fn try_update(
        &self,
        before: &CustomerRecord,
        update: &CustomerUpdate,
    ) -> Result<CustomerRecord, CustomerError> {
        let mut record = before.clone();
        if update.touches_fields() {
            let mut fields = self.cipher.decrypt_group(&record.encrypted)?;
            update.merge_into(&mut fields);
            record.encrypted = self.cipher.encrypt_group(&fields)?;
        }
        if let Some(legal_name) = &update.legal_name {
            let legal_name = legal_name.trim();
            record.legal_name = (!legal_name.is_empty()).then(|| legal_name.to_string());
        }
        if let Some(active) = update.active {
            record.active = active;
        }
        record.updated_at = Utc::now();
        self.store.replace_customer(&record)?;
        Ok(record)
    }

    pub fn delete(&self, id: u64, context: &AuditContext) -> Result<(), CustomerError> {
        let before = self.customer(id)?;
        let entry = AuditEntry::new(AuditAction::Delete, ENTITY_KIND, context)
            .entity_id(id)
            .before(before.snapshot());
        match self.store.delete_customer(id) {
            Ok(()) => {
                info!(customer_id = id, "customer deleted");
                self.audit.record(entry);
                Ok(())
            }
            Err(e) => {
                self.audit.record(entry.failed(e.to_string()));
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audit::AuditOutcome;
    use crate::cipher::MasterKey;
    use crate::store::MemoryStore;

    fn test_cipher() -> FieldCipher {
        FieldCipher::new(&MasterKey::from_bytes([7; 32]))
    }

    pub(crate) fn sample_record(identification: &str) -> CustomerRecord {
        let fields = CustomerFields {
            given_names: "Ana".into(),
            family_names: "Mora".into(),
            ..Default::default()
        };
        let now = Utc::now();
        CustomerRecord {
            id: 0,
            identification_type: IdentificationType::NationalId,
            identification: identification.to_string(),
            legal_name: None,
            encrypted: test_cipher().encrypt_group(&fields).expect("encrypt"),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn new_customer(identification: &str) -> NewCustomer {
        NewCustomer::new(
            IdentificationType::NationalId,
            identification.into(),
            None,
            "Ana".into(),
            "Mora".into(),
            "Av. Quito 100".into(),
            "0999999999".into(),
            "ana@example.ec".into(),
        )
        .expect("valid customer")
    }

    #[test]
    fn identification_codes() {
        assert_eq!(IdentificationType::TaxId.code(), "04");
        assert_eq!(IdentificationType::NationalId.code(), "05");
        assert_eq!(IdentificationType::Passport.code(), "06");
        assert_eq!(IdentificationType::FinalConsumer.code(), "07");
        assert_eq!(
            "cedula".parse::<IdentificationType>().expect("parse"),
            IdentificationType::NationalId
        );
        assert!("x".parse::<IdentificationType>().is_err());
    }

    #[test]
    fn new_customer_rejects_delimiter_and_empty_identification() {
        let err = NewCustomer::new(
            IdentificationType::Passport,
            " ".into(),
            None,
            "A".into(),
            "B".into(),
            String::new(),
            String::new(),
            String::new(),
        )
        .expect_err("empty identification");
        assert!(matches!(err, CustomerError::Invalid(_)));

        let err = NewCustomer::new(
            IdentificationType::Passport,
            "P123".into(),
            None,
            "A".into(),
            "B".into(),
            "Calle 1 | Piso 2".into(),
            String::new(),
            String::new(),
        )
        .expect_err("delimiter");
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn create_encrypts_and_audits_without_pii() {
        let store = MemoryStore::new();
        let cipher = test_cipher();
        let service = CustomerService::with_cipher(&cipher, &store);
        let ctx = AuditContext::new(Some(9), "127.0.0.1");

        let record = service
            .create(new_customer("0912345678"), &ctx)
            .expect("create");
        assert_eq!(record.id, 1);
        assert!(record.active);

        let fields = service.fields(record.id).expect("fields");
        assert_eq!(fields.email, "ana@example.ec");
        assert_eq!(record.display_name(&fields), "Ana Mora");

        let entries = store.audit_entries().expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action(), AuditAction::Create);
        assert_eq!(entries[0].actor_id(), Some(9));
        let rendered = serde_json::to_string(&entries[0]).expect("json");
        assert!(!rendered.contains("ana@example.ec"));
        assert!(!rendered.contains("Av. Quito"));
    }

    #[test]
    fn duplicate_identification_fails_and_is_audited() {
        let store = MemoryStore::new();
        let cipher = test_cipher();
        let service = CustomerService::with_cipher(&cipher, &store);
        let ctx = AuditContext::system();
        service.create(new_customer("0912345678"), &ctx).expect("create");

        let err = service
            .create(new_customer("0912345678"), &ctx)
            .expect_err("duplicate");
        assert!(matches!(
            err,
            CustomerError::Store(StoreError::Integrity { .. })
        ));
        let entries = store.audit_entries().expect("entries");
        assert_eq!(entries[1].outcome(), AuditOutcome::Error);
    }

    #[test]
    fn update_reseals_with_fresh_nonce() {
        let store = MemoryStore::new();
        let cipher = test_cipher();
        let service = CustomerService::with_cipher(&cipher, &store);
        let ctx = AuditContext::system();
        let created = service.create(new_customer("0912345678"), &ctx).expect("create");

        let updated = service
            .update(
                created.id,
                CustomerUpdate {
                    phone: Some("0988888888".into()),
                    legal_name: Some("Mora Importaciones".into()),
                    ..Default::default()
                },
                &ctx,
            )
            .expect("update");
        assert_ne!(updated.encrypted.nonce, created.encrypted.nonce);

        let fields = service.fields(created.id).expect("fields");
        assert_eq!(fields.phone, "0988888888");
        assert_eq!(fields.given_names, "Ana");
        assert_eq!(updated.display_name(&fields), "Mora Importaciones");
    }

    #[test]
    fn update_rules() {
        let store = MemoryStore::new();
        let cipher = test_cipher();
        let service = CustomerService::with_cipher(&cipher, &store);
        let ctx = AuditContext::system();
        let created = service.create(new_customer("0912345678"), &ctx).expect("create");

        assert!(matches!(
            service.update(created.id, CustomerUpdate::default(), &ctx),
            Err(CustomerError::EmptyUpdate)
        ));
        assert!(matches!(
            service.update(
                created.id,
                CustomerUpdate {
                    email: Some("a|b".into()),
                    ..Default::default()
                },
                &ctx
            ),
            Err(CustomerError::Cipher(CipherError::DelimiterInField { field: "email" }))
        ));
        assert!(matches!(
            service.update(
                99,
                CustomerUpdate {
                    active: Some(false),
                    ..Default::default()
                },
                &ctx
            ),
            Err(CustomerError::NotFound { id: 99 })
        ));
    }

    #[test]
    fn delete_removes_and_audits() {
        let store = MemoryStore::new();
        let cipher = test_cipher();
        let service = CustomerService::with_cipher(&cipher, &store);
        let ctx = AuditContext::system();
        let created = service.create(new_customer("0912345678"), &ctx).expect("create");

        service.delete(created.id, &ctx).expect("delete");
        assert!(matches!(
            service.customer(created.id),
            Err(CustomerError::NotFound { .. })
        ));
        let entries = store.audit_entries().expect("entries");
        let last = entries.last().expect("entry");
        assert_eq!(last.action(), AuditAction::Delete);
        assert_eq!(last.entity(), Some("1"));
    }
}
