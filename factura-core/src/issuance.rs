//! Invoice issuance: number, sign, authorize and persist in one series scope.
use crate::access_key::{compute_access_key, AccessKey, AccessKeyError, DocumentType};
use crate::authority::{
    AuthorityError, AuthorizationAuthority, AuthorizationRequest, AuthorizationStatus,
    SimulatedAuthority,
};
use crate::cipher::{CipherError, CustomerFields};
use crate::context::EngineContext;
use crate::invoice::{
    CustomerIdentity, DocumentError, DocumentSigner, InvoiceMeta, InvoiceTotals, LineItem,
    LineItemInput, QrCodeError, QrPayload, ValidationError,
};
use crate::numbering::{InvoiceNumber, NumberingError, SequentialNumberer, Series};
use crate::store::{AuditSink, CustomerStore, InvoiceStore, SequenceStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

pub use crate::audit::AuditContext;
use crate::audit::{AuditAction, AuditEntry, AuditLogger};

pub const ENTITY_KIND: &str = "invoice";

#[derive(Debug, Error)]
pub enum IssueError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("customer {id} not found")]
    CustomerNotFound { id: u64 },
    #[error("customer {id} is inactive")]
    CustomerInactive { id: u64 },
    #[error(transparent)]
    Numbering(#[from] NumberingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    AccessKey(#[from] AccessKeyError),
    #[error(transparent)]
    Authority(#[from] AuthorityError),
    #[error(transparent)]
    Qr(#[from] QrCodeError),
}

/// Caller input for one invoice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueRequest {
    pub customer_id: u64,
    /// Defaults to the configured series.
    pub series: Option<Series>,
    pub items: Vec<LineItemInput>,
    pub notes: Option<String>,
}

impl IssueRequest {
    pub fn new(customer_id: u64, items: Vec<LineItemInput>) -> Self {
        Self {
            customer_id,
            items,
            ..Default::default()
        }
    }
}

/// A stored, signed invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub number: InvoiceNumber,
    pub access_key: AccessKey,
    pub digest: String,
    pub signature: String,
    pub signed_body: String,
    pub canonical_body: String,
    pub issued_at: DateTime<Utc>,
    pub totals: InvoiceTotals,
    pub line_items: Vec<LineItem>,
    pub customer_id: u64,
    pub customer_display_name: String,
    pub customer_identification: String,
    pub authorization_status: AuthorizationStatus,
    pub authorization_number: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub qr_payload: QrPayload,
    pub notes: Option<String>,
    pub issued_by: Option<u64>,
}

pub struct IssuanceService<'a, S: AuditSink> {
    context: &'a EngineContext,
    store: &'a S,
    authority: &'a dyn AuthorizationAuthority,
    audit: AuditLogger<'a, S>,
}

impl<'a, S> IssuanceService<'a, S>
where
    S: SequenceStore + CustomerStore + InvoiceStore + AuditSink,
{
    pub fn new(context: &'a EngineContext, store: &'a S) -> Self {
        Self {
            context,
            store,
            authority: &SimulatedAuthority,
            audit: AuditLogger::new(store),
        }
    }

    pub fn with_authority(mut self, authority: &'a dyn AuthorizationAuthority) -> Self {
        self.authority = authority;
        self
    }

    /// Issue, sign and store one invoice.
    ///
    /// The invoice number is consumed only if the record is stored; any
    /// failure before that leaves the series counter where it was.
    pub fn issue(
        &self,
        request: &IssueRequest,
        context: &AuditContext,
    ) -> Result<InvoiceRecord, IssueError> {
        match self.try_issue(request, context) {
            Ok(record) => {
                info!(number = %record.number, digest = %record.digest, "invoice issued");
                self.audit.record(
                    AuditEntry::new(AuditAction::Create, ENTITY_KIND, context)
                        .entity_id(&record.number)
                        .after(json!({
                            "number": record.number,
                            "total": record.totals.total(),
                        })),
                );
                Ok(record)
            }
            Err(e) => {
                warn!(customer_id = request.customer_id, error = %e, "invoice issuance failed");
                self.audit.record(
                    AuditEntry::new(AuditAction::Create, ENTITY_KIND, context)
                        .after(json!({ "customer_id": request.customer_id }))
                        .failed(e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn try_issue(
        &self,
        request: &IssueRequest,
        audit: &AuditContext,
    ) -> Result<InvoiceRecord, IssueError> {
        let config = self.context.config();
        LineItem::validate_all(&request.items, config.default_tax_rate())?;

        let customer = self
            .store
            .customer(request.customer_id)?
            .ok_or(IssueError::CustomerNotFound {
                id: request.customer_id,
            })?;
        if !customer.active {
            return Err(IssueError::CustomerInactive { id: customer.id });
        }
        let fields = self.context.cipher().decrypt_group(&customer.encrypted)?;
        let identity = CustomerIdentity {
            identification_type: customer.identification_type,
            identification: customer.identification.clone(),
            legal_name: customer.legal_name.clone(),
        };

        let series = request.series.as_ref().unwrap_or(config.series());
        let issued_at = Utc::now();
        SequentialNumberer::new(self.store).with_next_number(series, |number| {
            self.sign_and_store(request, audit, number, issued_at, &identity, &fields)
        })
    }

    fn sign_and_store(
        &self,
        request: &IssueRequest,
        audit: &AuditContext,
        number: &InvoiceNumber,
        issued_at: DateTime<Utc>,
        identity: &CustomerIdentity,
        fields: &CustomerFields,
    ) -> Result<InvoiceRecord, IssueError> {
        let config = self.context.config();
        let issuer = config.issuer();
        let access_key = compute_access_key(
            issued_at.date_naive(),
            DocumentType::Invoice,
            issuer.tax_id(),
            config.environment(),
            number,
            config.emission_type(),
        )?;

        let mut meta = InvoiceMeta::new(
            number.clone(),
            access_key,
            issued_at,
            issuer.clone(),
            identity.clone(),
        )
        .with_environment(config.environment());
        meta.emission_type = config.emission_type();
        meta.currency = config.currency().to_string();

        let signed = DocumentSigner::new(self.context.keys())
            .with_default_tax_rate(config.default_tax_rate())
            .issue(&meta, fields, &request.items)?;

        let authorization = self.authority.authorize(&AuthorizationRequest {
            access_key: &meta.access_key,
            number,
            issuer_tax_id: issuer.tax_id(),
            environment: config.environment(),
            emission_type: config.emission_type(),
            digest: signed.digest(),
        })?;

        let qr_payload = QrPayload::for_document(
            config.verify_base_url(),
            number,
            issued_at,
            signed.totals().total(),
            signed.digest(),
        )?;

        let record = InvoiceRecord {
            number: number.clone(),
            access_key: meta.access_key.clone(),
            digest: signed.digest().to_string(),
            signature: signed.signature().to_string(),
            signed_body: signed.signed_body().to_string(),
            canonical_body: signed.canonical_body().to_string(),
            issued_at,
            totals: *signed.totals(),
            customer_id: request.customer_id,
            customer_display_name: identity.display_name(fields),
            customer_identification: identity.identification.clone(),
            authorization_status: authorization.status,
            authorization_number: authorization.number,
            authorized_at: authorization.authorized_at,
            qr_payload,
            notes: request
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|notes| !notes.is_empty())
                .map(str::to_string),
            issued_by: audit.actor_id,
            line_items: signed.into_line_items(),
        };
        self.store.insert_invoice(&record)?;
        Ok(record)
    }
}
