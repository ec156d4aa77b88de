//! Public verification of issued invoices by digest.
//!
//! Anyone holding a digest (typically from the QR code) may verify. The
//! result never exposes the customer's address, phone or email.
use crate::authority::AuthorizationStatus;
use crate::context::EngineContext;
use crate::invoice::digest_hex;
use crate::invoice::sign::{verify_signature, verify_signed_body, SignedBodyCheck};
use crate::issuance::InvoiceRecord;
use crate::numbering::InvoiceNumber;
use crate::store::{InvoiceStore, StoreError};
use chrono::{DateTime, Utc};
use rsa::RsaPublicKey;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Redacted view of a verified invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationSummary {
    pub invoice_number: InvoiceNumber,
    pub issued_at: DateTime<Utc>,
    pub customer_display_name: String,
    pub customer_identification: String,
    pub total: Decimal,
    pub authorization_status: AuthorizationStatus,
    pub authorization_number: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
}

impl From<&InvoiceRecord> for VerificationSummary {
    fn from(record: &InvoiceRecord) -> Self {
        Self {
            invoice_number: record.number.clone(),
            issued_at: record.issued_at,
            customer_display_name: record.customer_display_name.clone(),
            customer_identification: record.customer_identification.clone(),
            total: record.totals.total(),
            authorization_status: record.authorization_status,
            authorization_number: record.authorization_number.clone(),
            authorized_at: record.authorized_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    NotFound,
    Tampered,
    Valid(VerificationSummary),
}

impl VerificationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationResult::NotFound => "NOT_FOUND",
            VerificationResult::Tampered => "TAMPERED",
            VerificationResult::Valid(_) => "VALID",
        }
    }

    pub fn summary(&self) -> Option<&VerificationSummary> {
        match self {
            VerificationResult::Valid(summary) => Some(summary),
            _ => None,
        }
    }
}

fn normalize_digest(input: &str) -> Option<String> {
    let digest = input.trim().to_ascii_lowercase();
    (digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit())).then_some(digest)
}

/// Read-only verification over an [`InvoiceStore`].
pub struct VerificationService<'a, S: InvoiceStore> {
    store: &'a S,
    public_key: &'a RsaPublicKey,
}

impl<'a, S: InvoiceStore> VerificationService<'a, S> {
    pub fn new(store: &'a S, public_key: &'a RsaPublicKey) -> Self {
        Self { store, public_key }
    }

    pub fn from_context(context: &'a EngineContext, store: &'a S) -> Self {
        Self::new(store, context.keys().public_key())
    }

    /// Look up `digest` and check the stored invoice against it.
    ///
    /// A stored invoice is `Tampered` when its canonical body no longer
    /// hashes to the digest, its signature does not verify, or its signed
    /// body fails the standalone check.
    pub fn verify(&self, digest: &str) -> Result<VerificationResult, VerificationError> {
        let Some(digest) = normalize_digest(digest) else {
            debug!("verification input is not a digest");
            return Ok(VerificationResult::NotFound);
        };
        let Some(record) = self.store.invoice_by_digest(&digest)? else {
            return Ok(VerificationResult::NotFound);
        };

        if digest_hex(&record.canonical_body) != record.digest {
            warn!(number = %record.number, "stored body does not match its digest");
            return Ok(VerificationResult::Tampered);
        }
        if !verify_signature(self.public_key, &record.digest, &record.signature) {
            warn!(number = %record.number, "stored signature does not verify");
            return Ok(VerificationResult::Tampered);
        }
        if verify_signed_body(self.public_key, &record.signed_body) != SignedBodyCheck::Valid {
            warn!(number = %record.number, "stored signed body does not verify");
            return Ok(VerificationResult::Tampered);
        }

        Ok(VerificationResult::Valid(VerificationSummary::from(&record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_normalization() {
        let upper = "AB".repeat(32);
        assert_eq!(normalize_digest(&format!(" {upper}\n")), Some("ab".repeat(32)));
        assert_eq!(normalize_digest("abc"), None);
        assert_eq!(normalize_digest(&"zz".repeat(32)), None);
        assert_eq!(normalize_digest(""), None);
    }

    #[test]
    fn labels() {
        assert_eq!(VerificationResult::NotFound.as_str(), "NOT_FOUND");
        assert_eq!(VerificationResult::Tampered.as_str(), "TAMPERED");
        assert!(VerificationResult::Tampered.summary().is_none());
    }
}
