//! Invoice line items, totals, canonical documents and signing.
pub mod canonical;
mod qr;
pub mod sign;

pub use qr::{QrCodeError, QrPayload, QrRenderer, QrResult};

use crate::access_key::AccessKey;
use crate::cipher::CustomerFields;
use crate::config::{EmissionType, EnvironmentType, IssuerProfile, DEFAULT_CURRENCY};
use crate::customer::IdentificationType;
use crate::keys::KeyMaterial;
use crate::numbering::InvoiceNumber;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sign::SigningError;
use thiserror::Error;
use tracing::debug;

type Result<T> = std::result::Result<T, DocumentError>;

/// Document construction errors.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to render canonical document: {0}")]
    Render(String),
    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// Structured validation error with field-level issues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invoice validation failed")]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }
}

/// Single validation issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: InvoiceField,
    pub kind: ValidationKind,
    pub line_item_index: Option<usize>,
}

#[non_exhaustive]
/// Field associated with a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceField {
    LineItems,
    LineItemCode,
    LineItemDescription,
    LineItemQuantity,
    LineItemUnitPrice,
    LineItemTaxRate,
}

#[non_exhaustive]
/// Classification of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Missing,
    Empty,
    InvalidFormat,
    OutOfRange,
}

/// A line as supplied by the caller, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub code: Option<String>,
    pub description: String,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub tax_rate: Option<Decimal>,
}

impl LineItemInput {
    pub fn new(description: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            code: None,
            description: description.into(),
            quantity: Some(quantity),
            unit_price: Some(unit_price),
            tax_rate: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_tax_rate(mut self, rate: Decimal) -> Self {
        self.tax_rate = Some(rate);
        self
    }
}

/// A validated line with its computed, unrounded amounts.
///
/// # Examples
/// ```rust
/// use factura_core::invoice::{LineItem, LineItemInput};
/// use rust_decimal::Decimal;
///
/// let input = LineItemInput::new("Widget", Decimal::from(2), Decimal::new(1250, 2));
/// let items = LineItem::validate_all(&[input], Decimal::from(12))?;
/// assert_eq!(items[0].subtotal(), Decimal::new(2500, 2));
/// assert_eq!(items[0].tax(), Decimal::new(300, 2));
/// # Ok::<(), factura_core::invoice::ValidationError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    code: String,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    tax_rate: Decimal,
    subtotal: Decimal,
    tax: Decimal,
}

impl LineItem {
    /// Validate every input line, collecting all issues before failing.
    ///
    /// Lines without a tax rate take `default_tax_rate`; lines without a code
    /// get `PROD001`, `PROD002`, … by position.
    pub fn validate_all(
        inputs: &[LineItemInput],
        default_tax_rate: Decimal,
    ) -> std::result::Result<Vec<LineItem>, ValidationError> {
        let mut issues = Vec::new();
        if inputs.is_empty() {
            issues.push(ValidationIssue {
                field: InvoiceField::LineItems,
                kind: ValidationKind::Missing,
                line_item_index: None,
            });
            return Err(ValidationError::new(issues));
        }

        let mut items = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let mut issue = |field, kind| {
                issues.push(ValidationIssue {
                    field,
                    kind,
                    line_item_index: Some(index),
                })
            };

            let description = input.description.trim();
            if description.is_empty() {
                issue(InvoiceField::LineItemDescription, ValidationKind::Empty);
            }
            let code = match input.code.as_deref().map(str::trim) {
                Some("") => {
                    issue(InvoiceField::LineItemCode, ValidationKind::Empty);
                    String::new()
                }
                Some(code) => code.to_string(),
                None => format!("PROD{:03}", index + 1),
            };

            let quantity = match input.quantity {
                None => {
                    issue(InvoiceField::LineItemQuantity, ValidationKind::Missing);
                    None
                }
                Some(q) if q <= Decimal::ZERO => {
                    issue(InvoiceField::LineItemQuantity, ValidationKind::OutOfRange);
                    None
                }
                Some(q) => Some(q),
            };
            let unit_price = match input.unit_price {
                None => {
                    issue(InvoiceField::LineItemUnitPrice, ValidationKind::Missing);
                    None
                }
                Some(p) if p < Decimal::ZERO => {
                    issue(InvoiceField::LineItemUnitPrice, ValidationKind::OutOfRange);
                    None
                }
                Some(p) => Some(p),
            };
            let tax_rate = input.tax_rate.unwrap_or(default_tax_rate);
            if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE_HUNDRED {
                issue(InvoiceField::LineItemTaxRate, ValidationKind::OutOfRange);
            }

            if let (Some(quantity), Some(unit_price)) = (quantity, unit_price) {
                let subtotal = quantity * unit_price;
                let tax = subtotal * tax_rate / Decimal::ONE_HUNDRED;
                items.push(LineItem {
                    code,
                    description: description.to_string(),
                    quantity,
                    unit_price,
                    tax_rate,
                    subtotal,
                    tax,
                });
            }
        }

        if !issues.is_empty() {
            return Err(ValidationError::new(issues));
        }
        Ok(items)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    pub fn tax(&self) -> Decimal {
        self.tax
    }
}

/// Round to cents, halves away from zero.
pub fn round_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Invoice totals, rounded to cents once, after summing unrounded lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    subtotal: Decimal,
    tax: Decimal,
    total: Decimal,
}

impl InvoiceTotals {
    pub fn from_items(items: &[LineItem]) -> Self {
        let subtotal: Decimal = items.iter().map(LineItem::subtotal).sum();
        let tax: Decimal = items.iter().map(LineItem::tax).sum();
        let subtotal = round_amount(subtotal);
        let tax = round_amount(tax);
        Self {
            subtotal,
            tax,
            total: subtotal + tax,
        }
    }

    pub fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    pub fn tax(&self) -> Decimal {
        self.tax
    }

    pub fn total(&self) -> Decimal {
        self.total
    }
}

/// Buyer identification as printed on the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerIdentity {
    pub identification_type: IdentificationType,
    pub identification: String,
    pub legal_name: Option<String>,
}

impl CustomerIdentity {
    /// Legal name when present, otherwise the decrypted personal name.
    pub fn display_name(&self, fields: &CustomerFields) -> String {
        match self.legal_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => fields.full_name(),
        }
    }
}

/// Everything about an invoice that is not a line item.
#[derive(Debug, Clone)]
pub struct InvoiceMeta {
    pub number: InvoiceNumber,
    pub access_key: AccessKey,
    pub issued_at: DateTime<Utc>,
    pub issuer: IssuerProfile,
    pub environment: EnvironmentType,
    pub emission_type: EmissionType,
    pub customer: CustomerIdentity,
    pub currency: String,
}

impl InvoiceMeta {
    pub fn new(
        number: InvoiceNumber,
        access_key: AccessKey,
        issued_at: DateTime<Utc>,
        issuer: IssuerProfile,
        customer: CustomerIdentity,
    ) -> Self {
        Self {
            number,
            access_key,
            issued_at,
            issuer,
            environment: EnvironmentType::Testing,
            emission_type: EmissionType::Normal,
            customer,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn with_environment(mut self, environment: EnvironmentType) -> Self {
        self.environment = environment;
        self
    }
}

/// Output of [`DocumentSigner::issue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    canonical_body: String,
    digest: String,
    signature: String,
    signed_body: String,
    totals: InvoiceTotals,
    line_items: Vec<LineItem>,
}

impl SignedDocument {
    pub fn canonical_body(&self) -> &str {
        &self.canonical_body
    }

    /// Lowercase hex SHA-256 of the canonical body.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Base64 RSA-PSS signature over the digest text.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Canonical body with the signature trailer embedded.
    pub fn signed_body(&self) -> &str {
        &self.signed_body
    }

    pub fn totals(&self) -> &InvoiceTotals {
        &self.totals
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn into_line_items(self) -> Vec<LineItem> {
        self.line_items
    }
}

/// Lowercase hex SHA-256 of `body`.
pub fn digest_hex(body: &str) -> String {
    format!("{:x}", Sha256::digest(body.as_bytes()))
}

/// Builds, digests and signs canonical invoice documents.
pub struct DocumentSigner<'a> {
    keys: &'a KeyMaterial,
    default_tax_rate: Decimal,
}

impl<'a> DocumentSigner<'a> {
    pub fn new(keys: &'a KeyMaterial) -> Self {
        Self {
            keys,
            default_tax_rate: Decimal::from(15),
        }
    }

    pub fn with_default_tax_rate(mut self, rate: Decimal) -> Self {
        self.default_tax_rate = rate;
        self
    }

    pub fn issue(
        &self,
        meta: &InvoiceMeta,
        customer: &CustomerFields,
        items: &[LineItemInput],
    ) -> Result<SignedDocument> {
        let line_items = LineItem::validate_all(items, self.default_tax_rate)?;
        let totals = InvoiceTotals::from_items(&line_items);
        let canonical_body = canonical::render(meta, customer, &line_items, &totals)?;
        let digest = digest_hex(&canonical_body);
        let signature = sign::sign_digest(self.keys.private_key(), &digest)?;
        let signed_body = sign::append_signature_trailer(&canonical_body, &signature, &digest)?;
        debug!(number = %meta.number, digest = %digest, "signed canonical document");
        Ok(SignedDocument {
            canonical_body,
            digest,
            signature,
            signed_body,
            totals,
            line_items,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::access_key::{compute_access_key_with_code, DocumentType};
    use crate::keys::test_key_material;
    use crate::numbering::Series;
    use chrono::TimeZone;

    pub(crate) fn sample_meta(sequence: u64) -> InvoiceMeta {
        let number = InvoiceNumber::new(Series::default(), sequence).expect("number");
        let issued_at = Utc.with_ymd_and_hms(2025, 3, 14, 10, 30, 0).unwrap();
        let access_key = compute_access_key_with_code(
            issued_at.date_naive(),
            DocumentType::Invoice,
            "1234567890001",
            EnvironmentType::Testing,
            &number,
            "12345678",
            EmissionType::Normal,
        )
        .expect("access key");
        InvoiceMeta::new(
            number,
            access_key,
            issued_at,
            IssuerProfile::default(),
            CustomerIdentity {
                identification_type: IdentificationType::NationalId,
                identification: "0912345678".into(),
                legal_name: None,
            },
        )
    }

    pub(crate) fn sample_fields() -> CustomerFields {
        CustomerFields {
            given_names: "Ana".into(),
            family_names: "Mora".into(),
            address: "Av. Quito 100".into(),
            phone: "0999999999".into(),
            email: "ana@example.ec".into(),
        }
    }

    fn dec(value: &str) -> Decimal {
        value.parse().expect("decimal")
    }

    #[test]
    fn totals_example() {
        let items = LineItem::validate_all(
            &[LineItemInput::new("A", dec("2"), dec("12.50")).with_tax_rate(dec("12"))],
            dec("15"),
        )
        .expect("valid");
        let totals = InvoiceTotals::from_items(&items);
        assert_eq!(totals.subtotal(), dec("25.00"));
        assert_eq!(totals.tax(), dec("3.00"));
        assert_eq!(totals.total(), dec("28.00"));
    }

    #[test]
    fn totals_across_mixed_rates() {
        let items = LineItem::validate_all(
            &[
                LineItemInput::new("A", dec("2"), dec("10.00")).with_tax_rate(dec("15")),
                LineItemInput::new("B", dec("1"), dec("5.00")).with_tax_rate(dec("0")),
            ],
            dec("15"),
        )
        .expect("valid");
        let totals = InvoiceTotals::from_items(&items);
        assert_eq!(totals.subtotal(), dec("25.00"));
        assert_eq!(totals.tax(), dec("3.00"));
        assert_eq!(totals.total(), dec("28.00"));
    }

    #[test]
    fn rounding_happens_once_on_totals() {
        // each line carries 0.00500001 tax; rounding per line would give 0.03
        let input = LineItemInput::new("x", dec("1"), dec("0.0333334")).with_tax_rate(dec("15"));
        let items =
            LineItem::validate_all(&[input.clone(), input.clone(), input], dec("15")).expect("valid");
        let totals = InvoiceTotals::from_items(&items);
        assert_eq!(totals.subtotal(), dec("0.10"));
        assert_eq!(totals.tax(), dec("0.02"));
        assert_eq!(totals.total(), dec("0.12"));
    }

    #[test]
    fn midpoint_rounds_away_from_zero() {
        assert_eq!(round_amount(dec("0.125")), dec("0.13"));
        assert_eq!(round_amount(dec("2.675")), dec("2.68"));
        assert_eq!(round_amount(dec("-0.125")), dec("-0.13"));
    }

    #[test]
    fn default_tax_rate_and_codes_apply() {
        let items = LineItem::validate_all(
            &[
                LineItemInput::new("a", dec("1"), dec("10")),
                LineItemInput::new("b", dec("1"), dec("10")).with_code("SKU-9"),
            ],
            dec("15"),
        )
        .expect("valid");
        assert_eq!(items[0].tax_rate(), dec("15"));
        assert_eq!(items[0].code(), "PROD001");
        assert_eq!(items[1].code(), "SKU-9");
    }

    #[test]
    fn validation_collects_every_issue() {
        let err = LineItem::validate_all(
            &[
                LineItemInput {
                    description: " ".into(),
                    quantity: Some(dec("0")),
                    unit_price: Some(dec("-1")),
                    ..Default::default()
                },
                LineItemInput {
                    description: "ok".into(),
                    quantity: None,
                    unit_price: Some(dec("1")),
                    tax_rate: Some(dec("101")),
                    ..Default::default()
                },
            ],
            dec("15"),
        )
        .expect_err("invalid");

        let expect = |field, kind, index| ValidationIssue {
            field,
            kind,
            line_item_index: Some(index),
        };
        assert_eq!(
            err.issues,
            vec![
                expect(InvoiceField::LineItemDescription, ValidationKind::Empty, 0),
                expect(InvoiceField::LineItemQuantity, ValidationKind::OutOfRange, 0),
                expect(InvoiceField::LineItemUnitPrice, ValidationKind::OutOfRange, 0),
                expect(InvoiceField::LineItemQuantity, ValidationKind::Missing, 1),
                expect(InvoiceField::LineItemTaxRate, ValidationKind::OutOfRange, 1),
            ]
        );
    }

    #[test]
    fn empty_item_list_is_missing() {
        let err = LineItem::validate_all(&[], dec("15")).expect_err("empty");
        assert_eq!(err.issues[0].field, InvoiceField::LineItems);
        assert_eq!(err.issues[0].kind, ValidationKind::Missing);
    }

    #[test]
    fn issue_is_deterministic_apart_from_signature() {
        let keys = test_key_material();
        let signer = DocumentSigner::new(&keys);
        let items = [LineItemInput::new("Servicio", dec("1"), dec("100"))];
        let a = signer
            .issue(&sample_meta(1), &sample_fields(), &items)
            .expect("issue");
        let b = signer
            .issue(&sample_meta(1), &sample_fields(), &items)
            .expect("issue");

        assert_eq!(a.canonical_body(), b.canonical_body());
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
        assert_eq!(a.digest(), digest_hex(a.canonical_body()));
        // PSS is randomized
        assert_ne!(a.signature(), b.signature());
        assert!(sign::verify_signature(keys.public_key(), a.digest(), b.signature()));
        assert_eq!(a.totals().total(), dec("115.00"));
    }

    #[test]
    fn display_name_prefers_legal_name() {
        let mut identity = sample_meta(1).customer;
        assert_eq!(identity.display_name(&sample_fields()), "Ana Mora");
        identity.legal_name = Some("Importadora Mora Cía. Ltda.".into());
        assert_eq!(
            identity.display_name(&sample_fields()),
            "Importadora Mora Cía. Ltda."
        );
    }
}
