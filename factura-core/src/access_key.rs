//! 49-digit access keys with a mod-11 check digit.
//!
//! Layout, left to right:
//!
//! | digits | segment                                    |
//! |--------|--------------------------------------------|
//! | 8      | issue date, `ddmmyyyy`                     |
//! | 2      | document type code                         |
//! | 13     | issuer tax id                              |
//! | 1      | environment                                |
//! | 15     | series (`EEEPPP`) and 9-digit sequence     |
//! | 8      | random numeric code                        |
//! | 1      | emission type                              |
//! | 1      | check digit                                |
use crate::config::{EmissionType, EnvironmentType};
use crate::numbering::{InvoiceNumber, Series};
use chrono::NaiveDate;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const ACCESS_KEY_LEN: usize = 49;
pub const BODY_LEN: usize = ACCESS_KEY_LEN - 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessKeyError {
    #[error("access key must be {ACCESS_KEY_LEN} digits, got {len}")]
    InvalidLength { len: usize },
    #[error("non-digit character at position {position}")]
    NonDigit { position: usize },
    #[error("check digit body is empty")]
    EmptyBody,
    #[error("check digit mismatch: expected {expected}, found {found}")]
    CheckDigitMismatch { expected: u8, found: u8 },
    #[error("tax id must be 13 digits: '{value}'")]
    InvalidTaxId { value: String },
    #[error("random code must be 8 digits: '{value}'")]
    InvalidRandomCode { value: String },
    #[error("unknown document type code '{code}'")]
    UnknownDocumentType { code: String },
    #[error("invalid {segment} segment '{value}'")]
    InvalidSegment {
        segment: &'static str,
        value: String,
    },
}

/// Receipt type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    Invoice,
    CreditNote,
    DebitNote,
    RemissionGuide,
    Withholding,
}

impl DocumentType {
    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "01",
            DocumentType::CreditNote => "04",
            DocumentType::DebitNote => "05",
            DocumentType::RemissionGuide => "06",
            DocumentType::Withholding => "07",
        }
    }
}

impl FromStr for DocumentType {
    type Err = AccessKeyError;
    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code {
            "01" => Ok(DocumentType::Invoice),
            "04" => Ok(DocumentType::CreditNote),
            "05" => Ok(DocumentType::DebitNote),
            "06" => Ok(DocumentType::RemissionGuide),
            "07" => Ok(DocumentType::Withholding),
            _ => Err(AccessKeyError::UnknownDocumentType {
                code: code.to_string(),
            }),
        }
    }
}

/// Mod-11 check digit over a string of ASCII digits.
///
/// Digits are weighted 2,3,4,5,6,7,2,3,… starting from the rightmost one.
/// `11 - (sum % 11)` is the result, except that 11 maps to 0 and 10 maps to 1.
///
/// # Examples
/// ```rust
/// use factura_core::access_key::check_digit;
///
/// assert_eq!(check_digit("6")?, 1);
/// assert_eq!(check_digit("14")?, 0);
/// # Ok::<(), factura_core::access_key::AccessKeyError>(())
/// ```
pub fn check_digit(body: &str) -> Result<u8, AccessKeyError> {
    if body.is_empty() {
        return Err(AccessKeyError::EmptyBody);
    }
    if let Some(position) = body.bytes().position(|b| !b.is_ascii_digit()) {
        return Err(AccessKeyError::NonDigit { position });
    }
    Ok(mod11_digit(body.bytes().rev().map(|b| b - b'0')))
}

/// Mod-11 digit over digits given right to left. The running sum stays
/// reduced, so any body length is safe.
fn mod11_digit(digits_from_right: impl Iterator<Item = u8>) -> u8 {
    let mut sum: u32 = 0;
    let mut weight: u32 = 2;
    for digit in digits_from_right {
        sum = (sum + u32::from(digit) * weight) % 11;
        weight = if weight == 7 { 2 } else { weight + 1 };
    }
    match 11 - sum {
        11 => 0,
        10 => 1,
        digit => digit as u8,
    }
}

/// Build an access key with a freshly drawn 8-digit random code.
pub fn compute_access_key(
    issue_date: NaiveDate,
    document_type: DocumentType,
    tax_id: &str,
    environment: EnvironmentType,
    serial: &InvoiceNumber,
    emission_type: EmissionType,
) -> Result<AccessKey, AccessKeyError> {
    let random_code = format!("{:08}", OsRng.gen_range(0..100_000_000u32));
    compute_access_key_with_code(
        issue_date,
        document_type,
        tax_id,
        environment,
        serial,
        &random_code,
        emission_type,
    )
}

/// Deterministic variant of [`compute_access_key`] with a caller-supplied random code.
pub fn compute_access_key_with_code(
    issue_date: NaiveDate,
    document_type: DocumentType,
    tax_id: &str,
    environment: EnvironmentType,
    serial: &InvoiceNumber,
    random_code: &str,
    emission_type: EmissionType,
) -> Result<AccessKey, AccessKeyError> {
    if tax_id.len() != 13 || !is_digits(tax_id) {
        return Err(AccessKeyError::InvalidTaxId {
            value: tax_id.to_string(),
        });
    }
    if random_code.len() != 8 || !is_digits(random_code) {
        return Err(AccessKeyError::InvalidRandomCode {
            value: random_code.to_string(),
        });
    }

    let mut body = String::with_capacity(ACCESS_KEY_LEN);
    body.push_str(&issue_date.format("%d%m%Y").to_string());
    body.push_str(document_type.code());
    body.push_str(tax_id);
    body.push(environment.access_key_digit());
    body.push_str(&serial.series().compact());
    body.push_str(&serial.serial());
    body.push_str(random_code);
    body.push(emission_type.access_key_digit());
    if body.len() != BODY_LEN {
        return Err(AccessKeyError::InvalidLength {
            len: body.len() + 1,
        });
    }

    let digit = check_digit(&body)?;
    body.push(char::from(b'0' + digit));
    Ok(AccessKey(body))
}

fn is_digits(value: &str) -> bool {
    value.bytes().all(|b| b.is_ascii_digit())
}

/// A validated 49-digit access key.
///
/// # Examples
/// ```rust
/// use factura_core::access_key::{AccessKey, DocumentType};
///
/// let key = AccessKey::parse("1503202401179001234500110020030000000011234567815")?;
/// assert_eq!(key.document_type()?, DocumentType::Invoice);
/// assert_eq!(key.tax_id(), "1790012345001");
/// assert_eq!(key.check_digit(), 5);
/// # Ok::<(), factura_core::access_key::AccessKeyError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

impl AccessKey {
    /// Parse and verify length, digits and check digit.
    pub fn parse(input: &str) -> Result<Self, AccessKeyError> {
        let input = input.trim();
        if input.len() != ACCESS_KEY_LEN {
            return Err(AccessKeyError::InvalidLength { len: input.len() });
        }
        if let Some(position) = input.bytes().position(|b| !b.is_ascii_digit()) {
            return Err(AccessKeyError::NonDigit { position });
        }
        let expected = check_digit(&input[..BODY_LEN])?;
        let found = input.as_bytes()[BODY_LEN] - b'0';
        if expected != found {
            return Err(AccessKeyError::CheckDigitMismatch { expected, found });
        }
        Ok(AccessKey(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn body(&self) -> &str {
        &self.0[..BODY_LEN]
    }

    pub fn issue_date(&self) -> Result<NaiveDate, AccessKeyError> {
        let raw = &self.0[0..8];
        NaiveDate::parse_from_str(raw, "%d%m%Y").map_err(|_| AccessKeyError::InvalidSegment {
            segment: "issue date",
            value: raw.to_string(),
        })
    }

    pub fn document_type(&self) -> Result<DocumentType, AccessKeyError> {
        self.0[8..10].parse()
    }

    pub fn tax_id(&self) -> &str {
        &self.0[10..23]
    }

    pub fn environment(&self) -> Result<EnvironmentType, AccessKeyError> {
        let digit = char::from(self.0.as_bytes()[23]);
        EnvironmentType::from_access_key_digit(digit).ok_or_else(|| {
            AccessKeyError::InvalidSegment {
                segment: "environment",
                value: digit.to_string(),
            }
        })
    }

    pub fn series(&self) -> Result<Series, AccessKeyError> {
        Series::new(&self.0[24..27], &self.0[27..30]).map_err(|_| AccessKeyError::InvalidSegment {
            segment: "series",
            value: self.0[24..30].to_string(),
        })
    }

    /// Nine-digit sequence segment.
    pub fn serial(&self) -> &str {
        &self.0[30..39]
    }

    pub fn random_code(&self) -> &str {
        &self.0[39..47]
    }

    pub fn emission_type(&self) -> Result<EmissionType, AccessKeyError> {
        let digit = char::from(self.0.as_bytes()[47]);
        EmissionType::from_access_key_digit(digit).ok_or_else(|| {
            AccessKeyError::InvalidSegment {
                segment: "emission type",
                value: digit.to_string(),
            }
        })
    }

    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[BODY_LEN] - b'0'
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for AccessKey {
    type Err = AccessKeyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccessKey::parse(s)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = AccessKeyError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccessKey::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(value: AccessKey) -> Self {
        value.0
    }
}
