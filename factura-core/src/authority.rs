//! Tax authority authorization.
//!
//! Submission to the live authority is not implemented. [`SimulatedAuthority`]
//! authorizes every document locally.
use crate::access_key::{compute_access_key, AccessKey, AccessKeyError, DocumentType};
use crate::config::{EmissionType, EnvironmentType};
use crate::numbering::InvoiceNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("authority unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    AccessKey(#[from] AccessKeyError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationStatus {
    Authorized,
    Rejected,
    Pending,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::Authorized => "AUTORIZADO",
            AuthorizationStatus::Rejected => "RECHAZADO",
            AuthorizationStatus::Pending => "PENDIENTE",
        }
    }
}

/// What the authority needs to authorize one signed document.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest<'a> {
    pub access_key: &'a AccessKey,
    pub number: &'a InvoiceNumber,
    pub issuer_tax_id: &'a str,
    pub environment: EnvironmentType,
    pub emission_type: EmissionType,
    pub digest: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub number: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub status: AuthorizationStatus,
}

pub trait AuthorizationAuthority {
    fn authorize(&self, request: &AuthorizationRequest<'_>) -> Result<Authorization, AuthorityError>;
}

/// Authorizes everything immediately.
///
/// The authorization number is a fresh access key for the authorization
/// date, over the same issuer, series and sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedAuthority;

impl AuthorizationAuthority for SimulatedAuthority {
    fn authorize(&self, request: &AuthorizationRequest<'_>) -> Result<Authorization, AuthorityError> {
        let authorized_at = Utc::now();
        let number = compute_access_key(
            authorized_at.date_naive(),
            DocumentType::Invoice,
            request.issuer_tax_id,
            request.environment,
            request.number,
            request.emission_type,
        )?;
        debug!(access_key = %request.access_key, "simulated authorization granted");
        Ok(Authorization {
            number: Some(number.to_string()),
            authorized_at: Some(authorized_at),
            status: AuthorizationStatus::Authorized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_key::compute_access_key_with_code;
    use chrono::NaiveDate;

    #[test]
    fn simulated_authority_always_authorizes() {
        let number: InvoiceNumber = "002-003-000000042".parse().expect("number");
        let access_key = compute_access_key_with_code(
            NaiveDate::from_ymd_opt(2025, 2, 1).expect("date"),
            DocumentType::Invoice,
            "1790012345001",
            EnvironmentType::Production,
            &number,
            "87654321",
            EmissionType::Normal,
        )
        .expect("key");

        let auth = SimulatedAuthority
            .authorize(&AuthorizationRequest {
                access_key: &access_key,
                number: &number,
                issuer_tax_id: "1790012345001",
                environment: EnvironmentType::Production,
                emission_type: EmissionType::Normal,
                digest: "00",
            })
            .expect("authorize");

        assert_eq!(auth.status, AuthorizationStatus::Authorized);
        let issued = AccessKey::parse(auth.number.as_deref().expect("number")).expect("valid key");
        assert_eq!(issued.tax_id(), "1790012345001");
        assert_eq!(issued.serial(), access_key.serial());
        assert_eq!(
            issued.issue_date().expect("date"),
            auth.authorized_at.expect("time").date_naive()
        );
    }

    #[test]
    fn status_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&AuthorizationStatus::Pending).expect("json"),
            "\"PENDING\""
        );
        assert_eq!(AuthorizationStatus::Authorized.as_str(), "AUTORIZADO");
    }
}
