//! Configuration and environment selection.
use crate::numbering::Series;
use factura_derive::Validate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_VERIFY_BASE_URL: &str = "http://localhost:5173";
pub const DEFAULT_CURRENCY: &str = "DOLAR";

/// Tax authority environment the documents are issued against.
///
/// The environment is embedded as a single digit in every access key:
/// `1` for the testing environment, `2` for production.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use factura_core::config::EnvironmentType;
///
/// let env = EnvironmentType::from_str("pruebas")?;
/// assert_eq!(env, EnvironmentType::Testing);
/// assert_eq!(env.access_key_digit(), '1');
/// # Ok::<(), factura_core::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentType {
    Testing,
    Production,
}

/// Error returned when parsing an [`EnvironmentType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment type: {input}")]
    Invalid { input: String },
}

impl FromStr for EnvironmentType {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<EnvironmentType, EnvironmentParseError> {
        match env.trim().to_ascii_lowercase().as_str() {
            "testing" | "pruebas" | "1" => Ok(EnvironmentType::Testing),
            "production" | "produccion" | "2" => Ok(EnvironmentType::Production),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Testing => "testing",
            EnvironmentType::Production => "production",
        }
    }

    pub fn access_key_digit(&self) -> char {
        match self {
            EnvironmentType::Testing => '1',
            EnvironmentType::Production => '2',
        }
    }

    pub fn from_access_key_digit(digit: char) -> Option<Self> {
        match digit {
            '1' => Some(EnvironmentType::Testing),
            '2' => Some(EnvironmentType::Production),
            _ => None,
        }
    }
}

/// Emission mode recorded in the access key. Only normal emission is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmissionType {
    #[default]
    Normal,
}

impl EmissionType {
    pub fn access_key_digit(&self) -> char {
        match self {
            EmissionType::Normal => '1',
        }
    }

    pub fn from_access_key_digit(digit: char) -> Option<Self> {
        match digit {
            '1' => Some(EmissionType::Normal),
            _ => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Environment(#[from] EnvironmentParseError),

    #[error("master key is not configured (set FACTURA_MASTER_KEY)")]
    MissingMasterKey,

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl From<String> for ConfigError {
    fn from(message: String) -> Self {
        ConfigError::Validation { message }
    }
}

/// The issuing company, as printed on every document.
///
/// # Examples
/// ```rust
/// use factura_core::config::IssuerProfile;
///
/// let issuer = IssuerProfile::new(
///     "1790012345001".into(),
///     "Comercial Andina S.A.".into(),
///     "Andina".into(),
///     "Av. Amazonas N34-120, Quito".into(),
/// )?;
/// assert_eq!(issuer.tax_id(), "1790012345001");
/// # Ok::<(), factura_core::ConfigError>(())
/// ```
#[derive(Validate, Debug, Clone, PartialEq, Eq, Serialize)]
#[validate_error(ConfigError)]
#[validate(non_empty)]
pub struct IssuerProfile {
    #[validate(tax_id)]
    tax_id: String,
    legal_name: String,
    trade_name: String,
    head_office_address: String,
}

impl IssuerProfile {
    pub fn tax_id(&self) -> &str {
        &self.tax_id
    }

    pub fn legal_name(&self) -> &str {
        &self.legal_name
    }

    pub fn trade_name(&self) -> &str {
        &self.trade_name
    }

    pub fn head_office_address(&self) -> &str {
        &self.head_office_address
    }
}

impl Default for IssuerProfile {
    fn default() -> Self {
        IssuerProfile {
            tax_id: "1234567890001".into(),
            legal_name: "Mi Empresa S.A.".into(),
            trade_name: "Mi Empresa".into(),
            head_office_address: "Av. Principal 123, Quito".into(),
        }
    }
}

/// Engine configuration.
///
/// # Examples
/// ```rust
/// use factura_core::config::{Config, EnvironmentType, IssuerProfile};
///
/// let config = Config::new(EnvironmentType::Testing, IssuerProfile::default())
///     .with_master_key("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=");
/// assert_eq!(config.series().to_string(), "001-001");
/// # let _ = config;
/// ```
#[derive(Clone)]
pub struct Config {
    environment: EnvironmentType,
    emission_type: EmissionType,
    issuer: IssuerProfile,
    series: Series,
    default_tax_rate: Decimal,
    currency: String,
    verify_base_url: String,
    master_key: Option<String>,
}

impl Config {
    pub fn new(environment: EnvironmentType, issuer: IssuerProfile) -> Self {
        Self {
            environment,
            issuer,
            ..Self::default()
        }
    }

    /// Build a configuration from `FACTURA_*` environment variables.
    ///
    /// Unset variables fall back to [`Config::default`], except the master key.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingMasterKey`] when `FACTURA_MASTER_KEY` is unset,
    /// or a parse/validation error for malformed values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let issuer_defaults = IssuerProfile::default();
        let value = |key: &str, fallback: &str| lookup(key).unwrap_or_else(|| fallback.to_string());

        let environment = match lookup("FACTURA_ENVIRONMENT") {
            Some(raw) => EnvironmentType::from_str(&raw)?,
            None => defaults.environment,
        };

        let tax_id = value("FACTURA_ISSUER_TAX_ID", issuer_defaults.tax_id());
        if tax_id.len() != 13 {
            return Err(ConfigError::InvalidValue {
                key: "FACTURA_ISSUER_TAX_ID",
                message: format!("expected 13 digits, got {}", tax_id.len()),
            });
        }
        let issuer = IssuerProfile::new(
            tax_id,
            value("FACTURA_ISSUER_LEGAL_NAME", issuer_defaults.legal_name()),
            value("FACTURA_ISSUER_TRADE_NAME", issuer_defaults.trade_name()),
            value("FACTURA_ISSUER_ADDRESS", issuer_defaults.head_office_address()),
        )?;

        let series = Series::new(
            value("FACTURA_ESTABLISHMENT", defaults.series.establishment()),
            value("FACTURA_POINT_OF_SALE", defaults.series.point_of_sale()),
        )
        .map_err(|e| ConfigError::InvalidValue {
            key: "series",
            message: e.to_string(),
        })?;

        let master_key = lookup("FACTURA_MASTER_KEY").ok_or(ConfigError::MissingMasterKey)?;

        Ok(Self {
            environment,
            issuer,
            series,
            verify_base_url: value("FACTURA_VERIFY_BASE_URL", &defaults.verify_base_url),
            master_key: Some(master_key),
            ..defaults
        })
    }

    pub fn with_series(mut self, series: Series) -> Self {
        self.series = series;
        self
    }

    pub fn with_master_key(mut self, master_key_b64: impl Into<String>) -> Self {
        self.master_key = Some(master_key_b64.into());
        self
    }

    pub fn with_verify_base_url(mut self, url: impl Into<String>) -> Self {
        self.verify_base_url = url.into();
        self
    }

    pub fn with_default_tax_rate(mut self, rate: Decimal) -> Self {
        self.default_tax_rate = rate;
        self
    }

    pub fn environment(&self) -> EnvironmentType {
        self.environment
    }

    pub fn emission_type(&self) -> EmissionType {
        self.emission_type
    }

    pub fn issuer(&self) -> &IssuerProfile {
        &self.issuer
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    pub fn default_tax_rate(&self) -> Decimal {
        self.default_tax_rate
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn verify_base_url(&self) -> &str {
        &self.verify_base_url
    }

    /// Base64 master key, if configured.
    pub fn master_key(&self) -> Option<&str> {
        self.master_key.as_deref()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("emission_type", &self.emission_type)
            .field("issuer", &self.issuer)
            .field("series", &self.series)
            .field("default_tax_rate", &self.default_tax_rate)
            .field("currency", &self.currency)
            .field("verify_base_url", &self.verify_base_url)
            .field("master_key", &self.master_key.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            environment: EnvironmentType::Testing,
            emission_type: EmissionType::Normal,
            issuer: IssuerProfile::default(),
            series: Series::default(),
            default_tax_rate: Decimal::from(15),
            currency: DEFAULT_CURRENCY.to_string(),
            verify_base_url: DEFAULT_VERIFY_BASE_URL.to_string(),
            master_key: None,
        }
    }
}
