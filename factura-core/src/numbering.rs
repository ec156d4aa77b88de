//! Sequential invoice numbering per establishment and point of sale.
use crate::store::{SequenceStore, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest sequence representable in the nine-digit field.
pub const MAX_SEQUENCE: u64 = 999_999_999;

#[derive(Debug, Error)]
pub enum NumberingError {
    #[error("invalid {segment} code '{value}': expected 3 digits")]
    InvalidSeriesCode {
        segment: &'static str,
        value: String,
    },
    #[error("invalid invoice number '{input}'")]
    InvalidFormat { input: String },
    #[error("sequence {value} is out of range 1..=999999999")]
    OutOfRange { value: u64 },
    #[error("invoice sequence exhausted for this series")]
    Exhausted,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Establishment and point-of-sale pair that owns an independent sequence.
///
/// # Examples
/// ```rust
/// use factura_core::numbering::Series;
///
/// let series = Series::new("002", "010")?;
/// assert_eq!(series.to_string(), "002-010");
/// # Ok::<(), factura_core::numbering::NumberingError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Series {
    establishment: String,
    point_of_sale: String,
}

impl Series {
    pub fn new(
        establishment: impl Into<String>,
        point_of_sale: impl Into<String>,
    ) -> Result<Self, NumberingError> {
        let establishment = establishment.into().trim().to_string();
        let point_of_sale = point_of_sale.into().trim().to_string();
        check_series_code("establishment", &establishment)?;
        check_series_code("point of sale", &point_of_sale)?;
        Ok(Self {
            establishment,
            point_of_sale,
        })
    }

    pub fn establishment(&self) -> &str {
        &self.establishment
    }

    pub fn point_of_sale(&self) -> &str {
        &self.point_of_sale
    }

    /// Six-digit `EEEPPP` form used inside access keys.
    pub fn compact(&self) -> String {
        format!("{}{}", self.establishment, self.point_of_sale)
    }
}

impl Default for Series {
    fn default() -> Self {
        Series {
            establishment: "001".into(),
            point_of_sale: "001".into(),
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.establishment, self.point_of_sale)
    }
}

fn check_series_code(segment: &'static str, value: &str) -> Result<(), NumberingError> {
    if value.len() != 3 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NumberingError::InvalidSeriesCode {
            segment,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Human-facing invoice number `EEE-PPP-SSSSSSSSS`.
///
/// # Examples
/// ```rust
/// use factura_core::numbering::{InvoiceNumber, Series};
///
/// let number = InvoiceNumber::new(Series::default(), 42)?;
/// assert_eq!(number.to_string(), "001-001-000000042");
/// assert_eq!("001-001-000000042".parse::<InvoiceNumber>()?, number);
/// # Ok::<(), factura_core::numbering::NumberingError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvoiceNumber {
    series: Series,
    sequence: u64,
}

impl InvoiceNumber {
    pub fn new(series: Series, sequence: u64) -> Result<Self, NumberingError> {
        if sequence == 0 || sequence > MAX_SEQUENCE {
            return Err(NumberingError::OutOfRange { value: sequence });
        }
        Ok(Self { series, sequence })
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Zero-padded nine-digit sequence segment.
    pub fn serial(&self) -> String {
        format!("{:09}", self.sequence)
    }
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:09}", self.series, self.sequence)
    }
}

impl FromStr for InvoiceNumber {
    type Err = NumberingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NumberingError::InvalidFormat {
            input: s.to_string(),
        };
        let mut parts = s.trim().split('-');
        let (Some(est), Some(pos), Some(seq), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if seq.len() != 9 || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let series = Series::new(est, pos).map_err(|_| invalid())?;
        let sequence = seq.parse::<u64>().map_err(|_| invalid())?;
        InvoiceNumber::new(series, sequence)
    }
}

impl TryFrom<String> for InvoiceNumber {
    type Error = NumberingError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InvoiceNumber> for String {
    fn from(value: InvoiceNumber) -> Self {
        value.to_string()
    }
}

/// Hands out gap-free invoice numbers backed by a [`SequenceStore`].
pub struct SequentialNumberer<'a, S: SequenceStore> {
    store: &'a S,
}

impl<'a, S: SequenceStore> SequentialNumberer<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Reserve and commit the next number immediately.
    pub fn next_invoice_number(&self, series: &Series) -> Result<InvoiceNumber, NumberingError> {
        self.with_next_number(series, |number| Ok::<_, NumberingError>(number.clone()))
    }

    /// Run `f` with the next number for `series`.
    ///
    /// The store serializes callers per series and advances the counter only
    /// when `f` returns `Ok`, so a failed issuance never burns a number.
    pub fn with_next_number<T, E, F>(&self, series: &Series, f: F) -> Result<T, E>
    where
        F: FnOnce(&InvoiceNumber) -> Result<T, E>,
        E: From<NumberingError> + From<StoreError>,
    {
        self.store.with_next_sequence(series, |next| {
            if next > MAX_SEQUENCE {
                return Err(NumberingError::Exhausted.into());
            }
            let number = InvoiceNumber::new(series.clone(), next)?;
            tracing::debug!(number = %number, "reserved invoice number");
            f(&number)
        })
    }

    /// Number the next successful reservation would receive, without reserving it.
    pub fn peek_next(&self, series: &Series) -> Result<InvoiceNumber, NumberingError> {
        let last = self.store.last_sequence(series)?;
        let next = last + 1;
        if next > MAX_SEQUENCE {
            return Err(NumberingError::Exhausted);
        }
        InvoiceNumber::new(series.clone(), next)
    }
}
