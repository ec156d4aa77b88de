use crate::numbering::InvoiceNumber;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QrCodeError {
    #[error("document digest is missing")]
    MissingDigest,
    #[error("verification base URL is missing")]
    MissingBaseUrl,
    #[error("QR rendering failed: {0}")]
    Render(String),
}

pub type QrResult<T> = std::result::Result<T, QrCodeError>;

/// Text encoded into an invoice's QR code.
///
/// # Examples
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use factura_core::invoice::QrPayload;
/// use factura_core::numbering::InvoiceNumber;
/// use rust_decimal::Decimal;
///
/// let number: InvoiceNumber = "001-001-000000042".parse()?;
/// let issued_at = Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap();
/// let digest = "ab".repeat(32);
/// let qr = QrPayload::for_document(
///     "https://facturas.example.ec/",
///     &number,
///     issued_at,
///     Decimal::new(2800, 2),
///     &digest,
/// )?;
/// assert_eq!(qr.url(), format!("https://facturas.example.ec/verificar/{digest}"));
/// assert!(qr.caption().starts_with("Factura: 001-001-000000042\n"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    url: String,
    caption: String,
}

impl QrPayload {
    pub fn for_document(
        base_url: &str,
        number: &InvoiceNumber,
        issued_at: DateTime<Utc>,
        total: Decimal,
        digest: &str,
    ) -> QrResult<Self> {
        let digest = digest.trim();
        if digest.is_empty() {
            return Err(QrCodeError::MissingDigest);
        }
        let base = base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(QrCodeError::MissingBaseUrl);
        }

        let url = format!("{base}/verificar/{digest}");
        let caption = format!(
            "Factura: {number}\nFecha: {}\nTotal: ${:.2}\nVerificar: {url}",
            issued_at.format("%d/%m/%Y"),
            super::round_amount(total),
        );
        Ok(Self { url, caption })
    }

    /// Verification URL, the string encoded into the image.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Human-readable lines printed next to the image.
    pub fn caption(&self) -> &str {
        &self.caption
    }
}

/// Turns a payload string into image bytes.
pub trait QrRenderer {
    fn render(&self, payload: &str) -> QrResult<Vec<u8>>;

    fn render_payload(&self, payload: &QrPayload) -> QrResult<Vec<u8>> {
        self.render(payload.url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn number() -> InvoiceNumber {
        "002-003-000000001".parse().expect("number")
    }

    fn issued_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn caption_has_four_lines() {
        let qr = QrPayload::for_document(
            "http://localhost:5173",
            &number(),
            issued_at(),
            Decimal::new(115, 0),
            "deadbeef",
        )
        .expect("payload");
        assert_eq!(qr.url(), "http://localhost:5173/verificar/deadbeef");
        let lines: Vec<&str> = qr.caption().lines().collect();
        assert_eq!(
            lines,
            [
                "Factura: 002-003-000000001",
                "Fecha: 15/03/2024",
                "Total: $115.00",
                "Verificar: http://localhost:5173/verificar/deadbeef",
            ]
        );
    }

    #[test]
    fn missing_parts_are_rejected() {
        assert!(matches!(
            QrPayload::for_document("http://x", &number(), issued_at(), Decimal::ONE, " "),
            Err(QrCodeError::MissingDigest)
        ));
        assert!(matches!(
            QrPayload::for_document("/", &number(), issued_at(), Decimal::ONE, "ab"),
            Err(QrCodeError::MissingBaseUrl)
        ));
    }

    struct EchoRenderer;

    impl QrRenderer for EchoRenderer {
        fn render(&self, payload: &str) -> QrResult<Vec<u8>> {
            Ok(payload.as_bytes().to_vec())
        }
    }

    #[test]
    fn renderer_receives_the_url() {
        let qr = QrPayload::for_document("http://x", &number(), issued_at(), Decimal::ONE, "ab")
            .expect("payload");
        assert_eq!(
            EchoRenderer.render_payload(&qr).expect("render"),
            b"http://x/verificar/ab"
        );
    }
}
