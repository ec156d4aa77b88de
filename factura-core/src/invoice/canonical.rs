//! Canonical XML rendering.
//!
//! The canonical body is compact, has a fixed element order and carries no
//! signature. Its SHA-256 digest is what gets signed and what verification
//! looks records up by.
use super::{DocumentError, InvoiceMeta, InvoiceTotals, LineItem};
use crate::access_key::DocumentType;
use crate::cipher::CustomerFields;
use quick_xml::se::{SeError, Serializer as QuickXmlSerializer};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::BTreeMap;

pub const ROOT_ELEMENT: &str = "factura";
pub const DOCUMENT_VERSION: &str = "1.0.0";
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// VAT tax code ("IVA") in the authority's tax tables.
const VAT_TAX_CODE: &str = "2";

/// Percentage code for a VAT rate, `"8"` (differentiated) for unlisted rates.
pub fn vat_rate_code(rate: Decimal) -> &'static str {
    match rate.normalize().to_string().as_str() {
        "0" => "0",
        "12" => "2",
        "14" => "3",
        "15" => "4",
        "5" => "5",
        "13" => "10",
        _ => "8",
    }
}

/// Render the canonical body for an invoice.
pub fn render(
    meta: &InvoiceMeta,
    customer: &CustomerFields,
    items: &[LineItem],
    totals: &InvoiceTotals,
) -> Result<String, DocumentError> {
    render_xml(&CanonicalXml {
        meta,
        customer,
        items,
        totals,
    })
    .map_err(|e| DocumentError::Render(format!("{e:?}")))
}

fn render_xml(document: &CanonicalXml<'_>) -> Result<String, SeError> {
    let mut buffer = String::with_capacity(2048);
    buffer.push_str(XML_DECLARATION);
    document.serialize(QuickXmlSerializer::new(&mut buffer))?;
    Ok(buffer)
}

mod helpers {
    use rust_decimal::Decimal;
    use serde::ser::{Serialize, SerializeStruct, Serializer};
    use std::fmt::{self, Display, Formatter};

    /// Two-decimal amount text, e.g. `28.00`.
    pub(super) struct Amount(pub(super) Decimal);

    impl Display for Amount {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "{:.2}", super::super::round_amount(self.0))
        }
    }

    impl Serialize for Amount {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(self)
        }
    }

    /// Decimal without trailing zeros, e.g. `2` or `1.5`.
    pub(super) struct Plain(pub(super) Decimal);

    impl Serialize for Plain {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(&self.0.normalize())
        }
    }

    pub(super) struct AdditionalField<'a> {
        pub(super) name: &'static str,
        pub(super) value: &'a str,
    }

    impl<'a> Serialize for AdditionalField<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("campoAdicional", 2)?;
            st.serialize_field("@nombre", self.name)?;
            st.serialize_field("$text", self.value)?;
            st.end()
        }
    }
}

use helpers::{AdditionalField, Amount, Plain};

struct CanonicalXml<'a> {
    meta: &'a InvoiceMeta,
    customer: &'a CustomerFields,
    items: &'a [LineItem],
    totals: &'a InvoiceTotals,
}

impl<'a> Serialize for CanonicalXml<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut root = serializer.serialize_struct(ROOT_ELEMENT, 0)?;
        root.serialize_field("@id", "comprobante")?;
        root.serialize_field("@version", DOCUMENT_VERSION)?;
        root.serialize_field("infoTributaria", &TaxInfoXml(self.meta))?;
        root.serialize_field(
            "infoFactura",
            &InvoiceInfoXml {
                meta: self.meta,
                customer: self.customer,
                items: self.items,
                totals: self.totals,
            },
        )?;
        root.serialize_field("detalles", &DetailsXml(self.items))?;

        let has_extra = !self.customer.email.trim().is_empty()
            || !self.customer.phone.trim().is_empty();
        if has_extra {
            root.serialize_field("infoAdicional", &AdditionalInfoXml(self.customer))?;
        }
        root.end()
    }
}

struct TaxInfoXml<'a>(&'a InvoiceMeta);

impl<'a> Serialize for TaxInfoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let meta = self.0;
        let issuer = &meta.issuer;
        let number = &meta.number;
        let mut st = s.serialize_struct("infoTributaria", 0)?;
        st.serialize_field("ambiente", &meta.environment.access_key_digit())?;
        st.serialize_field("tipoEmision", &meta.emission_type.access_key_digit())?;
        st.serialize_field("razonSocial", issuer.legal_name())?;
        st.serialize_field("nombreComercial", issuer.trade_name())?;
        st.serialize_field("ruc", issuer.tax_id())?;
        st.serialize_field("claveAcceso", meta.access_key.as_str())?;
        st.serialize_field("codDoc", DocumentType::Invoice.code())?;
        st.serialize_field("estab", number.series().establishment())?;
        st.serialize_field("ptoEmi", number.series().point_of_sale())?;
        st.serialize_field("secuencial", &number.serial())?;
        st.serialize_field("dirMatriz", issuer.head_office_address())?;
        st.end()
    }
}

struct InvoiceInfoXml<'a> {
    meta: &'a InvoiceMeta,
    customer: &'a CustomerFields,
    items: &'a [LineItem],
    totals: &'a InvoiceTotals,
}

impl<'a> Serialize for InvoiceInfoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let meta = self.meta;
        let buyer = &meta.customer;
        let mut st = s.serialize_struct("infoFactura", 0)?;
        st.serialize_field(
            "fechaEmision",
            &meta.issued_at.format("%d/%m/%Y").to_string(),
        )?;
        st.serialize_field("dirEstablecimiento", meta.issuer.head_office_address())?;
        st.serialize_field("obligadoContabilidad", "SI")?;
        st.serialize_field(
            "tipoIdentificacionComprador",
            buyer.identification_type.code(),
        )?;
        st.serialize_field("razonSocialComprador", &buyer.display_name(self.customer))?;
        st.serialize_field("identificacionComprador", &buyer.identification)?;
        st.serialize_field("direccionComprador", self.customer.address.trim())?;
        st.serialize_field("totalSinImpuestos", &Amount(self.totals.subtotal()))?;
        st.serialize_field("totalDescuento", &Amount(Decimal::ZERO))?;
        st.serialize_field("totalConImpuestos", &TaxTotalsXml(self.items))?;
        st.serialize_field("propina", &Amount(Decimal::ZERO))?;
        st.serialize_field("importeTotal", &Amount(self.totals.total()))?;
        st.serialize_field("moneda", &meta.currency)?;
        st.end()
    }
}

/// One `totalImpuesto` per distinct rate, in ascending rate order.
struct TaxTotalsXml<'a>(&'a [LineItem]);

impl<'a> Serialize for TaxTotalsXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut by_rate: BTreeMap<Decimal, (Decimal, Decimal)> = BTreeMap::new();
        for item in self.0 {
            let entry = by_rate
                .entry(item.tax_rate().normalize())
                .or_insert((Decimal::ZERO, Decimal::ZERO));
            entry.0 += item.subtotal();
            entry.1 += item.tax();
        }

        let mut st = s.serialize_struct("totalConImpuestos", 0)?;
        for (rate, (base, value)) in by_rate {
            st.serialize_field(
                "totalImpuesto",
                &TaxLineXml {
                    tag: "totalImpuesto",
                    rate,
                    base,
                    value,
                    with_tariff: false,
                },
            )?;
        }
        st.end()
    }
}

struct TaxLineXml {
    tag: &'static str,
    rate: Decimal,
    base: Decimal,
    value: Decimal,
    with_tariff: bool,
}

impl Serialize for TaxLineXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct(self.tag, 0)?;
        st.serialize_field("codigo", VAT_TAX_CODE)?;
        st.serialize_field("codigoPorcentaje", vat_rate_code(self.rate))?;
        if self.with_tariff {
            st.serialize_field("tarifa", &Plain(self.rate))?;
        }
        st.serialize_field("baseImponible", &Amount(self.base))?;
        st.serialize_field("valor", &Amount(self.value))?;
        st.end()
    }
}

struct DetailsXml<'a>(&'a [LineItem]);

impl<'a> Serialize for DetailsXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("detalles", 0)?;
        for item in self.0 {
            st.serialize_field("detalle", &DetailXml(item))?;
        }
        st.end()
    }
}

struct DetailXml<'a>(&'a LineItem);

impl<'a> Serialize for DetailXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let item = self.0;
        let mut st = s.serialize_struct("detalle", 0)?;
        st.serialize_field("codigoPrincipal", item.code())?;
        st.serialize_field("descripcion", item.description())?;
        st.serialize_field("cantidad", &Plain(item.quantity()))?;
        st.serialize_field("precioUnitario", &Plain(item.unit_price()))?;
        st.serialize_field("descuento", &Amount(Decimal::ZERO))?;
        st.serialize_field("precioTotalSinImpuesto", &Amount(item.subtotal()))?;
        st.serialize_field("impuestos", &ItemTaxesXml(item))?;
        st.end()
    }
}

struct ItemTaxesXml<'a>(&'a LineItem);

impl<'a> Serialize for ItemTaxesXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let item = self.0;
        let mut st = s.serialize_struct("impuestos", 0)?;
        st.serialize_field(
            "impuesto",
            &TaxLineXml {
                tag: "impuesto",
                rate: item.tax_rate(),
                base: item.subtotal(),
                value: item.tax(),
                with_tariff: true,
            },
        )?;
        st.end()
    }
}

struct AdditionalInfoXml<'a>(&'a CustomerFields);

impl<'a> Serialize for AdditionalInfoXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let fields = self.0;
        let mut st = s.serialize_struct("infoAdicional", 0)?;
        for (name, value) in [("Email", &fields.email), ("Telefono", &fields.phone)] {
            let value = value.trim();
            if !value.is_empty() {
                st.serialize_field("campoAdicional", &AdditionalField { name, value })?;
            }
        }
        st.end()
    }
}
