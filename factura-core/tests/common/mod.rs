use factura_core::audit::AuditContext;
use factura_core::cipher::MasterKey;
use factura_core::config::{Config, EnvironmentType, IssuerProfile};
use factura_core::customer::{CustomerService, IdentificationType, NewCustomer};
use factura_core::invoice::LineItemInput;
use factura_core::keys::KeyMaterial;
use factura_core::store::{AuditSink, CustomerStore};
use factura_core::EngineContext;
use rust_decimal::Decimal;
use std::sync::OnceLock;

/// RSA generation is slow; every test in a binary shares one pair.
pub fn keys() -> KeyMaterial {
    static KEYS: OnceLock<KeyMaterial> = OnceLock::new();
    KEYS.get_or_init(|| KeyMaterial::generate().expect("generate keys"))
        .clone()
}

#[allow(dead_code)]
pub fn master_key() -> MasterKey {
    MasterKey::from_bytes([7; 32])
}

#[allow(dead_code)]
pub fn config() -> Config {
    Config::new(
        EnvironmentType::Testing,
        IssuerProfile::new(
            "1790012345001".into(),
            "Comercial Andina S.A.".into(),
            "Andina".into(),
            "Av. Amazonas N34-120, Quito".into(),
        )
        .expect("valid issuer"),
    )
}

#[allow(dead_code)]
pub fn context() -> EngineContext {
    EngineContext::from_parts(config(), &master_key(), keys())
}

#[allow(dead_code)]
pub fn add_customer<S: CustomerStore + AuditSink>(
    ctx: &EngineContext,
    store: &S,
    identification: &str,
) -> u64 {
    let new = NewCustomer::new(
        IdentificationType::NationalId,
        identification.into(),
        None,
        "Ana".into(),
        "Mora".into(),
        "Av. Quito 100".into(),
        "0999999999".into(),
        "ana@example.ec".into(),
    )
    .expect("valid customer");
    CustomerService::new(ctx, store)
        .create(new, &AuditContext::system())
        .expect("create customer")
        .id
}

/// Two widgets at 12.50 with 12% VAT: 25.00 + 3.00 = 28.00.
#[allow(dead_code)]
pub fn widget_items() -> Vec<LineItemInput> {
    vec![
        LineItemInput::new("Widget", Decimal::from(2), Decimal::new(1250, 2))
            .with_code("W-1")
            .with_tax_rate(Decimal::from(12)),
    ]
}
