use factura_derive::Validate;

#[derive(Validate)]
pub struct Issuer {
    pub trade_name: String,
    #[validate(non_empty, digits_only)]
    pub tax_id: String,
}

#[derive(Validate)]
pub struct Registration {
    #[validate(tax_id)]
    pub tax_id: String,
}

fn main() {
    let ok = Issuer::new("Comercial Andina".into(), "1790012345001".into());
    assert!(ok.is_ok());

    let err = Issuer::new("Comercial Andina".into(), "17900A2345001".into())
        .err()
        .expect("letters rejected");
    assert_eq!(err, "tax_id must contain only digits");

    let err = Issuer::new("".into(), "  ".into()).err().expect("empty rejected");
    assert_eq!(err, "tax_id must be non-empty");

    assert!(Registration::new("1790012345001".into()).is_ok());
    for bad in ["1790012345", "17900123450011", "17900A2345001"] {
        assert_eq!(
            Registration::new(bad.into()).err().as_deref(),
            Some("tax_id must be exactly 13 digits")
        );
    }
}
