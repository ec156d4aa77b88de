use factura_derive::Validate;

#[derive(Validate)]
#[validate(non_empty, no_field_delimiter)]
pub struct Contact {
    pub phone: String,
    pub email: String,
    #[validate(no_special_chars)]
    pub alias: String,
}

fn main() {
    let c = Contact::new("0999999999".into(), "ana@example.ec".into(), "Ana M".into());
    assert!(c.is_ok());

    let err = Contact::new("09|99".into(), "ana@example.ec".into(), "Ana".into())
        .err()
        .expect("delimiter rejected");
    assert_eq!(err, "phone must not contain the '|' delimiter");

    assert!(Contact::new("1".into(), "a@b".into(), "Ana!".into()).is_err());
    // field-level rules replace the struct-level ones
    assert!(Contact::new("1".into(), "a@b".into(), "".into()).is_ok());
}
