use factura_derive::Validate;

#[derive(Validate)]
#[validate(non_empty)]
pub struct Branch {
    pub address: String,

    #[validate(skip)]
    pub legal_name: Option<String>,

    #[validate(skip)]
    pub sequence: u64,
}

fn main() {
    let b = Branch::new("Av. Amazonas 100".into(), None, 10);
    assert!(b.is_ok());
    assert!(Branch::new(" ".into(), Some("x".into()), 1).is_err());
}
