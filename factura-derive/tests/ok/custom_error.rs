use factura_derive::Validate;

#[derive(Debug, PartialEq)]
pub enum FormError {
    Invalid(String),
}

impl From<String> for FormError {
    fn from(message: String) -> Self {
        FormError::Invalid(message)
    }
}

#[derive(Validate, Debug)]
#[validate_error(FormError)]
pub struct Customer {
    #[validate(non_empty)]
    pub identification: String,
}

fn main() {
    assert_eq!(
        Customer::new("".into()).unwrap_err(),
        FormError::Invalid("identification must be non-empty".into())
    );
}
