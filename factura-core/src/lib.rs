//! Invoice integrity engine: access keys, sequential numbering, customer field
//! encryption, canonical signing, verification by digest, and audit logging.
//!
//! # Examples
//! ```rust
//! use factura_core::access_key::check_digit;
//!
//! assert_eq!(check_digit("4")?, 3);
//! # Ok::<(), factura_core::access_key::AccessKeyError>(())
//! ```
pub mod access_key;
pub mod audit;
pub mod authority;
pub mod cipher;
pub mod config;
pub mod context;
pub mod customer;
pub mod invoice;
pub mod issuance;
pub mod keys;
pub mod numbering;
pub mod store;
pub mod verify;

use thiserror::Error;

pub use config::{ConfigError, EnvironmentParseError};
pub use context::EngineContext;

/// Top-level error wrapper for engine operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Keys(#[from] keys::KeyError),
    #[error(transparent)]
    Cipher(#[from] cipher::CipherError),
    #[error(transparent)]
    AccessKey(#[from] access_key::AccessKeyError),
    #[error(transparent)]
    Numbering(#[from] numbering::NumberingError),
    #[error(transparent)]
    Document(#[from] invoice::DocumentError),
    #[error(transparent)]
    Signing(#[from] invoice::sign::SigningError),
    #[error(transparent)]
    Qr(#[from] invoice::QrCodeError),
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Customer(#[from] customer::CustomerError),
    #[error(transparent)]
    Issue(#[from] issuance::IssueError),
    #[error(transparent)]
    Authority(#[from] authority::AuthorityError),
    #[error(transparent)]
    Verification(#[from] verify::VerificationError),
}
