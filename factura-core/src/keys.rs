//! Signing key material lifecycle.
//!
//! One RSA-2048 key pair signs every document. It is generated on first use,
//! persisted as the `rsa_keys` configuration record, and reloaded afterwards.
use crate::store::{ConfigStore, StoreError};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::info;

pub const RSA_KEYS_RECORD: &str = "rsa_keys";
pub const RSA_KEY_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to generate RSA key pair: {0}")]
    Generation(String),
    #[error("stored key material is corrupted: {0}")]
    Corrupted(String),
    #[error("failed to encode key material: {0}")]
    Encoding(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

#[derive(Serialize, Deserialize)]
struct StoredKeyPair {
    private_key: String,
    public_key: String,
}

/// RSA key pair used for document signatures.
#[derive(Clone)]
pub struct KeyMaterial {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyMaterial {
    pub fn generate() -> Result<Self, KeyError> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| KeyError::Generation(format!("{e:?}")))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Load a pair from PKCS#8 (private) and SPKI (public) PEM.
    ///
    /// # Errors
    /// Returns [`KeyError::Corrupted`] if either PEM fails to parse or the
    /// public half does not belong to the private half.
    pub fn from_pem(private_pem: &str, public_pem: &str) -> Result<Self, KeyError> {
        let private = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .map_err(|e| KeyError::Corrupted(format!("private key parse error: {e:?}")))?;
        let public = RsaPublicKey::from_public_key_pem(public_pem)
            .map_err(|e| KeyError::Corrupted(format!("public key parse error: {e:?}")))?;
        if RsaPublicKey::from(&private) != public {
            return Err(KeyError::Corrupted(
                "public key does not match private key".into(),
            ));
        }
        Ok(Self { private, public })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn public_key_pem(&self) -> Result<String, KeyError> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encoding(format!("{e:?}")))
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    fn from_record(raw: &str) -> Result<Self, KeyError> {
        let stored: StoredKeyPair = serde_json::from_str(raw)
            .map_err(|e| KeyError::Corrupted(format!("record is not valid JSON: {e}")))?;
        Self::from_pem(&stored.private_key, &stored.public_key)
    }

    fn to_record(&self) -> Result<String, KeyError> {
        let private_key = self
            .private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encoding(format!("{e:?}")))?;
        let stored = StoredKeyPair {
            private_key: private_key.as_str().to_owned(),
            public_key: self.public_key_pem()?,
        };
        serde_json::to_string(&stored).map_err(|e| KeyError::Encoding(e.to_string()))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("modulus_bits", &(self.public.size() * 8))
            .finish_non_exhaustive()
    }
}

/// Loads the signing key pair, generating and persisting it on first use.
pub struct KeyMaterialManager<'a, S: ConfigStore> {
    store: &'a S,
}

impl<'a, S: ConfigStore> KeyMaterialManager<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Return the persisted key pair without creating one.
    ///
    /// Never writes to the store.
    pub fn load(&self) -> Result<Option<KeyMaterial>, KeyError> {
        self.store
            .get(RSA_KEYS_RECORD)?
            .map(|raw| KeyMaterial::from_record(&raw))
            .transpose()
    }

    /// Return the persisted key pair, creating it if none exists yet.
    ///
    /// A record that exists but cannot be decoded is reported as
    /// [`KeyError::Corrupted`] and left untouched. When two callers race on
    /// an empty store, the first committed pair wins and both return it.
    pub fn ensure_key_material(&self) -> Result<KeyMaterial, KeyError> {
        if let Some(material) = self.load()? {
            info!("loaded signing key material");
            return Ok(material);
        }

        let generated = KeyMaterial::generate()?;
        match self
            .store
            .put_if_absent(RSA_KEYS_RECORD, &generated.to_record()?)?
        {
            Some(winner) => {
                info!("signing key material was created concurrently; using stored pair");
                KeyMaterial::from_record(&winner)
            }
            None => {
                info!(bits = RSA_KEY_BITS, "generated signing key material");
                Ok(generated)
            }
        }
    }
}

/// Key pair shared by the unit tests of this crate.
#[cfg(test)]
pub(crate) fn test_key_material() -> KeyMaterial {
    use std::sync::OnceLock;
    static KEYS: OnceLock<KeyMaterial> = OnceLock::new();
    KEYS.get_or_init(|| KeyMaterial::generate().expect("generate test keys"))
        .clone()
}
