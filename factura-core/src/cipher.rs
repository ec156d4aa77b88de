//! Authenticated encryption of grouped customer PII.
//!
//! The five personal fields of a customer are joined with [`FIELD_DELIMITER`]
//! and sealed together with AES-256-GCM under the master key. Every call to
//! [`FieldCipher::encrypt_group`] draws a fresh 96-bit nonce from the OS RNG.
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64ct::{Base64, Encoding};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

pub const FIELD_DELIMITER: char = '|';
pub const MASTER_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("master key must be {MASTER_KEY_LEN} bytes, got {len}")]
    InvalidKeyLength { len: usize },
    #[error("master key is not valid base64")]
    InvalidKeyEncoding,
    #[error("field '{field}' contains the reserved delimiter '|'")]
    DelimiterInField { field: &'static str },
    #[error("ciphertext failed authentication")]
    Authentication,
    #[error("decrypted payload is not valid UTF-8")]
    Encoding,
    #[error("encryption failed")]
    Encryption,
}

/// 256-bit master key. Wiped from memory on drop.
#[derive(Clone)]
pub struct MasterKey([u8; MASTER_KEY_LEN]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; MASTER_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CipherError::InvalidKeyLength { len: bytes.len() })?;
        Ok(Self(key))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let mut raw =
            Base64::decode_vec(encoded.trim()).map_err(|_| CipherError::InvalidKeyEncoding)?;
        let key = Self::from_slice(&raw);
        raw.zeroize();
        key
    }

    pub fn generate() -> Self {
        let mut key = [0u8; MASTER_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn to_base64(&self) -> String {
        Base64::encode_string(&self.0)
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// The personal fields that are always encrypted as one group.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerFields {
    pub given_names: String,
    pub family_names: String,
    pub address: String,
    pub phone: String,
    pub email: String,
}

impl CustomerFields {
    fn named(&self) -> [(&'static str, &str); 5] {
        [
            ("given_names", self.given_names.as_str()),
            ("family_names", self.family_names.as_str()),
            ("address", self.address.as_str()),
            ("phone", self.phone.as_str()),
            ("email", self.email.as_str()),
        ]
    }

    /// "given family", trimmed.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.given_names, self.family_names)
            .trim()
            .to_string()
    }
}

// Never print PII, even in debug output.
impl fmt::Debug for CustomerFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomerFields(..)")
    }
}

/// Sealed customer fields as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedFieldGroup {
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_LEN],
    #[serde(with = "b64_vec")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64_array")]
    pub auth_tag: [u8; TAG_LEN],
}

/// AES-256-GCM over [`CustomerFields`].
///
/// # Examples
/// ```rust
/// use factura_core::cipher::{CustomerFields, FieldCipher, MasterKey};
///
/// let cipher = FieldCipher::new(&MasterKey::generate());
/// let fields = CustomerFields {
///     given_names: "Ana".into(),
///     family_names: "Mora".into(),
///     ..Default::default()
/// };
/// let sealed = cipher.encrypt_group(&fields)?;
/// assert_eq!(cipher.decrypt_group(&sealed)?, fields);
/// # Ok::<(), factura_core::cipher::CipherError>(())
/// ```
#[derive(Clone)]
pub struct FieldCipher {
    aead: Aes256Gcm,
}

impl FieldCipher {
    pub fn new(key: &MasterKey) -> Self {
        Self {
            aead: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)),
        }
    }

    pub fn encrypt_group(&self, fields: &CustomerFields) -> Result<EncryptedFieldGroup, CipherError> {
        let named = fields.named();
        if let Some((field, _)) = named
            .iter()
            .find(|(_, value)| value.contains(FIELD_DELIMITER))
        {
            return Err(CipherError::DelimiterInField { field: *field });
        }
        let delimiter = FIELD_DELIMITER.to_string();
        let mut plaintext = named
            .iter()
            .map(|(_, value)| *value)
            .collect::<Vec<_>>()
            .join(delimiter.as_str());

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption);
        plaintext.zeroize();
        let mut sealed = sealed?;

        // aes-gcm appends the tag to the ciphertext.
        let split = sealed.len() - TAG_LEN;
        let auth_tag: [u8; TAG_LEN] = sealed[split..]
            .try_into()
            .map_err(|_| CipherError::Encryption)?;
        sealed.truncate(split);

        Ok(EncryptedFieldGroup {
            nonce,
            ciphertext: sealed,
            auth_tag,
        })
    }

    pub fn decrypt_group(&self, group: &EncryptedFieldGroup) -> Result<CustomerFields, CipherError> {
        let mut sealed = Vec::with_capacity(group.ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(&group.ciphertext);
        sealed.extend_from_slice(&group.auth_tag);

        let plaintext = self
            .aead
            .decrypt(Nonce::from_slice(&group.nonce), sealed.as_slice())
            .map_err(|_| CipherError::Authentication)?;
        let mut plaintext = String::from_utf8(plaintext).map_err(|e| {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            CipherError::Encoding
        })?;

        let fields = {
            let mut parts = plaintext.split(FIELD_DELIMITER);
            let mut next = || parts.next().unwrap_or_default().to_string();
            CustomerFields {
                given_names: next(),
                family_names: next(),
                address: next(),
                phone: next(),
                email: next(),
            }
        };
        plaintext.zeroize();
        Ok(fields)
    }
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldCipher { .. }")
    }
}

mod b64_vec {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&Base64::encode_string(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        Base64::decode_vec(&encoded).map_err(serde::de::Error::custom)
    }
}

mod b64_array {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_str(&Base64::encode_string(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        d: D,
    ) -> Result<[u8; N], D::Error> {
        let encoded = String::deserialize(d)?;
        let raw = Base64::decode_vec(&encoded).map_err(serde::de::Error::custom)?;
        let len = raw.len();
        raw.try_into().map_err(|_| {
            serde::de::Error::custom(format!("expected {N} bytes, got {len}"))
        })
    }
}
