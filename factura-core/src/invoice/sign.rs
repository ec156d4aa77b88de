//! RSA-PSS signatures over canonical document digests.
//!
//! The signed message is the UTF-8 text of the lowercase hex digest, not the
//! raw digest bytes. Salt length is the maximum the key allows
//! (`modulus bytes - 32 - 2`), on both the signing and the verifying side.
use super::canonical::ROOT_ELEMENT;
use super::digest_hex;
use base64ct::{Base64, Encoding};
use quick_xml::se::Serializer as QuickXmlSerializer;
use rand::rngs::OsRng;
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use sha2::Sha256;
use thiserror::Error;

pub const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const SIGNATURE_OPEN: &str = "<ds:Signature";
const SIGNATURE_CLOSE: &str = "</ds:Signature>";

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Signing error: {0}")]
    SigningError(String),
}

const SHA256_LEN: usize = 32;

/// Largest PSS salt for a key of `modulus_bytes` with SHA-256.
fn max_salt_len(modulus_bytes: usize) -> usize {
    modulus_bytes.saturating_sub(SHA256_LEN + 2)
}

/// Sign the hex digest text, returning the base64 signature.
pub fn sign_digest(key: &RsaPrivateKey, digest_hex: &str) -> Result<String, SigningError> {
    let salt_len = max_salt_len(key.size());
    let signing_key = SigningKey::<Sha256>::new_with_salt_len(key.clone(), salt_len);
    let signature = signing_key
        .try_sign_with_rng(&mut OsRng, digest_hex.as_bytes())
        .map_err(|e| SigningError::SigningError(format!("PSS signing failed: {e:?}")))?;
    Ok(Base64::encode_string(&signature.to_bytes()))
}

/// Check a base64 signature over the hex digest text.
///
/// Malformed base64, wrong-length signatures and mismatches all yield `false`.
pub fn verify_signature(key: &RsaPublicKey, digest_hex: &str, signature_b64: &str) -> bool {
    let Ok(raw) = Base64::decode_vec(signature_b64.trim()) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(raw.as_slice()) else {
        return false;
    };
    let salt_len = max_salt_len(key.size());
    VerifyingKey::<Sha256>::new_with_salt_len(key.clone(), salt_len)
        .verify(digest_hex.as_bytes(), &signature)
        .is_ok()
}

struct SignatureTrailerXml<'a> {
    signature: &'a str,
    digest: &'a str,
}

impl<'a> Serialize for SignatureTrailerXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ds:Signature", 0)?;
        st.serialize_field("@xmlns:ds", DS_NS)?;
        st.serialize_field("ds:SignatureValue", self.signature)?;
        st.serialize_field("ds:DigestValue", self.digest)?;
        st.end()
    }
}

/// Embed the signature trailer just before the root closing tag.
pub fn append_signature_trailer(
    canonical_body: &str,
    signature_b64: &str,
    digest_hex: &str,
) -> Result<String, SigningError> {
    let closing = format!("</{ROOT_ELEMENT}>");
    let Some(at) = canonical_body.rfind(&closing) else {
        return Err(SigningError::SigningError(format!(
            "document has no closing {closing} tag"
        )));
    };

    let mut trailer = String::with_capacity(512);
    SignatureTrailerXml {
        signature: signature_b64,
        digest: digest_hex,
    }
    .serialize(QuickXmlSerializer::new(&mut trailer))
    .map_err(|e| SigningError::SigningError(format!("trailer serialization failed: {e:?}")))?;

    let mut signed = String::with_capacity(canonical_body.len() + trailer.len());
    signed.push_str(&canonical_body[..at]);
    signed.push_str(&trailer);
    signed.push_str(&canonical_body[at..]);
    Ok(signed)
}

/// Values carried by an embedded signature trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureTrailer {
    pub signature: String,
    pub digest: String,
}

/// Split a signed body into its canonical body and trailer values.
///
/// Returns `None` when the body carries no well-formed trailer.
pub fn strip_signature_trailer(signed_body: &str) -> Option<(String, SignatureTrailer)> {
    let start = signed_body.rfind(SIGNATURE_OPEN)?;
    let end = start + signed_body[start..].find(SIGNATURE_CLOSE)? + SIGNATURE_CLOSE.len();
    let block = &signed_body[start..end];
    let trailer = SignatureTrailer {
        signature: element_text(block, "ds:SignatureValue")?.to_string(),
        digest: element_text(block, "ds:DigestValue")?.to_string(),
    };
    let mut canonical = String::with_capacity(signed_body.len() - block.len());
    canonical.push_str(&signed_body[..start]);
    canonical.push_str(&signed_body[end..]);
    Some((canonical, trailer))
}

fn element_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let from = xml.find(&open)? + open.len();
    let to = from + xml[from..].find(&close)?;
    Some(&xml[from..to])
}

/// Outcome of checking a signed body on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedBodyCheck {
    Valid,
    /// No signature trailer present.
    Unsigned,
    /// The trailer digest does not match the stripped body.
    DigestMismatch,
    BadSignature,
}

/// Recompute the body digest and check the embedded signature against `key`.
pub fn verify_signed_body(key: &RsaPublicKey, signed_body: &str) -> SignedBodyCheck {
    let Some((canonical, trailer)) = strip_signature_trailer(signed_body) else {
        return SignedBodyCheck::Unsigned;
    };
    if digest_hex(&canonical) != trailer.digest {
        return SignedBodyCheck::DigestMismatch;
    }
    if !verify_signature(key, &trailer.digest, &trailer.signature) {
        return SignedBodyCheck::BadSignature;
    }
    SignedBodyCheck::Valid
}
