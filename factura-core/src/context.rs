use crate::cipher::{FieldCipher, MasterKey};
use crate::config::{Config, ConfigError};
use crate::keys::{KeyMaterial, KeyMaterialManager};
use crate::store::ConfigStore;
use rsa::RsaPublicKey;

/// Everything the services share, built once at startup.
#[derive(Debug)]
pub struct EngineContext {
    config: Config,
    cipher: FieldCipher,
    keys: KeyMaterial,
}

impl EngineContext {
    /// Parse the master key and load (or create) the signing key pair.
    pub fn bootstrap<S: ConfigStore>(config: Config, store: &S) -> Result<Self, crate::Error> {
        let encoded = config.master_key().ok_or(ConfigError::MissingMasterKey)?;
        let master_key = MasterKey::from_base64(encoded)?;
        let keys = KeyMaterialManager::new(store).ensure_key_material()?;
        Ok(Self::from_parts(config, &master_key, keys))
    }

    pub fn from_parts(config: Config, master_key: &MasterKey, keys: KeyMaterial) -> Self {
        Self {
            config,
            cipher: FieldCipher::new(master_key),
            keys,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cipher(&self) -> &FieldCipher {
        &self.cipher
    }

    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        self.keys.public_key()
    }
}
