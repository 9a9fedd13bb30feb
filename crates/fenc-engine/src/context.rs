//! Explicit context object shared by every job: configuration, the cipher
//! registry and the key manager.

use std::sync::Arc;

use fenc_core::{FencConfig, FencError, FencResult};
use fenc_crypto::{AnyCipher, CipherRegistry};
use fenc_keys::KeyManager;

#[derive(Debug)]
pub struct FencContext {
    config: FencConfig,
    registry: Arc<CipherRegistry>,
    keys: KeyManager,
}

impl FencContext {
    /// Context over the built-in cipher set.
    pub fn new(config: FencConfig) -> FencResult<Self> {
        Self::with_registry(config, CipherRegistry::with_builtin())
    }

    pub fn with_registry(config: FencConfig, registry: CipherRegistry) -> FencResult<Self> {
        config.validate()?;
        let default_algorithm = &config.encryption.default_algorithm;
        if !registry.contains(default_algorithm) {
            return Err(FencError::config(format!(
                "encryption.default_algorithm '{default_algorithm}' is not a registered cipher"
            )));
        }
        let registry = Arc::new(registry);
        let keys = KeyManager::from_config(&config, Arc::clone(&registry));
        tracing::debug!(
            keys_dir = %keys.dir().display(),
            algorithms = registry.names().len(),
            "context ready"
        );
        Ok(Self {
            config,
            registry,
            keys,
        })
    }

    pub fn config(&self) -> &FencConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CipherRegistry> {
        &self.registry
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    /// Fresh cipher instance; one per concurrent operation.
    pub fn cipher(&self, name: &str) -> FencResult<AnyCipher> {
        self.registry.create(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fenc_core::ErrorKind;

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = FencConfig::default();
        config.encryption.chunk_size = 0;
        assert!(FencContext::new(config).is_err());
    }

    #[test]
    fn test_rejects_unknown_default_algorithm() {
        let mut config = FencConfig::default();
        config.encryption.default_algorithm = "AES-512-XTS".into();
        let err = FencContext::new(config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_keys_dir_follows_config() {
        let mut config = FencConfig::default();
        config.keys.dir = "/srv/fenc/keys".into();
        let ctx = FencContext::new(config).unwrap();
        assert_eq!(ctx.keys().dir(), std::path::Path::new("/srv/fenc/keys"));
        assert!(ctx.cipher("AES-128-CTR").is_ok());
    }
}
