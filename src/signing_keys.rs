//! Per-tenant signing-key managers.
//!
//! # Purpose
//! Each visible tenant owns three key managers: the access-token key, the
//! refresh-token key, and the JWT signing key. Managers mint key material at
//! construction, expose the rotation lifecycle, and are destroyed when the
//! reconciler observes their tenant has disappeared.
//!
//! Access- and refresh-token keys are random secrets; the JWT class carries
//! an RSA private key usable with `jsonwebtoken` (RS256 only).
use crate::model::{CoreConfig, TenantIdentifier};
use crate::multitenancy::FleetError;
use jsonwebtoken::{Algorithm, EncodingKey};
use rand::RngCore;
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

const MICROS_PER_HOUR: i64 = 3_600_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    AccessToken,
    RefreshToken,
    Jwt,
}

/// One minted key. `value` is a hex secret for the token classes and a
/// PKCS#1 PEM private key for the JWT class. Timestamps are Unix
/// microseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub value: String,
    pub created_at_time: i64,
    pub expiry_time: i64,
}

/// Mints and rotates one class of key for one tenant.
#[derive(Debug)]
pub struct SigningKeyManager {
    identifier: TenantIdentifier,
    class: KeyClass,
    update_interval_hours: u64,
    keys: RwLock<Vec<KeyInfo>>,
}

impl SigningKeyManager {
    /// Builds the manager and mints its first key. For the JWT class the
    /// configured algorithm must be RS256.
    pub fn new(
        identifier: TenantIdentifier,
        class: KeyClass,
        config: &CoreConfig,
    ) -> Result<Self, FleetError> {
        if class == KeyClass::Jwt {
            let algorithm = config.jwt_signing_algorithm();
            if !algorithm.eq_ignore_ascii_case("RS256") {
                return Err(FleetError::UnsupportedJwtSigningAlgorithm(
                    algorithm.to_string(),
                ));
            }
        }
        let update_interval_hours = interval_for(class, config);
        let first = generate_key(class, update_interval_hours)?;
        Ok(Self {
            identifier,
            class,
            update_interval_hours,
            keys: RwLock::new(vec![first]),
        })
    }

    pub fn identifier(&self) -> &TenantIdentifier {
        &self.identifier
    }

    pub fn class(&self) -> KeyClass {
        self.class
    }

    pub fn update_interval_hours(&self) -> u64 {
        self.update_interval_hours
    }

    /// All keys this manager has minted, newest first.
    pub async fn get_all_keys(&self) -> Vec<KeyInfo> {
        self.keys.read().await.clone()
    }

    pub async fn latest_key(&self) -> KeyInfo {
        self.keys.read().await[0].clone()
    }

    /// Mints a fresh key when the newest one has expired. Old keys stay
    /// available so material signed before the rotation still verifies.
    pub async fn rotate_if_expired(&self) -> Result<bool, FleetError> {
        let now = unix_micros();
        let mut keys = self.keys.write().await;
        if keys[0].expiry_time > now {
            return Ok(false);
        }
        let fresh = generate_key(self.class, self.update_interval_hours)?;
        keys.insert(0, fresh);
        Ok(true)
    }

    /// Encoding hook for the JWT class.
    pub async fn encoding_key(&self) -> Result<EncodingKey, FleetError> {
        if self.class != KeyClass::Jwt {
            return Err(FleetError::UnsupportedJwtSigningAlgorithm(
                "only the JWT key class signs tokens".to_string(),
            ));
        }
        let latest = self.latest_key().await;
        EncodingKey::from_rsa_pem(latest.value.as_bytes())
            .map_err(|e| FleetError::KeyGeneration(e.to_string()))
    }

    pub fn jwt_algorithm(&self) -> Algorithm {
        Algorithm::RS256
    }
}

fn interval_for(class: KeyClass, config: &CoreConfig) -> u64 {
    match class {
        KeyClass::AccessToken => config.access_token_signing_key_update_interval(),
        KeyClass::RefreshToken => config.refresh_token_key_update_interval(),
        KeyClass::Jwt => config.jwt_signing_key_update_interval(),
    }
}

fn generate_key(class: KeyClass, interval_hours: u64) -> Result<KeyInfo, FleetError> {
    let value = match class {
        KeyClass::AccessToken | KeyClass::RefreshToken => {
            let mut secret = [0u8; 64];
            rand::thread_rng().fill_bytes(&mut secret);
            hex::encode(secret)
        }
        KeyClass::Jwt => {
            let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048)
                .map_err(|e| FleetError::KeyGeneration(e.to_string()))?;
            private_key
                .to_pkcs1_pem(Default::default())
                .map_err(|e| FleetError::KeyGeneration(e.to_string()))?
                .to_string()
        }
    };
    let created_at_time = unix_micros();
    Ok(KeyInfo {
        value,
        created_at_time,
        expiry_time: created_at_time + interval_hours as i64 * MICROS_PER_HOUR,
    })
}

fn unix_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_micros() as i64
}

/// The three managers of one tenant.
#[derive(Clone)]
pub struct TenantSigningKeys {
    pub access_token: Arc<SigningKeyManager>,
    pub refresh_token: Arc<SigningKeyManager>,
    pub jwt: Arc<SigningKeyManager>,
}

/// Process-wide registry: one manager per visible tenant per key class.
pub struct SigningKeyRegistry {
    access: RwLock<HashMap<TenantIdentifier, Arc<SigningKeyManager>>>,
    refresh: RwLock<HashMap<TenantIdentifier, Arc<SigningKeyManager>>>,
    jwt: RwLock<HashMap<TenantIdentifier, Arc<SigningKeyManager>>>,
}

impl SigningKeyRegistry {
    pub fn new() -> Self {
        Self {
            access: RwLock::new(HashMap::new()),
            refresh: RwLock::new(HashMap::new()),
            jwt: RwLock::new(HashMap::new()),
        }
    }

    /// Aligns each class map with the given tenant set: managers are created
    /// for new tenants, kept when the interval is unchanged, rebuilt when it
    /// changed, and destroyed for tenants no longer present.
    pub async fn load_for_all_tenants(
        &self,
        configs: &HashMap<TenantIdentifier, Arc<CoreConfig>>,
    ) -> Result<(), FleetError> {
        for class in [KeyClass::AccessToken, KeyClass::RefreshToken, KeyClass::Jwt] {
            let map = self.map_for(class);
            let mut managers = map.write().await;
            managers.retain(|identifier, _| configs.contains_key(identifier));
            for (identifier, config) in configs {
                let wanted_interval = interval_for(class, config);
                // A manager only ever holds RS256 material, so a config that
                // resolves to any other algorithm must go back through
                // `SigningKeyManager::new` and its algorithm check.
                let reusable = managers.get(identifier).is_some_and(|manager| {
                    manager.update_interval_hours() == wanted_interval
                        && (class != KeyClass::Jwt
                            || config.jwt_signing_algorithm().eq_ignore_ascii_case("RS256"))
                });
                if !reusable {
                    managers.insert(
                        identifier.clone(),
                        Arc::new(SigningKeyManager::new(identifier.clone(), class, config)?),
                    );
                }
            }
        }
        Ok(())
    }

    /// The managers of one tenant, or `None` if the tenant is not loaded.
    pub async fn managers(&self, identifier: &TenantIdentifier) -> Option<TenantSigningKeys> {
        let access = self.access.read().await.get(identifier).cloned()?;
        let refresh = self.refresh.read().await.get(identifier).cloned()?;
        let jwt = self.jwt.read().await.get(identifier).cloned()?;
        Some(TenantSigningKeys {
            access_token: access,
            refresh_token: refresh,
            jwt,
        })
    }

    /// Rotation sweep used by the cron subsystem. Returns how many keys were
    /// rotated.
    pub async fn rotate_expired(&self) -> Result<usize, FleetError> {
        let mut rotated = 0;
        for class in [KeyClass::AccessToken, KeyClass::RefreshToken, KeyClass::Jwt] {
            let managers: Vec<Arc<SigningKeyManager>> =
                self.map_for(class).read().await.values().cloned().collect();
            for manager in managers {
                if manager.rotate_if_expired().await? {
                    rotated += 1;
                }
            }
        }
        Ok(rotated)
    }

    fn map_for(&self, class: KeyClass) -> &RwLock<HashMap<TenantIdentifier, Arc<SigningKeyManager>>> {
        match class {
            KeyClass::AccessToken => &self.access,
            KeyClass::RefreshToken => &self.refresh,
            KeyClass::Jwt => &self.jwt,
        }
    }
}

impl Default for SigningKeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_interval(hours: u64) -> CoreConfig {
        let mut config = CoreConfig::new();
        config.set(
            "access_token_signing_key_update_interval",
            serde_json::json!(hours),
        );
        config
    }

    #[tokio::test]
    async fn manager_mints_one_key_with_interval_expiry() {
        let config = config_with_interval(200);
        let manager = SigningKeyManager::new(
            TenantIdentifier::base(),
            KeyClass::AccessToken,
            &config,
        )
        .expect("manager");

        let keys = manager.get_all_keys().await;
        assert_eq!(keys.len(), 1);
        assert_eq!(
            keys[0].expiry_time - keys[0].created_at_time,
            200 * MICROS_PER_HOUR
        );
    }

    #[tokio::test]
    async fn unexpired_key_is_not_rotated() {
        let manager = SigningKeyManager::new(
            TenantIdentifier::base(),
            KeyClass::RefreshToken,
            &CoreConfig::new(),
        )
        .expect("manager");
        assert!(!manager.rotate_if_expired().await.expect("rotate"));
        assert_eq!(manager.get_all_keys().await.len(), 1);
    }

    #[tokio::test]
    async fn expired_key_rotates_and_keeps_history() {
        let mut config = CoreConfig::new();
        config.set("access_token_signing_key_update_interval", serde_json::json!(0));
        let manager =
            SigningKeyManager::new(TenantIdentifier::base(), KeyClass::AccessToken, &config)
                .expect("manager");

        assert!(manager.rotate_if_expired().await.expect("rotate"));
        let keys = manager.get_all_keys().await;
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0].value, keys[1].value);
    }

    #[tokio::test]
    async fn jwt_manager_signs_tokens() {
        let manager =
            SigningKeyManager::new(TenantIdentifier::base(), KeyClass::Jwt, &CoreConfig::new())
                .expect("manager");
        let key = manager.encoding_key().await.expect("encoding key");

        #[derive(serde::Serialize)]
        struct Claims {
            sub: String,
            exp: i64,
        }
        let header = jsonwebtoken::Header::new(manager.jwt_algorithm());
        let token = jsonwebtoken::encode(
            &header,
            &Claims {
                sub: "u1".to_string(),
                exp: 2_000_000_000,
            },
            &key,
        )
        .expect("token");
        assert_eq!(token.split('.').count(), 3);
    }

    #[tokio::test]
    async fn non_rs256_algorithm_is_rejected() {
        let mut config = CoreConfig::new();
        config.set("jwt_signing_algorithm", serde_json::json!("ES256"));
        let err = SigningKeyManager::new(TenantIdentifier::base(), KeyClass::Jwt, &config)
            .expect_err("unsupported");
        assert!(matches!(
            err,
            FleetError::UnsupportedJwtSigningAlgorithm(alg) if alg == "ES256"
        ));
    }

    #[tokio::test]
    async fn registry_load_creates_reuses_and_destroys() {
        let registry = SigningKeyRegistry::new();
        let base = TenantIdentifier::base();
        let custom = TenantIdentifier::new(Some("c1"), None, None);

        let mut configs = HashMap::new();
        configs.insert(base.clone(), Arc::new(CoreConfig::new()));
        configs.insert(custom.clone(), Arc::new(config_with_interval(200)));
        registry.load_for_all_tenants(&configs).await.expect("load");

        let base_keys = registry.managers(&base).await.expect("base");
        let custom_keys = registry.managers(&custom).await.expect("custom");
        assert_ne!(
            base_keys.access_token.latest_key().await.value,
            custom_keys.access_token.latest_key().await.value
        );

        // Unchanged interval: the same manager (and key material) survives.
        registry.load_for_all_tenants(&configs).await.expect("reload");
        let survived = registry.managers(&custom).await.expect("custom");
        assert!(Arc::ptr_eq(&custom_keys.access_token, &survived.access_token));

        // Removed tenant: its managers are destroyed.
        configs.remove(&custom);
        registry.load_for_all_tenants(&configs).await.expect("shrink");
        assert!(registry.managers(&custom).await.is_none());
        assert!(registry.managers(&base).await.is_some());
    }

    #[tokio::test]
    async fn algorithm_change_without_interval_change_is_not_reused() {
        let registry = SigningKeyRegistry::new();
        let base = TenantIdentifier::base();
        let mut configs = HashMap::new();
        configs.insert(base.clone(), Arc::new(CoreConfig::new()));
        registry.load_for_all_tenants(&configs).await.expect("load");

        // Same jwt interval, different algorithm: the old RS256 manager must
        // not survive the reload.
        let mut changed = CoreConfig::new();
        changed.set("jwt_signing_algorithm", serde_json::json!("ES256"));
        configs.insert(base.clone(), Arc::new(changed));
        let err = registry
            .load_for_all_tenants(&configs)
            .await
            .expect_err("unsupported");
        assert!(matches!(
            err,
            FleetError::UnsupportedJwtSigningAlgorithm(alg) if alg == "ES256"
        ));
    }
}
