//! Credentials provider SPI and the built-in providers

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use secrecy::Secret;
use serde::Deserialize;
use tracing::debug;

/// Supplies secrets for a keyring at request time
///
/// `attempt` starts at 0 for every request and is incremented when the
/// identity provider rejected the previously returned secret, so rotating
/// providers can hand out the next generation without global state.
/// An empty map means "not provided".
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn get_credentials(&self, keyring_name: &str, attempt: u32)
        -> HashMap<String, Secret<String>>;
}

/// Configuration of a named credentials provider
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsProviderConfig {
    /// Fixed secrets per keyring
    Static {
        #[serde(default)]
        keyrings: BTreeMap<String, BTreeMap<String, Secret<String>>>,
    },
    /// One value per generation; the last value is reused once exhausted
    Rotating {
        #[serde(default)]
        keyrings: BTreeMap<String, BTreeMap<String, Vec<Secret<String>>>>,
    },
    /// Secrets read from `<PREFIX><KEYRING>__<KEY>` environment variables
    Environment {
        #[serde(default = "default_env_prefix")]
        prefix: String,
    },
}

fn default_env_prefix() -> String {
    "OIDC_CREDENTIALS_".to_string()
}

/// Provider returning the same secrets for every attempt
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialsProvider {
    keyrings: BTreeMap<String, BTreeMap<String, Secret<String>>>,
}

impl StaticCredentialsProvider {
    pub fn new(keyrings: BTreeMap<String, BTreeMap<String, Secret<String>>>) -> Self {
        Self { keyrings }
    }

    pub fn with_secret<K: Into<String>, N: Into<String>, V: Into<String>>(
        mut self,
        keyring: K,
        key: N,
        value: V,
    ) -> Self {
        self.keyrings
            .entry(keyring.into())
            .or_default()
            .insert(key.into(), Secret::new(value.into()));
        self
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentialsProvider {
    async fn get_credentials(
        &self,
        keyring_name: &str,
        _attempt: u32,
    ) -> HashMap<String, Secret<String>> {
        self.keyrings
            .get(keyring_name)
            .map(|keys| keys.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

/// Provider selecting a secret generation by attempt number
#[derive(Debug, Clone, Default)]
pub struct RotatingCredentialsProvider {
    keyrings: BTreeMap<String, BTreeMap<String, Vec<Secret<String>>>>,
}

impl RotatingCredentialsProvider {
    pub fn new(keyrings: BTreeMap<String, BTreeMap<String, Vec<Secret<String>>>>) -> Self {
        Self { keyrings }
    }

    pub fn with_generations<K, N, I, V>(mut self, keyring: K, key: N, values: I) -> Self
    where
        K: Into<String>,
        N: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.keyrings.entry(keyring.into()).or_default().insert(
            key.into(),
            values.into_iter().map(|v| Secret::new(v.into())).collect(),
        );
        self
    }
}

#[async_trait]
impl CredentialsProvider for RotatingCredentialsProvider {
    async fn get_credentials(
        &self,
        keyring_name: &str,
        attempt: u32,
    ) -> HashMap<String, Secret<String>> {
        let Some(keys) = self.keyrings.get(keyring_name) else {
            return HashMap::new();
        };
        keys.iter()
            .filter_map(|(key, generations)| {
                let index = (attempt as usize).min(generations.len().checked_sub(1)?);
                Some((key.clone(), generations[index].clone()))
            })
            .collect()
    }
}

/// Separates the keyring from the key in variable names
const KEY_SEPARATOR: &str = "__";

/// Provider reading secrets from the process environment
#[derive(Debug, Clone)]
pub struct EnvironmentCredentialsProvider {
    prefix: String,
}

impl EnvironmentCredentialsProvider {
    pub fn new<P: Into<String>>(prefix: P) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Uppercase with each run of other characters collapsed to one `_`,
    /// so a normalized keyring never contains the `__` separator
    fn normalize(value: &str) -> String {
        value
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|part| !part.is_empty())
            .map(|part| part.to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join("_")
    }

    fn collect<I>(&self, keyring_name: &str, vars: I) -> HashMap<String, Secret<String>>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let keyring = Self::normalize(keyring_name);
        vars.into_iter()
            .filter_map(|(name, value)| {
                let (var_keyring, key) = name
                    .strip_prefix(&self.prefix)?
                    .split_once(KEY_SEPARATOR)?;
                if var_keyring != keyring || key.is_empty() {
                    return None;
                }
                Some((key.to_ascii_lowercase().replace('_', "-"), Secret::new(value)))
            })
            .collect()
    }
}

#[async_trait]
impl CredentialsProvider for EnvironmentCredentialsProvider {
    async fn get_credentials(
        &self,
        keyring_name: &str,
        _attempt: u32,
    ) -> HashMap<String, Secret<String>> {
        let credentials = self.collect(keyring_name, std::env::vars());
        debug!(
            keyring = %keyring_name,
            count = credentials.len(),
            "Loaded credentials from environment"
        );
        credentials
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn static_provider_disambiguates_keyrings() {
        let provider = StaticCredentialsProvider::default()
            .with_secret("tenant-a", "client-secret", "secret-a")
            .with_secret("tenant-b", "client-secret", "secret-b");

        let a = provider.get_credentials("tenant-a", 0).await;
        assert_eq!(a["client-secret"].expose_secret(), "secret-a");
        let b = provider.get_credentials("tenant-b", 3).await;
        assert_eq!(b["client-secret"].expose_secret(), "secret-b");
        assert!(provider.get_credentials("tenant-c", 0).await.is_empty());
    }

    #[tokio::test]
    async fn rotating_provider_clamps_to_last_generation() {
        let provider = RotatingCredentialsProvider::default()
            .with_generations("tenant", "client-secret", ["wrong", "right"]);

        let value = |attempt| {
            let provider = provider.clone();
            async move {
                provider.get_credentials("tenant", attempt).await["client-secret"]
                    .expose_secret()
                    .clone()
            }
        };
        assert_eq!(value(0).await, "wrong");
        assert_eq!(value(1).await, "right");
        assert_eq!(value(7).await, "right");
    }

    #[tokio::test]
    async fn rotating_provider_skips_empty_generations() {
        let provider = RotatingCredentialsProvider::default()
            .with_generations("tenant", "client-secret", Vec::<String>::new());
        assert!(provider.get_credentials("tenant", 0).await.is_empty());
    }

    #[test]
    fn environment_provider_maps_variable_names() {
        let provider = EnvironmentCredentialsProvider::new("OIDC_CREDENTIALS_");
        let vars = vec![
            ("OIDC_CREDENTIALS_TENANT_A__CLIENT_SECRET".to_string(), "s3cret".to_string()),
            ("OIDC_CREDENTIALS_OTHER__CLIENT_SECRET".to_string(), "other".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ];
        let credentials = provider.collect("tenant-a", vars);
        assert_eq!(credentials.len(), 1);
        assert_eq!(credentials["client-secret"].expose_secret(), "s3cret");
    }

    #[test]
    fn environment_keyrings_sharing_a_prefix_stay_apart() {
        let provider = EnvironmentCredentialsProvider::new("OIDC_CREDENTIALS_");
        let vars = || {
            vec![
                ("OIDC_CREDENTIALS_TENANT__CLIENT_SECRET".to_string(), "plain".to_string()),
                ("OIDC_CREDENTIALS_TENANT_A__CLIENT_SECRET".to_string(), "a".to_string()),
                ("OIDC_CREDENTIALS_TENANT__".to_string(), "no-key".to_string()),
            ]
        };

        let tenant = provider.collect("tenant", vars());
        assert_eq!(tenant.len(), 1);
        assert_eq!(tenant["client-secret"].expose_secret(), "plain");

        let tenant_a = provider.collect("tenant-a", vars());
        assert_eq!(tenant_a.len(), 1);
        assert_eq!(tenant_a["client-secret"].expose_secret(), "a");

        assert_eq!(EnvironmentCredentialsProvider::normalize("tenant--a."), "TENANT_A");
    }

    #[test]
    fn deserializes_provider_config() {
        let yaml = r#"
type: rotating
keyrings:
  tenant-a:
    client-secret: [wrong, right]
"#;
        let config: CredentialsProviderConfig = serde_yaml::from_str(yaml).unwrap();
        match config {
            CredentialsProviderConfig::Rotating { keyrings } => {
                assert_eq!(keyrings["tenant-a"]["client-secret"].len(), 2);
            }
            other => panic!("unexpected provider config: {:?}", other),
        }
    }
}
