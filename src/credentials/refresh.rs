//! Client secret resolution with a single refresh on 401

use std::future::Future;
use std::sync::Arc;

use secrecy::Secret;
use tracing::{debug, warn};

use crate::credentials::registry::{CredentialsProviderRegistry, CredentialsRequest};
use crate::error::{OidcError, Result};
use crate::idp::IdpError;
use crate::tenant::TenantConfig;

/// Resolves a tenant's client secret from its literal value or its provider
#[derive(Debug, Clone)]
pub struct ClientSecretResolver {
    registry: Arc<CredentialsProviderRegistry>,
}

impl ClientSecretResolver {
    pub fn new(registry: Arc<CredentialsProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CredentialsProviderRegistry> {
        &self.registry
    }

    /// Provider lookup for a tenant; the keyring defaults to the tenant id
    pub fn provider_request(tenant: &TenantConfig) -> Option<CredentialsRequest> {
        let provider = tenant.credentials.provider.as_ref()?;
        Some(CredentialsRequest {
            provider_name: provider.name.clone(),
            keyring_name: provider
                .keyring_name
                .clone()
                .unwrap_or_else(|| tenant.id().to_string()),
            key: provider.key.clone(),
        })
    }

    /// Client secret for the given attempt; `None` for public clients
    pub async fn client_secret(
        &self,
        tenant: &TenantConfig,
        attempt: u32,
    ) -> Result<Option<Secret<String>>> {
        match Self::provider_request(tenant) {
            Some(request) => match self.registry.resolve(&request, attempt).await {
                Some(secret) => Ok(Some(secret)),
                None => Err(OidcError::credential(format!(
                    "No client secret available from credentials provider '{}'",
                    request
                ))),
            },
            None => Ok(tenant.credentials.secret.clone()),
        }
    }

    /// Run an identity provider call with the tenant's client secret
    ///
    /// When the secret comes from a credentials provider and the provider
    /// answers 401, the secret is resolved again with the next attempt number
    /// and the call is retried exactly once.
    pub async fn with_client_secret<T, F, Fut>(&self, tenant: &TenantConfig, mut call: F) -> Result<T>
    where
        F: FnMut(Option<Secret<String>>) -> Fut,
        Fut: Future<Output = std::result::Result<T, IdpError>>,
    {
        let secret = self.client_secret(tenant, 0).await?;
        match call(secret).await {
            Ok(value) => Ok(value),
            Err(IdpError::Unauthorized { body }) if tenant.credentials.provider.is_some() => {
                warn!(
                    tenant_id = %tenant.id(),
                    "Client secret rejected, refreshing it from the credentials provider"
                );
                debug!(body = %body, "Rejected client secret response");
                let secret = self.client_secret(tenant, 1).await?;
                call(secret).await.map_err(|e| match e {
                    IdpError::Unauthorized { body } => OidcError::credential(format!(
                        "Client secret for tenant '{}' rejected after refresh: {}",
                        tenant.id(),
                        body
                    )),
                    other => other.into(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::provider::RotatingCredentialsProvider;
    use crate::tenant::ProviderReference;
    use secrecy::ExposeSecret;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tenant_with_provider() -> TenantConfig {
        let mut tenant = TenantConfig::new("rotating", "http://localhost");
        tenant.credentials.provider = Some(ProviderReference {
            name: "vault".to_string(),
            keyring_name: None,
            key: "client-secret".to_string(),
        });
        tenant
    }

    fn resolver(generations: &[&str]) -> ClientSecretResolver {
        let registry = CredentialsProviderRegistry::new();
        registry.register(
            "vault",
            Arc::new(RotatingCredentialsProvider::default().with_generations(
                "rotating",
                "client-secret",
                generations.iter().copied(),
            )),
        );
        ClientSecretResolver::new(Arc::new(registry))
    }

    async fn call_expecting(
        resolver: &ClientSecretResolver,
        tenant: &TenantConfig,
        calls: &AtomicU32,
    ) -> Result<String> {
        resolver
            .with_client_secret(tenant, |secret| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                match secret {
                    Some(s) if s.expose_secret() == "right" => Ok("token".to_string()),
                    _ => Err(IdpError::Unauthorized {
                        body: "invalid_client".to_string(),
                    }),
                }
            })
            .await
    }

    #[tokio::test]
    async fn wrong_then_right_succeeds_with_one_retry() {
        let resolver = resolver(&["wrong", "right"]);
        let calls = AtomicU32::new(0);
        let result = call_expecting(&resolver, &tenant_with_provider(), &calls).await;
        assert_eq!(result.unwrap(), "token");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn never_right_within_two_attempts_fails() {
        let resolver = resolver(&["wrong", "wrong", "right"]);
        let calls = AtomicU32::new(0);
        let err = call_expecting(&resolver, &tenant_with_provider(), &calls)
            .await
            .unwrap_err();
        assert!(matches!(err, OidcError::CredentialFailure { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn literal_secrets_are_not_retried() {
        let resolver = resolver(&[]);
        let mut tenant = TenantConfig::new("literal", "http://localhost");
        tenant.credentials.secret = Some(Secret::new("wrong".to_string()));
        let calls = AtomicU32::new(0);
        let err = call_expecting(&resolver, &tenant, &calls).await.unwrap_err();
        assert!(matches!(err, OidcError::CredentialFailure { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_provider_value_is_a_credential_failure() {
        let resolver = ClientSecretResolver::new(Arc::new(CredentialsProviderRegistry::new()));
        let err = resolver
            .client_secret(&tenant_with_provider(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, OidcError::CredentialFailure { .. }));
    }

    #[tokio::test]
    async fn status_errors_pass_through() {
        let resolver = resolver(&["right"]);
        let err = resolver
            .with_client_secret(&tenant_with_provider(), |_| async {
                Err::<(), _>(IdpError::Status {
                    status: 400,
                    body: "Client not found".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OidcError::IdentityProviderStatus { status: 400, .. }));
    }
}
