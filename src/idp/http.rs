//! reqwest based identity provider client

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::auth::MechanismKind;
use crate::idp::client::{
    IdentityProviderClient, IdpError, IntrospectionResponse, ProviderMetadata, TokenGrant,
    TokenResponse,
};
use crate::idp::filters::{FilterRegistry, OidcEndpoint, OidcRequestContext, OidcResponseContext};
use crate::tenant::{ClientAuthMethod, TenantConfig};

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";
const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(600);
/// Entries kept per cache before the oldest are evicted
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

struct CacheEntry<T> {
    value: T,
    fetched_at: Instant,
}

/// Per tenant cache holding at most `capacity` entries
struct BoundedCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    capacity: usize,
}

impl<T: Clone> BoundedCache<T> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Cached value younger than `ttl`, if any
    fn get(&self, key: &str, ttl: Option<Duration>) -> Option<T> {
        let entry = self.entries.get(key)?;
        match ttl {
            Some(ttl) if entry.fetched_at.elapsed() >= ttl => None,
            _ => Some(entry.value.clone()),
        }
    }

    fn insert(&self, key: String, value: T) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drop the oldest quarter of the entries, at least one
    fn evict_oldest(&self) {
        let mut entries: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().fetched_at))
            .collect();
        entries.sort_by_key(|(_, fetched_at)| *fetched_at);

        let evict_count = (entries.len() / 4).max(1);
        for (key, _) in entries.into_iter().take(evict_count) {
            self.entries.remove(&key);
        }
        debug!(evicted = evict_count, "Evicted identity provider cache entries");
    }

}

/// Identity provider client with cached discovery metadata and JWKS
pub struct HttpIdentityProviderClient {
    client: Client,
    metadata: BoundedCache<ProviderMetadata>,
    jwks: BoundedCache<JwkSet>,
    jwks_ttl: Duration,
    filters: Arc<FilterRegistry>,
}

impl HttpIdentityProviderClient {
    pub fn new(filters: Arc<FilterRegistry>) -> Self {
        Self::with_client(Client::new(), filters)
    }

    pub fn with_client(client: Client, filters: Arc<FilterRegistry>) -> Self {
        Self {
            client,
            metadata: BoundedCache::new(DEFAULT_CACHE_CAPACITY),
            jwks: BoundedCache::new(DEFAULT_CACHE_CAPACITY),
            jwks_ttl: DEFAULT_JWKS_TTL,
            filters,
        }
    }

    /// Bound both caches to `capacity` tenants
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.metadata = BoundedCache::new(capacity);
        self.jwks = BoundedCache::new(capacity);
        self
    }

    pub fn with_jwks_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_ttl = ttl;
        self
    }

    fn cache_key(tenant: &TenantConfig) -> String {
        format!(
            "{}|{}",
            tenant.id(),
            tenant.auth_server_url.as_deref().unwrap_or_default()
        )
    }

    fn required(endpoint: Option<String>, name: &str, tenant: &TenantConfig) -> Result<String, IdpError> {
        endpoint.ok_or_else(|| {
            IdpError::protocol(format!(
                "Tenant '{}' has no {} endpoint",
                tenant.id(),
                name
            ))
        })
    }

    /// Add client authentication to a token or introspection call
    fn authenticate_client(
        tenant: &TenantConfig,
        secret: Option<Secret<String>>,
        request: &mut OidcRequestContext,
    ) {
        let client_id = tenant.client_id.clone().unwrap_or_default();
        match (secret, tenant.credentials.method) {
            (Some(secret), ClientAuthMethod::Basic) => {
                let credentials = format!(
                    "{}:{}",
                    urlencoding::encode(&client_id),
                    urlencoding::encode(secret.expose_secret())
                );
                request.headers.push((
                    "Authorization".to_string(),
                    format!("Basic {}", STANDARD.encode(credentials)),
                ));
            }
            (Some(secret), ClientAuthMethod::Post) => {
                request.form.push(("client_id".to_string(), client_id));
                request
                    .form
                    .push(("client_secret".to_string(), secret.expose_secret().clone()));
            }
            (None, _) => {
                request.form.push(("client_id".to_string(), client_id));
            }
        }
    }

    /// Run filters, send the call and classify the response status
    async fn execute(&self, mut request: OidcRequestContext) -> Result<String, IdpError> {
        self.filters.apply_request(&mut request);

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .header("Accept", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        let response = builder.send().await.map_err(|e| {
            error!(endpoint = %request.endpoint, url = %request.url, error = %e, "Identity provider call failed");
            IdpError::Transport {
                message: e.to_string(),
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.text().await.map_err(|e| IdpError::Transport {
            message: e.to_string(),
        })?;

        let mut response = OidcResponseContext {
            tenant_id: request.tenant_id,
            mechanism: request.mechanism,
            endpoint: request.endpoint,
            status,
            headers,
            body,
        };
        self.filters.apply_response(&mut response);

        match response.status {
            200..=299 => Ok(response.body),
            401 => {
                warn!(endpoint = %response.endpoint, tenant_id = %response.tenant_id, "Identity provider returned 401");
                Err(IdpError::Unauthorized {
                    body: response.body,
                })
            }
            status => {
                warn!(endpoint = %response.endpoint, tenant_id = %response.tenant_id, status, "Identity provider returned an error");
                Err(IdpError::Status {
                    status,
                    body: response.body,
                })
            }
        }
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: OidcRequestContext) -> Result<T, IdpError> {
        let endpoint = request.endpoint;
        let body = self.execute(request).await?;
        serde_json::from_str(&body).map_err(|e| {
            IdpError::protocol(format!("Failed to parse {} response: {}", endpoint, e))
        })
    }

    fn request(
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        endpoint: OidcEndpoint,
        method: Method,
        url: String,
    ) -> OidcRequestContext {
        OidcRequestContext {
            tenant_id: tenant.id().to_string(),
            mechanism,
            endpoint,
            method,
            url,
            headers: Vec::new(),
            form: Vec::new(),
        }
    }
}

#[async_trait]
impl IdentityProviderClient for HttpIdentityProviderClient {
    async fn metadata(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
    ) -> Result<ProviderMetadata, IdpError> {
        let key = Self::cache_key(tenant);
        if let Some(cached) = self.metadata.get(&key, None) {
            return Ok(cached);
        }

        let discovered = if tenant.discovery_enabled {
            let url = tenant
                .endpoint_url(Some(DISCOVERY_PATH))
                .ok_or_else(|| IdpError::protocol(format!("Tenant '{}' has no auth_server_url", tenant.id())))?;
            debug!(tenant_id = %tenant.id(), url = %url, "Fetching OpenID provider metadata");
            self.execute_json(Self::request(tenant, mechanism, OidcEndpoint::Discovery, Method::GET, url))
                .await?
        } else {
            ProviderMetadata {
                issuer: tenant.auth_server_url.clone(),
                ..Default::default()
            }
        };

        let metadata = discovered.with_tenant_overrides(tenant);
        self.metadata.insert(key, metadata.clone());
        Ok(metadata)
    }

    async fn token(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        grant: TokenGrant<'_>,
        secret: Option<Secret<String>>,
    ) -> Result<TokenResponse, IdpError> {
        let metadata = self.metadata(tenant, mechanism).await?;
        let url = Self::required(metadata.token_endpoint, "token", tenant)?;
        let mut request = Self::request(tenant, mechanism, OidcEndpoint::Token, Method::POST, url);

        match grant {
            TokenGrant::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                request.form.push(("grant_type".into(), "authorization_code".into()));
                request.form.push(("code".into(), code.to_string()));
                request.form.push(("redirect_uri".into(), redirect_uri.to_string()));
                if let Some(verifier) = code_verifier {
                    request.form.push(("code_verifier".into(), verifier.to_string()));
                }
            }
            TokenGrant::RefreshToken { refresh_token } => {
                request.form.push(("grant_type".into(), "refresh_token".into()));
                request.form.push(("refresh_token".into(), refresh_token.to_string()));
            }
        }
        Self::authenticate_client(tenant, secret, &mut request);

        self.execute_json(request).await
    }

    async fn introspect(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        token: &str,
        secret: Option<Secret<String>>,
    ) -> Result<IntrospectionResponse, IdpError> {
        let metadata = self.metadata(tenant, mechanism).await?;
        let url = Self::required(metadata.introspection_endpoint, "introspection", tenant)?;
        let mut request =
            Self::request(tenant, mechanism, OidcEndpoint::Introspection, Method::POST, url);
        request.form.push(("token".into(), token.to_string()));
        Self::authenticate_client(tenant, secret, &mut request);

        self.execute_json(request).await
    }

    async fn user_info(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
        access_token: &str,
    ) -> Result<Map<String, Value>, IdpError> {
        let metadata = self.metadata(tenant, mechanism).await?;
        let url = Self::required(metadata.userinfo_endpoint, "userinfo", tenant)?;
        let mut request = Self::request(tenant, mechanism, OidcEndpoint::UserInfo, Method::GET, url);
        request
            .headers
            .push(("Authorization".into(), format!("Bearer {}", access_token)));

        self.execute_json(request).await
    }

    async fn jwks(
        &self,
        tenant: &TenantConfig,
        mechanism: MechanismKind,
    ) -> Result<JwkSet, IdpError> {
        let key = Self::cache_key(tenant);
        if let Some(cached) = self.jwks.get(&key, Some(self.jwks_ttl)) {
            return Ok(cached);
        }

        let metadata = self.metadata(tenant, mechanism).await?;
        let url = Self::required(metadata.jwks_uri, "jwks", tenant)?;
        debug!(tenant_id = %tenant.id(), url = %url, "Fetching JWKS");
        let keys: JwkSet = self
            .execute_json(Self::request(tenant, mechanism, OidcEndpoint::Jwks, Method::GET, url))
            .await?;

        self.jwks.insert(key, keys.clone());
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_cache_evicts_oldest_entry() {
        let cache = BoundedCache::new(2);
        cache.insert("a".to_string(), 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b".to_string(), 2);
        cache.insert("b".to_string(), 3);
        assert_eq!(cache.entries.len(), 2);

        cache.insert("c".to_string(), 4);
        assert_eq!(cache.entries.len(), 2);
        assert_eq!(cache.get("a", None), None);
        assert_eq!(cache.get("b", None), Some(3));
        assert_eq!(cache.get("c", None), Some(4));
    }

    #[test]
    fn bounded_cache_honours_ttl() {
        let cache = BoundedCache::new(1);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get("a", Some(Duration::from_secs(60))), Some(1));
        assert_eq!(cache.get("a", Some(Duration::ZERO)), None);
    }

    #[test]
    fn basic_client_authentication_header() {
        let mut tenant = TenantConfig::new("a", "http://localhost");
        tenant.client_id = Some("quarkus-app".to_string());
        let mut request = HttpIdentityProviderClient::request(
            &tenant,
            MechanismKind::CodeFlow,
            OidcEndpoint::Token,
            Method::POST,
            "http://localhost/token".to_string(),
        );

        HttpIdentityProviderClient::authenticate_client(
            &tenant,
            Some(Secret::new("secret".to_string())),
            &mut request,
        );
        assert_eq!(request.headers[0].0, "Authorization");
        assert_eq!(
            request.headers[0].1,
            format!("Basic {}", STANDARD.encode("quarkus-app:secret"))
        );
        assert!(request.form.is_empty());
    }

    #[test]
    fn post_client_authentication_form() {
        let mut tenant = TenantConfig::new("a", "http://localhost");
        tenant.client_id = Some("quarkus-app".to_string());
        tenant.credentials.method = ClientAuthMethod::Post;
        let mut request = HttpIdentityProviderClient::request(
            &tenant,
            MechanismKind::Bearer,
            OidcEndpoint::Introspection,
            Method::POST,
            "http://localhost/introspect".to_string(),
        );

        HttpIdentityProviderClient::authenticate_client(
            &tenant,
            Some(Secret::new("secret".to_string())),
            &mut request,
        );
        assert!(request.headers.is_empty());
        assert!(request
            .form
            .contains(&("client_secret".to_string(), "secret".to_string())));
    }
}
