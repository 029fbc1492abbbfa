//! Per-request authentication pipeline
//!
//! Resolves the tenant, clears sessions that belong to another tenant, picks
//! the candidate mechanisms for the path and runs them, then hands the
//! identity to the registered vetoes.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::auth::basic::BasicMechanism;
use crate::auth::bearer::BearerMechanism;
use crate::auth::code_flow::CodeFlowMechanism;
use crate::auth::config::PolicyKind;
use crate::auth::identity::SecurityIdentity;
use crate::auth::mechanism::{AuthenticationMechanism, Challenge, MechanismKind, MechanismOutcome};
use crate::auth::mtls::MtlsMechanism;
use crate::auth::reauth::{ReauthDecision, ReauthenticationTrigger};
use crate::auth::selector::MechanismSelector;
use crate::auth::verifier::TokenVerifier;
use crate::auth::veto::IdentityVeto;
use crate::config::OidcConfig;
use crate::credentials::{ClientSecretResolver, CredentialsProvider, CredentialsProviderRegistry};
use crate::error::{OidcError, Result};
use crate::idp::{
    FilterRegistry, FilterScope, HttpIdentityProviderClient, IdentityProviderClient,
    OidcRequestFilter, OidcResponseFilter,
};
use crate::request::RequestContext;
use crate::session::CookieDirective;
use crate::tenant::{
    ResolvedTenant, TenantConfig, TenantConfigResolver, TenantRegistry, TenantResolver,
    TenantResolverChain,
};
use crate::token_state::{DefaultTokenStateManager, TokenStateManager};

/// Result of authenticating one request
#[derive(Debug)]
pub enum AuthOutcome {
    Authenticated {
        identity: SecurityIdentity,
        cookies: Vec<CookieDirective>,
    },
    /// Permitted path without credentials
    Anonymous {
        identity: SecurityIdentity,
        cookies: Vec<CookieDirective>,
    },
    /// Answer the request with a redirect or challenge
    Respond(Challenge),
    Rejected {
        error: OidcError,
        cookies: Vec<CookieDirective>,
    },
}

enum Step {
    Identity(SecurityIdentity, Vec<CookieDirective>),
    Respond(Challenge),
    Nothing,
}

type Mechanism = Arc<dyn AuthenticationMechanism>;

pub struct OidcAuthenticator {
    resolver: TenantResolverChain,
    selector: MechanismSelector,
    mechanisms: HashMap<MechanismKind, Mechanism>,
    token_state: Arc<dyn TokenStateManager>,
    vetoes: Vec<Arc<dyn IdentityVeto>>,
    inclusive: bool,
}

impl OidcAuthenticator {
    pub fn builder(config: OidcConfig) -> OidcAuthenticatorBuilder {
        OidcAuthenticatorBuilder::new(config)
    }

    pub fn registry(&self) -> &Arc<TenantRegistry> {
        self.resolver.registry()
    }

    /// Enabled mechanisms in precedence order
    pub fn mechanism_kinds(&self) -> Vec<MechanismKind> {
        MechanismKind::PRECEDENCE
            .into_iter()
            .filter(|kind| self.mechanisms.contains_key(kind))
            .collect()
    }

    pub fn is_inclusive(&self) -> bool {
        self.inclusive
    }

    pub async fn authenticate(&self, request: &RequestContext) -> AuthOutcome {
        let resolved = match self.resolver.resolve(request).await {
            Ok(resolved) => resolved,
            Err(error) => {
                warn!(path = %request.path, error = %error, "Tenant resolution failed");
                return AuthOutcome::Rejected {
                    error,
                    cookies: Vec::new(),
                };
            }
        };
        let tenant = resolved.config.clone();

        let reauth = ReauthenticationTrigger::evaluate(request, &tenant, self.registry());
        if reauth.is_switch() {
            self.release_foreign_state(request, &reauth).await;
        }
        let mut cookies = reauth.clear.clone();

        let selection = self.selector.select(&request.path);
        let candidates: Vec<&Mechanism> = selection
            .mechanisms
            .iter()
            .filter_map(|kind| self.mechanisms.get(kind))
            .filter(|mechanism| mechanism.applies_to(&tenant))
            .collect();
        debug!(
            tenant_id = %tenant.id(),
            strategy = %resolved.strategy,
            candidates = ?candidates.iter().map(|m| m.kind()).collect::<Vec<_>>(),
            "Authenticating request"
        );

        if reauth.force_challenge {
            if let Some(code_flow) = candidates
                .iter()
                .find(|m| m.kind() == MechanismKind::CodeFlow)
            {
                return match code_flow.challenge(request, &tenant).await {
                    Ok(challenge) => AuthOutcome::Respond(
                        challenge
                            .unwrap_or_else(|| Challenge::unauthorized(None))
                            .with_cookies(cookies),
                    ),
                    Err(error) => AuthOutcome::Rejected { error, cookies },
                };
            }
        }

        let step = if self.inclusive {
            self.run_inclusive(request, &tenant, &candidates).await
        } else {
            self.run_first(request, &tenant, &candidates).await
        };

        match step {
            Ok(Step::Identity(identity, extra)) => {
                cookies.extend(extra);
                match self.review(identity, request).await {
                    Ok(identity) => {
                        info!(
                            tenant_id = %identity.tenant_id,
                            principal = %identity.principal,
                            mechanism = ?identity.mechanism,
                            strategy = %resolved.strategy,
                            "Request authenticated"
                        );
                        AuthOutcome::Authenticated { identity, cookies }
                    }
                    Err(error) => AuthOutcome::Rejected { error, cookies },
                }
            }
            Ok(Step::Respond(challenge)) => AuthOutcome::Respond(challenge.with_cookies(cookies)),
            Ok(Step::Nothing) if selection.policy == PolicyKind::Permit => AuthOutcome::Anonymous {
                identity: SecurityIdentity::anonymous(tenant.id()),
                cookies,
            },
            Ok(Step::Nothing) => match Self::challenge(request, &resolved, &candidates).await {
                Ok(challenge) => AuthOutcome::Respond(challenge.with_cookies(cookies)),
                Err(error) => AuthOutcome::Rejected { error, cookies },
            },
            Err(error) => {
                warn!(
                    tenant_id = %tenant.id(),
                    category = error.category(),
                    error = %error,
                    "Authentication failed"
                );
                AuthOutcome::Rejected { error, cookies }
            }
        }
    }

    /// First mechanism that finds credentials decides
    async fn run_first(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
        candidates: &[&Mechanism],
    ) -> Result<Step> {
        for mechanism in candidates {
            match mechanism.authenticate(request, tenant).await? {
                MechanismOutcome::NoCredentials => continue,
                MechanismOutcome::Authenticated { identity, cookies } => {
                    return Ok(Step::Identity(identity, cookies));
                }
                MechanismOutcome::Respond(challenge) => return Ok(Step::Respond(challenge)),
            }
        }
        Ok(Step::Nothing)
    }

    /// mTLS must succeed, every other mechanism with credentials must agree
    async fn run_inclusive(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
        candidates: &[&Mechanism],
    ) -> Result<Step> {
        let mtls = candidates
            .iter()
            .find(|m| m.kind() == MechanismKind::Mtls)
            .ok_or_else(|| OidcError::auth("Inclusive authentication requires mTLS for this path"))?;

        let (mut primary, mut cookies) = match mtls.authenticate(request, tenant).await? {
            MechanismOutcome::Authenticated { identity, cookies } => (identity, cookies),
            MechanismOutcome::NoCredentials => {
                return Err(OidcError::auth(
                    "Inclusive authentication requires a client certificate",
                ));
            }
            MechanismOutcome::Respond(challenge) => return Ok(Step::Respond(challenge)),
        };

        let mut secondary = Map::new();
        for mechanism in candidates.iter().filter(|m| m.kind() != MechanismKind::Mtls) {
            match mechanism.authenticate(request, tenant).await? {
                MechanismOutcome::NoCredentials => {}
                MechanismOutcome::Authenticated {
                    identity,
                    cookies: extra,
                } => {
                    cookies.extend(extra);
                    primary.roles.extend(identity.roles.iter().cloned());
                    secondary.insert(
                        mechanism.kind().to_string(),
                        Value::String(identity.principal),
                    );
                }
                MechanismOutcome::Respond(challenge) => return Ok(Step::Respond(challenge)),
            }
        }

        if !secondary.is_empty() {
            primary = primary.with_attribute("inclusive", Value::Object(secondary));
        }
        Ok(Step::Identity(primary, cookies))
    }

    /// Code flow challenges win so browsers are redirected to login
    async fn challenge(
        request: &RequestContext,
        resolved: &ResolvedTenant,
        candidates: &[&Mechanism],
    ) -> Result<Challenge> {
        let preferred = candidates
            .iter()
            .find(|m| m.kind() == MechanismKind::CodeFlow)
            .or_else(|| candidates.first());
        let challenge = match preferred {
            Some(mechanism) => mechanism.challenge(request, &resolved.config).await?,
            None => None,
        };
        Ok(challenge.unwrap_or_else(|| Challenge::unauthorized(None)))
    }

    async fn review(
        &self,
        mut identity: SecurityIdentity,
        request: &RequestContext,
    ) -> Result<SecurityIdentity> {
        for veto in &self.vetoes {
            identity = veto.review(identity, request).await.map_err(|e| match e {
                abort @ OidcError::CompletionAbort { .. } => abort,
                failed @ OidcError::AuthenticationFailed { .. } => failed,
                other => OidcError::auth(other.to_string()),
            })?;
        }
        Ok(identity)
    }

    async fn release_foreign_state(&self, request: &RequestContext, reauth: &ReauthDecision) {
        for session in &reauth.foreign_sessions {
            let Some(foreign) = self.registry().get(&session.tenant_id) else {
                continue;
            };
            if let Err(e) = self
                .token_state
                .delete(request, &foreign, &session.encoded_token_blob)
                .await
            {
                debug!(tenant_id = %session.tenant_id, error = %e, "Foreign token state not released");
            }
        }
    }
}

/// Assembles an [`OidcAuthenticator`] from configuration and extensions
pub struct OidcAuthenticatorBuilder {
    config: OidcConfig,
    tenant_resolver: Option<Arc<dyn TenantResolver>>,
    config_resolver: Option<Arc<dyn TenantConfigResolver>>,
    token_state: Option<Arc<dyn TokenStateManager>>,
    idp: Option<Arc<dyn IdentityProviderClient>>,
    credentials_providers: Vec<(String, Arc<dyn CredentialsProvider>)>,
    vetoes: Vec<Arc<dyn IdentityVeto>>,
    filters: FilterRegistry,
}

impl OidcAuthenticatorBuilder {
    pub fn new(config: OidcConfig) -> Self {
        Self {
            config,
            tenant_resolver: None,
            config_resolver: None,
            token_state: None,
            idp: None,
            credentials_providers: Vec::new(),
            vetoes: Vec::new(),
            filters: FilterRegistry::new(),
        }
    }

    pub fn tenant_resolver(mut self, resolver: Arc<dyn TenantResolver>) -> Self {
        self.tenant_resolver = Some(resolver);
        self
    }

    pub fn tenant_config_resolver(mut self, resolver: Arc<dyn TenantConfigResolver>) -> Self {
        self.config_resolver = Some(resolver);
        self
    }

    pub fn token_state_manager(mut self, manager: Arc<dyn TokenStateManager>) -> Self {
        self.token_state = Some(manager);
        self
    }

    /// Replace the HTTP identity provider client; filters are then not applied
    pub fn identity_provider(mut self, client: Arc<dyn IdentityProviderClient>) -> Self {
        self.idp = Some(client);
        self
    }

    pub fn credentials_provider<N: Into<String>>(
        mut self,
        name: N,
        provider: Arc<dyn CredentialsProvider>,
    ) -> Self {
        self.credentials_providers.push((name.into(), provider));
        self
    }

    pub fn identity_veto(mut self, veto: Arc<dyn IdentityVeto>) -> Self {
        self.vetoes.push(veto);
        self
    }

    pub fn request_filter(mut self, scope: FilterScope, filter: Arc<dyn OidcRequestFilter>) -> Self {
        self.filters = self.filters.with_request_filter(scope, filter);
        self
    }

    pub fn response_filter(
        mut self,
        scope: FilterScope,
        filter: Arc<dyn OidcResponseFilter>,
    ) -> Self {
        self.filters = self.filters.with_response_filter(scope, filter);
        self
    }

    pub fn build(self) -> Result<OidcAuthenticator> {
        let OidcAuthenticatorBuilder {
            config,
            tenant_resolver,
            config_resolver,
            token_state,
            idp,
            credentials_providers,
            vetoes,
            filters,
        } = self;

        let registry = Arc::new(TenantRegistry::new(
            config.default_tenant.clone(),
            config.tenants.clone(),
        )?);

        let credentials = CredentialsProviderRegistry::from_config(&config.credentials_providers);
        for (name, provider) in credentials_providers {
            credentials.register(name, provider);
        }
        let tenants = std::iter::once(registry.default_tenant())
            .filter(|tenant| tenant.tenant_enabled)
            .chain(registry.tenants().cloned());
        for tenant in tenants {
            if let Some(provider) = &tenant.credentials.provider {
                if !credentials.contains(&provider.name) {
                    return Err(OidcError::config(format!(
                        "Tenant '{}' references unknown credentials provider '{}'",
                        tenant.id(),
                        provider.name
                    )));
                }
            }
        }

        let http_auth = &config.http_auth;
        if http_auth.inclusive && !http_auth.mtls.enabled {
            return Err(OidcError::config(
                "Inclusive authentication requires mTLS to be enabled",
            ));
        }

        let idp: Arc<dyn IdentityProviderClient> = match idp {
            Some(idp) => idp,
            None => Arc::new(HttpIdentityProviderClient::new(Arc::new(filters))),
        };
        let token_state: Arc<dyn TokenStateManager> = match token_state {
            Some(manager) => manager,
            None => Arc::new(DefaultTokenStateManager::new()),
        };
        let verifier = Arc::new(TokenVerifier::new(
            idp,
            ClientSecretResolver::new(Arc::new(credentials)),
        ));

        let mut mechanisms: HashMap<MechanismKind, Mechanism> = HashMap::new();
        mechanisms.insert(
            MechanismKind::Bearer,
            Arc::new(BearerMechanism::new(verifier.clone())),
        );
        mechanisms.insert(
            MechanismKind::CodeFlow,
            Arc::new(CodeFlowMechanism::new(verifier, token_state.clone())),
        );
        if http_auth.basic.enabled {
            mechanisms.insert(
                MechanismKind::Basic,
                Arc::new(BasicMechanism::new(&http_auth.basic)),
            );
        }
        if http_auth.mtls.enabled {
            mechanisms.insert(
                MechanismKind::Mtls,
                Arc::new(MtlsMechanism::new(&http_auth.mtls)?),
            );
        }

        let mut resolver = TenantResolverChain::new(registry)
            .issuer_based(config.resolution.issuer_based);
        if let Some(config_resolver) = config_resolver {
            resolver = resolver.with_config_resolver(config_resolver);
        }
        if let Some(tenant_resolver) = tenant_resolver {
            resolver = resolver.with_tenant_resolver(tenant_resolver);
        }

        Ok(OidcAuthenticator {
            resolver,
            selector: MechanismSelector::new(http_auth)?,
            mechanisms,
            token_state,
            vetoes,
            inclusive: http_auth.inclusive,
        })
    }
}
