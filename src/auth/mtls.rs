//! Mutual TLS client certificate mechanism

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::auth::config::MtlsConfig;
use crate::auth::identity::SecurityIdentity;
use crate::auth::mechanism::{AuthenticationMechanism, Challenge, MechanismKind, MechanismOutcome};
use crate::auth::trusted_proxy::TrustedProxies;
use crate::error::{OidcError, Result};
use crate::request::{PeerCertificate, RequestContext};
use crate::tenant::TenantConfig;

pub struct MtlsMechanism {
    certificate_header: Option<String>,
    trusted_proxies: TrustedProxies,
}

impl MtlsMechanism {
    pub fn new(config: &MtlsConfig) -> Result<Self> {
        let certificate_header = config
            .certificate_header
            .clone()
            .filter(|header| !header.trim().is_empty());
        let trusted_proxies = TrustedProxies::new(&config.trusted_proxies)?;
        if certificate_header.is_some() && trusted_proxies.is_empty() {
            return Err(OidcError::config(
                "http_auth.mtls.certificate_header requires http_auth.mtls.trusted_proxies",
            ));
        }
        Ok(Self {
            certificate_header,
            trusted_proxies,
        })
    }

    /// Certificate from the connection, or the subject forwarded by a trusted proxy
    fn certificate(&self, request: &RequestContext) -> Option<PeerCertificate> {
        if let Some(certificate) = &request.peer_certificate {
            return Some(certificate.clone());
        }
        let header = self.certificate_header.as_deref()?;
        let subject = request
            .header(header)
            .map(str::trim)
            .filter(|subject| !subject.is_empty())?;
        match request.peer_addr {
            Some(peer) if self.trusted_proxies.contains(&peer) => {
                Some(PeerCertificate::new(subject))
            }
            peer => {
                warn!(
                    header = %header,
                    peer = ?peer,
                    "Ignoring forwarded client certificate from an untrusted peer"
                );
                None
            }
        }
    }
}

#[async_trait]
impl AuthenticationMechanism for MtlsMechanism {
    fn kind(&self) -> MechanismKind {
        MechanismKind::Mtls
    }

    async fn authenticate(
        &self,
        request: &RequestContext,
        tenant: &TenantConfig,
    ) -> Result<MechanismOutcome> {
        let Some(certificate) = self.certificate(request) else {
            return Ok(MechanismOutcome::NoCredentials);
        };
        if certificate.subject.trim().is_empty() {
            return Err(OidcError::auth("Client certificate has an empty subject"));
        }

        let principal = certificate
            .common_name()
            .unwrap_or(certificate.subject.as_str())
            .to_string();
        let mut identity = SecurityIdentity::new(principal, tenant.id(), MechanismKind::Mtls)
            .with_attribute("subject", Value::String(certificate.subject.clone()));
        if let Some(der) = &certificate.der {
            identity = identity.with_attribute(
                "fingerprint",
                Value::String(hex::encode(Sha256::digest(der))),
            );
        }

        debug!(principal = %identity.principal, "Client certificate accepted");
        Ok(MechanismOutcome::authenticated(identity))
    }

    async fn challenge(
        &self,
        _request: &RequestContext,
        _tenant: &TenantConfig,
    ) -> Result<Option<Challenge>> {
        Ok(Some(Challenge::unauthorized(None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarding(proxies: &[&str]) -> MtlsConfig {
        MtlsConfig {
            enabled: true,
            certificate_header: Some("X-Client-Cert-Subject".to_string()),
            trusted_proxies: proxies.iter().map(ToString::to_string).collect(),
        }
    }

    async fn outcome(mechanism: &MtlsMechanism, request: &RequestContext) -> MechanismOutcome {
        mechanism
            .authenticate(request, &TenantConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn identity_from_peer_certificate() {
        let mechanism = MtlsMechanism::new(&MtlsConfig::default()).unwrap();
        let certificate = PeerCertificate {
            subject: "CN=backend-service,O=Example".to_string(),
            der: Some(vec![1, 2, 3]),
        };
        let request = RequestContext::new("GET", "/").with_peer_certificate(certificate);

        match outcome(&mechanism, &request).await {
            MechanismOutcome::Authenticated { identity, .. } => {
                assert_eq!(identity.principal, "backend-service");
                assert_eq!(
                    identity.attribute("fingerprint").and_then(Value::as_str),
                    Some(hex::encode(Sha256::digest([1u8, 2, 3])).as_str())
                );
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn forwarded_subject_requires_configured_header() {
        let request = RequestContext::new("GET", "/")
            .with_header("X-Client-Cert-Subject", "CN=proxy-client")
            .with_peer_addr("10.0.0.5".parse().unwrap());

        let mechanism = MtlsMechanism::new(&MtlsConfig::default()).unwrap();
        assert!(matches!(
            outcome(&mechanism, &request).await,
            MechanismOutcome::NoCredentials
        ));

        let mechanism = MtlsMechanism::new(&forwarding(&["10.0.0.0/8"])).unwrap();
        assert!(matches!(
            outcome(&mechanism, &request).await,
            MechanismOutcome::Authenticated { .. }
        ));
    }

    #[tokio::test]
    async fn forwarded_subject_from_untrusted_peer_is_ignored() {
        let mechanism = MtlsMechanism::new(&forwarding(&["10.0.0.0/8"])).unwrap();

        let direct = RequestContext::new("GET", "/")
            .with_header("X-Client-Cert-Subject", "CN=spoofed")
            .with_peer_addr("203.0.113.9".parse().unwrap());
        assert!(matches!(
            outcome(&mechanism, &direct).await,
            MechanismOutcome::NoCredentials
        ));

        let unknown_peer =
            RequestContext::new("GET", "/").with_header("X-Client-Cert-Subject", "CN=spoofed");
        assert!(matches!(
            outcome(&mechanism, &unknown_peer).await,
            MechanismOutcome::NoCredentials
        ));
    }

    #[test]
    fn certificate_header_without_trusted_proxies_is_rejected() {
        let error = MtlsMechanism::new(&forwarding(&[])).err().unwrap();
        assert!(matches!(error, OidcError::Config { .. }));
        assert!(MtlsMechanism::new(&forwarding(&["not-an-address"])).is_err());
    }
}
