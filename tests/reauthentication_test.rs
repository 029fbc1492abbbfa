//! Code flow login per tenant and reauthentication on tenant switch

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use actix_web::cookie::Cookie;
use actix_web::http::StatusCode;
use actix_web::{test, App};
use url::Url;

use common::{body_text, location, routes, set_cookies, token_response, MockIdentityProvider};
use oidc_tenancy::auth::OidcAuthenticator;
use oidc_tenancy::config::OidcConfig;
use oidc_tenancy::tenant::{ApplicationType, TenantConfig};

const IDP: &str = "http://localhost:8180/realms";
const TENANT_PATH: &str = "/protected/tenant/tenant-resolver";

fn web_app(id: &str) -> TenantConfig {
    TenantConfig {
        client_id: Some(format!("{}-client", id)),
        application_type: ApplicationType::WebApp,
        ..TenantConfig::new(id, format!("{}/{}", IDP, id))
    }
}

fn config() -> OidcConfig {
    let mut tenant = web_app("tenant-resolver");
    tenant.tenant_paths = vec![TENANT_PATH.to_string()];

    let mut tenants = BTreeMap::new();
    tenants.insert("tenant-resolver".to_string(), tenant);
    OidcConfig {
        default_tenant: TenantConfig {
            tenant_id: None,
            ..web_app("quarkus")
        },
        tenants,
        ..Default::default()
    }
}

fn idp() -> Arc<MockIdentityProvider> {
    Arc::new(MockIdentityProvider::new().with_grant(
        "code-1",
        token_response(
            &format!("{}/tenant-resolver", IDP),
            "alice",
            "tenant-resolver-client",
        ),
    ))
}

fn query_param(location: &str, name: &str) -> Option<String> {
    let url = Url::parse(location).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn cookie<'a>(cookies: &'a [(String, String, Option<i64>)], name: &str) -> &'a (String, String, Option<i64>) {
    cookies
        .iter()
        .find(|(cookie, _, _)| cookie == name)
        .unwrap_or_else(|| panic!("no Set-Cookie for {}", name))
}

#[actix_web::test]
async fn login_then_switch_tenant_forces_new_login() {
    let authenticator = OidcAuthenticator::builder(config())
        .identity_provider(idp())
        .build()
        .unwrap();
    let app = test::init_service(App::new().configure(routes(authenticator))).await;

    // Unauthenticated request is redirected to the tenant's provider
    let req = test::TestRequest::get().uri(TENANT_PATH).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let redirect = location(&resp);
    assert!(redirect.starts_with(&format!(
        "{}/tenant-resolver/protocol/openid-connect/auth",
        IDP
    )));
    assert_eq!(
        query_param(&redirect, "client_id").as_deref(),
        Some("tenant-resolver-client")
    );
    let state = query_param(&redirect, "state").unwrap();
    let cookies = set_cookies(&resp);
    assert_eq!(cookie(&cookies, "q_auth_tenant-resolver").1, state);

    // Callback exchanges the code and sets the tenant's session cookie
    let req = test::TestRequest::get()
        .uri(&format!("{}?code=code-1&state={}", TENANT_PATH, state))
        .cookie(Cookie::new("q_auth_tenant-resolver", state.clone()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(location(&resp), TENANT_PATH);
    let cookies = set_cookies(&resp);
    let (_, session, max_age) = cookie(&cookies, "q_session_tenant-resolver").clone();
    assert!(max_age.unwrap() > 0);
    assert_eq!(cookie(&cookies, "q_auth_tenant-resolver").2, Some(0));

    // Session is accepted for its own tenant
    let req = test::TestRequest::get()
        .uri(TENANT_PATH)
        .cookie(Cookie::new("q_session_tenant-resolver", session.clone()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "tenant-resolver:alice");

    // The default tenant does not reuse it: cookie cleared, new login started
    let req = test::TestRequest::get()
        .uri("/protected")
        .cookie(Cookie::new("q_session_tenant-resolver", session))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert!(location(&resp).starts_with(&format!("{}/quarkus/protocol/openid-connect/auth", IDP)));
    let cookies = set_cookies(&resp);
    assert_eq!(cookie(&cookies, "q_session_tenant-resolver").2, Some(0));
    assert!(!cookie(&cookies, "q_auth").1.is_empty());
}

#[actix_web::test]
async fn callback_with_wrong_state_is_rejected() {
    let authenticator = OidcAuthenticator::builder(config())
        .identity_provider(idp())
        .build()
        .unwrap();
    let app = test::init_service(App::new().configure(routes(authenticator))).await;

    let req = test::TestRequest::get()
        .uri(&format!("{}?code=code-1&state=forged", TENANT_PATH))
        .cookie(Cookie::new("q_auth_tenant-resolver", "expected"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn unreadable_session_restarts_login() {
    let authenticator = OidcAuthenticator::builder(config())
        .identity_provider(idp())
        .build()
        .unwrap();
    let app = test::init_service(App::new().configure(routes(authenticator))).await;

    let req = test::TestRequest::get()
        .uri(TENANT_PATH)
        .cookie(Cookie::new("q_session_tenant-resolver", "not-a-token-state"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let cookies = set_cookies(&resp);
    assert_eq!(cookie(&cookies, "q_session_tenant-resolver").2, Some(0));
}
