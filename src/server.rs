//! HTTP server exposing the protected application endpoints

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use tracing::{debug, info};

use crate::auth::{OidcAuthentication, OidcAuthenticator, SecurityIdentity};
use crate::config::Config;
use crate::error::Result;

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "oidc-tenancy"
    }))
}

/// Echoes `tenant_id:principal` for the authenticated identity
pub async fn whoami(identity: SecurityIdentity) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain")
        .body(format!("{}:{}", identity.tenant_id, identity.principal))
}

/// Register `/health` and put every other path behind the authenticator
pub fn configure(cfg: &mut web::ServiceConfig, authenticator: Arc<OidcAuthenticator>) {
    cfg.route("/health", web::get().to(health_check)).service(
        web::scope("")
            .wrap(OidcAuthentication::new(authenticator))
            .default_service(web::to(whoami)),
    );
}

pub async fn run(config: &Config, authenticator: Arc<OidcAuthenticator>) -> Result<()> {
    let address = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", address);

    HttpServer::new(move || {
        let authenticator = authenticator.clone();
        App::new()
            .wrap(Logger::default())
            .configure(move |cfg| configure(cfg, authenticator))
    })
    .bind(&address)?
    .run()
    .await?;

    debug!("HTTP server stopped");
    Ok(())
}
