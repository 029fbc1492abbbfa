//! actix-web middleware running the authentication pipeline

use std::rc::Rc;
use std::sync::Arc;

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    Error as ActixError, HttpMessage, HttpResponse, ResponseError,
};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use tracing::warn;

use crate::auth::authenticator::{AuthOutcome, OidcAuthenticator};
use crate::request::RequestContext;
use crate::session::CookieDirective;

fn apply_cookies(response: &mut HttpResponse, cookies: &[CookieDirective]) {
    for cookie in cookies {
        if let Err(e) = response.add_cookie(&cookie.to_cookie()) {
            warn!(cookie = %cookie.name, error = %e, "Failed to set cookie");
        }
    }
}

/// Authenticates every request and stores the
/// [`SecurityIdentity`](crate::auth::SecurityIdentity) in the request extensions
pub struct OidcAuthentication {
    authenticator: Arc<OidcAuthenticator>,
}

impl OidcAuthentication {
    pub fn new(authenticator: Arc<OidcAuthenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S> Transform<S, ServiceRequest> for OidcAuthentication
where
    S: Service<ServiceRequest, Response = ServiceResponse, Error = ActixError> + 'static,
    S::Future: 'static,
{
    type Response = ServiceResponse;
    type Error = ActixError;
    type InitError = ();
    type Transform = OidcAuthenticationService<S>;
    type Future = Ready<std::result::Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(OidcAuthenticationService {
            service: Rc::new(service),
            authenticator: self.authenticator.clone(),
        })
    }
}

pub struct OidcAuthenticationService<S> {
    service: Rc<S>,
    authenticator: Arc<OidcAuthenticator>,
}

impl<S> Service<ServiceRequest> for OidcAuthenticationService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse, Error = ActixError> + 'static,
    S::Future: 'static,
{
    type Response = ServiceResponse;
    type Error = ActixError;
    type Future = LocalBoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let authenticator = self.authenticator.clone();

        Box::pin(async move {
            let context = RequestContext::from(req.request());

            match authenticator.authenticate(&context).await {
                AuthOutcome::Authenticated { identity, cookies }
                | AuthOutcome::Anonymous { identity, cookies } => {
                    req.extensions_mut().insert(identity);
                    let mut res = service.call(req).await?;
                    apply_cookies(res.response_mut(), &cookies);
                    Ok(res)
                }
                AuthOutcome::Respond(challenge) => Ok(req.into_response(challenge.to_response())),
                AuthOutcome::Rejected { error, cookies } => {
                    let mut response = error.error_response();
                    apply_cookies(&mut response, &cookies);
                    Ok(req.into_response(response))
                }
            }
        })
    }
}
