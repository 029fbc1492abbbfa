//! Framework independent view of an inbound request
//!
//! Resolvers, mechanisms and token state managers only ever see a
//! [`RequestContext`], which keeps them testable without an HTTP server.

use std::collections::HashMap;
use std::net::IpAddr;

use actix_web::HttpRequest;

/// Client certificate presented on the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    /// Subject distinguished name, e.g. `CN=client,O=Example`
    pub subject: String,
    /// DER encoding when the certificate itself is available
    pub der: Option<Vec<u8>>,
}

impl PeerCertificate {
    pub fn new<S: Into<String>>(subject: S) -> Self {
        Self {
            subject: subject.into(),
            der: None,
        }
    }

    /// Common name from the subject, if present
    pub fn common_name(&self) -> Option<&str> {
        self.subject
            .split(',')
            .map(str::trim)
            .find_map(|part| part.strip_prefix("CN=").or_else(|| part.strip_prefix("cn=")))
            .filter(|cn| !cn.is_empty())
    }
}

/// Snapshot of the request state relevant to authentication
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Header names are stored lowercase
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    pub scheme: String,
    pub host: String,
    pub peer_certificate: Option<PeerCertificate>,
    /// Address of the directly connected peer, which may be a proxy
    pub peer_addr: Option<IpAddr>,
}

impl RequestContext {
    pub fn new<M: Into<String>, P: Into<String>>(method: M, path: P) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            ..Default::default()
        }
    }

    pub fn with_header<K: AsRef<str>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_cookie<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_query<Q: Into<String>>(mut self, query: Q) -> Self {
        let query = query.into();
        self.query = if query.is_empty() { None } else { Some(query) };
        self
    }

    pub fn with_scheme<S: Into<String>>(mut self, scheme: S) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_peer_addr(mut self, peer: IpAddr) -> Self {
        self.peer_addr = Some(peer);
        self
    }

    pub fn with_peer_certificate(mut self, certificate: PeerCertificate) -> Self {
        self.peer_certificate = Some(certificate);
        self
    }

    /// Case insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First decoded value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn is_https(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("https")
    }

    /// Path plus query string as sent by the client
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Absolute URL for a path on this request's origin
    pub fn absolute_url(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.host, path)
    }

    /// Bearer token carried by the standard `Authorization` header
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header("authorization")?;
        let (scheme, token) = value.split_once(' ')?;
        if scheme.eq_ignore_ascii_case("bearer") {
            Some(token.trim())
        } else {
            None
        }
    }
}

impl From<&HttpRequest> for RequestContext {
    fn from(req: &HttpRequest) -> Self {
        let headers = req
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let cookies = req
            .cookies()
            .map(|cookies| {
                cookies
                    .iter()
                    .map(|c| (c.name().to_string(), c.value().to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let connection = req.connection_info();
        let query = req.query_string();

        Self {
            method: req.method().as_str().to_string(),
            path: req.path().to_string(),
            query: if query.is_empty() {
                None
            } else {
                Some(query.to_string())
            },
            headers,
            cookies,
            scheme: connection.scheme().to_string(),
            host: connection.host().to_string(),
            peer_certificate: req.conn_data::<PeerCertificate>().cloned(),
            peer_addr: req.peer_addr().map(|addr| addr.ip()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::cookie::Cookie;
    use actix_web::test::TestRequest;

    #[test]
    fn converts_actix_request() {
        let req = TestRequest::get()
            .uri("/protected/tenant/a?code=abc&state=xyz")
            .insert_header(("Custom-Authorization-1", "Bearer token"))
            .cookie(Cookie::new("q_session_a", "state"))
            .peer_addr("10.0.0.5:40000".parse().unwrap())
            .to_http_request();

        let ctx = RequestContext::from(&req);
        assert_eq!(ctx.method, "GET");
        assert_eq!(ctx.peer_addr, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(ctx.path, "/protected/tenant/a");
        assert_eq!(ctx.header("custom-authorization-1"), Some("Bearer token"));
        assert_eq!(ctx.cookie("q_session_a"), Some("state"));
        assert_eq!(ctx.query_param("code").as_deref(), Some("abc"));
        assert_eq!(ctx.path_and_query(), "/protected/tenant/a?code=abc&state=xyz");
    }

    #[test]
    fn bearer_token_requires_bearer_scheme() {
        let ctx = RequestContext::new("GET", "/").with_header("Authorization", "Bearer abc");
        assert_eq!(ctx.bearer_token(), Some("abc"));

        let ctx = RequestContext::new("GET", "/").with_header("Authorization", "Basic abc");
        assert_eq!(ctx.bearer_token(), None);
    }

    #[test]
    fn common_name_is_extracted_from_subject() {
        let cert = PeerCertificate::new("CN=backend-service, O=Example");
        assert_eq!(cert.common_name(), Some("backend-service"));
        assert_eq!(PeerCertificate::new("O=Example").common_name(), None);
    }
}
