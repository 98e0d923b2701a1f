mod auth;
mod tls;

use std::fmt;

use bytes::Bytes;
use http::header::{AUTHORIZATION, HeaderValue, PROXY_AUTHORIZATION, USER_AGENT};
use http::{HeaderMap, Request, Response};
use http_body_util::Full;
use hyper::body::{Body, Incoming};
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use rustls::{ClientConfig, RootCertStore};
use thiserror::Error;

pub use auth::Auth;
pub use tls::{TlsConfig, TlsError};

/// Sent with every request unless the request sets its own.
pub const DEFAULT_USER_AGENT: &str = concat!("Prometheus/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Failed to build TLS connector: {0}")]
    BuildTlsConnector(#[from] TlsError),
    #[error("Failed to make HTTP(S) request: {0}")]
    CallRequest(#[from] hyper_util::client::legacy::Error),
    #[error("Failed to reading response: {0}")]
    ReadIncoming(#[from] hyper::Error),
    #[error("Failed to build HTTP request: {0}")]
    BuildRequest(#[from] http::Error),
}

/// A thin wrapper of hyper's pooled client, which applies the configured
/// authentication and default headers to every request.
#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    user_agent: HeaderValue,
    auth: Option<Auth>,
}

impl HttpClient {
    pub fn new(tls: Option<&TlsConfig>, auth: Option<Auth>) -> Result<HttpClient, HttpError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let config = match tls {
            Some(config) => config.client_config()?,
            None => match ClientConfig::builder().with_native_roots() {
                Ok(builder) => builder.with_no_client_auth(),
                Err(err) => {
                    // plain http still works, https handshakes will fail
                    warn!(message = "load native root certificates failed", %err);

                    ClientConfig::builder()
                        .with_root_certificates(RootCertStore::empty())
                        .with_no_client_auth()
                }
            },
        };

        let https = HttpsConnector::from((http, config));
        let client = Client::builder(TokioExecutor::new()).build(https);

        Ok(HttpClient {
            client,
            user_agent: HeaderValue::from_static(DEFAULT_USER_AGENT),
            auth,
        })
    }

    pub async fn send(&self, mut req: Request<Full<Bytes>>) -> Result<Response<Incoming>, HttpError> {
        default_request_headers(&mut req, &self.user_agent);
        if let Some(auth) = &self.auth {
            auth.apply(&mut req);
        }

        debug!(
            message = "Sending HTTP request",
            uri = %req.uri(),
            method = %req.method(),
            headers = ?remove_sensitive(req.headers()),
        );

        let resp = self.client.request(req).await?;

        debug!(
            message = "HTTP response received",
            status = %resp.status(),
            version = ?resp.version(),
            body = %FormatBody(resp.body()),
        );

        Ok(resp)
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("client", &self.client)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

fn default_request_headers<B>(request: &mut Request<B>, user_agent: &HeaderValue) {
    if !request.headers().contains_key(USER_AGENT) {
        request.headers_mut().insert(USER_AGENT, user_agent.clone());
    }
}

/// Newtype placeholder to provide a formatter for the request and response body.
struct FormatBody<'a, B>(&'a B);

impl<B: Body> fmt::Display for FormatBody<'_, B> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let size = self.0.size_hint();
        match (size.lower(), size.upper()) {
            (0, None) => write!(fmt, "[unknown]"),
            (lower, None) => write!(fmt, "[>={lower} bytes]"),

            (0, Some(0)) => write!(fmt, "[empty]"),
            (0, Some(upper)) => write!(fmt, "[<={upper} bytes]"),

            (lower, Some(upper)) if lower == upper => write!(fmt, "[{lower} bytes]"),
            (lower, Some(upper)) => write!(fmt, "[{lower}..={upper} bytes]"),
        }
    }
}

fn remove_sensitive(headers: &HeaderMap<HeaderValue>) -> HeaderMap<HeaderValue> {
    let mut headers = headers.clone();
    for name in &[AUTHORIZATION, PROXY_AUTHORIZATION] {
        if let Some(value) = headers.get_mut(name) {
            value.set_sensitive(true);
        }
    }

    headers
}
