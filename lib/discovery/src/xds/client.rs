use std::future::Future;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::message::{DiscoveryRequest, DiscoveryResponse, Node};
use super::{Error, ProtocolVersion};
use crate::http::{Auth, HttpClient, HttpError, TlsConfig};

const JSON_CONTENT_TYPE: &str = "application/json";

/// A client for one resource type on one xDS server.
///
/// The client keeps the version and nonce of the last accepted response and
/// sends them back on the next request, so the server can tell whether it
/// has anything new. Fetching takes `&mut self`, one client serves one
/// sequential caller.
pub trait ResourceClient: Send {
    /// The type URL of the resources this client fetches.
    fn resource_type_url(&self) -> &str;

    /// The xDS server this client talks to, as configured.
    fn server(&self) -> &str;

    fn protocol_version(&self) -> ProtocolVersion;

    /// The node id sent with every request.
    fn id(&self) -> &str;

    /// Requests the latest resources. `Ok(None)` means nothing changed
    /// since the last accepted response.
    fn fetch(
        &mut self,
        shutdown: &CancellationToken,
    ) -> impl Future<Output = Result<Option<DiscoveryResponse>, Error>> + Send;
}

#[derive(Clone, Debug)]
pub struct HttpResourceClientConfig {
    pub server: String,
    pub protocol_version: ProtocolVersion,

    /// The short resource name, used to build the endpoint path,
    /// e.g. `monitoringassignment`.
    pub resource_type: String,
    pub resource_type_url: String,

    pub client_id: String,

    pub tls: Option<TlsConfig>,
    pub auth: Option<Auth>,
}

/// Fetches resources with the REST-JSON variant of the State-of-the-World
/// protocol, one POST per fetch.
#[derive(Debug)]
pub struct HttpResourceClient {
    client: HttpClient,
    config: HttpResourceClientConfig,
    endpoint: Url,

    latest_version: String,
    latest_nonce: String,
}

impl HttpResourceClient {
    pub fn new(config: HttpResourceClientConfig) -> Result<Self, Error> {
        let endpoint = make_endpoint(
            config.protocol_version,
            &config.server,
            &config.resource_type,
        )?;
        let client = HttpClient::new(config.tls.as_ref(), config.auth.clone())?;

        Ok(HttpResourceClient {
            client,
            config,
            endpoint,
            latest_version: String::new(),
            latest_nonce: String::new(),
        })
    }

    pub fn config(&self) -> &HttpResourceClientConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn latest_version(&self) -> &str {
        &self.latest_version
    }

    pub fn latest_nonce(&self) -> &str {
        &self.latest_nonce
    }

    fn discovery_request(&self) -> DiscoveryRequest {
        DiscoveryRequest {
            version_info: self.latest_version.clone(),
            node: Node {
                id: self.config.client_id.clone(),
            },
            resource_names: vec![],
            type_url: self.config.resource_type_url.clone(),
            response_nonce: self.latest_nonce.clone(),
        }
    }

    /// Performs the HTTP exchange. Returns `None` when the server answers
    /// with "not modified".
    async fn exchange(&self, body: Vec<u8>) -> Result<Option<Bytes>, Error> {
        let req = Request::post(self.endpoint.as_str())
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(ACCEPT, JSON_CONTENT_TYPE)
            .body(Full::new(Bytes::from(body)))
            .map_err(HttpError::BuildRequest)?;

        let resp = self.client.send(req).await?;
        match resp.status() {
            StatusCode::OK => {}
            StatusCode::NOT_MODIFIED => return Ok(None),
            status => return Err(Error::UnexpectedStatus(status)),
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(HttpError::ReadIncoming)?
            .to_bytes();

        Ok(Some(body))
    }
}

impl ResourceClient for HttpResourceClient {
    fn resource_type_url(&self) -> &str {
        &self.config.resource_type_url
    }

    fn server(&self) -> &str {
        &self.config.server
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.config.protocol_version
    }

    fn id(&self) -> &str {
        &self.config.client_id
    }

    async fn fetch(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<Option<DiscoveryResponse>, Error> {
        let body = serde_json::to_vec(&self.discovery_request()).map_err(Error::Encode)?;

        let body = tokio::select! {
            biased;

            _ = shutdown.cancelled() => return Err(Error::Cancelled),
            result = self.exchange(body) => match result? {
                Some(body) => body,
                None => return Ok(None),
            },
        };

        let response =
            serde_json::from_slice::<DiscoveryResponse>(&body).map_err(Error::Decode)?;

        self.latest_version.clone_from(&response.version_info);
        self.latest_nonce.clone_from(&response.nonce);

        Ok(Some(response))
    }
}

/// Builds `<server>/<protocol version>/discovery:<resource type>`, keeping
/// any path the server URL already has.
pub fn make_endpoint(
    protocol_version: ProtocolVersion,
    server: &str,
    resource_type: &str,
) -> Result<Url, Error> {
    if server.is_empty() {
        return Err(Error::EmptyServer);
    }

    let mut url = Url::parse(server).map_err(|err| Error::InvalidUrl {
        url: server.to_string(),
        err,
    })?;

    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidServerUrl(server.to_string()));
    }

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(Error::UnsupportedScheme(scheme.to_string())),
    }

    let path = format!(
        "{}/{}/discovery:{}",
        url.path().trim_end_matches('/'),
        protocol_version,
        resource_type
    );
    url.set_path(&path);

    Ok(url)
}
