//! Service discovery over the xDS State-of-the-World protocol, polled with
//! plain HTTP requests.

mod client;
pub mod kuma;
mod message;
#[cfg(test)]
mod mock;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::TargetGroup;
use crate::http::HttpError;
use crate::refresh::{Refresh, SkipUpdate};

pub use client::{HttpResourceClient, HttpResourceClientConfig, ResourceClient, make_endpoint};
pub use message::{DiscoveryRequest, DiscoveryResponse, Node, Resource};

/// The xDS server the groups were fetched from.
pub const SERVER_LABEL: &str = "__meta_xds_server";
/// The protocol version used to fetch the groups.
pub const PROTOCOL_VERSION_LABEL: &str = "__meta_xds_protocol_version";
/// The node id this client identified itself with.
pub const CLIENT_ID_LABEL: &str = "__meta_xds_client_id";

#[derive(Debug, Error)]
pub enum Error {
    #[error("empty or null xDS server")]
    EmptyServer,
    #[error("invalid xDS server URL {url:?}: {err}")]
    InvalidUrl { url: String, err: url::ParseError },
    #[error("invalid xDS server URL {0:?}, scheme and host are required")]
    InvalidServerUrl(String),
    #[error("invalid xDS server URL protocol {0:?}, must be either 'http' or 'https'")]
    UnsupportedScheme(String),
    #[error("unsupported xDS protocol version {0:?}")]
    UnsupportedProtocolVersion(String),

    #[error("non 200 status '{}' response during xDS fetch", .0.as_u16())]
    UnexpectedStatus(http::StatusCode),
    #[error("encode discovery request failed, {0}")]
    Encode(serde_json::Error),
    #[error("decode discovery response failed, {0}")]
    Decode(serde_json::Error),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("xDS fetch cancelled")]
    Cancelled,

    #[error("response was empty for resource type {type_url}")]
    Unchanged {
        type_url: String,
        #[source]
        skip: SkipUpdate,
    },
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProtocolVersion {
    #[default]
    V3,
}

impl ProtocolVersion {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V3 => "v3",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v3" => Ok(ProtocolVersion::V3),
            _ => Err(Error::UnsupportedProtocolVersion(s.to_string())),
        }
    }
}

impl TryFrom<String> for ProtocolVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProtocolVersion> for String {
    fn from(value: ProtocolVersion) -> Self {
        value.as_str().to_string()
    }
}

/// Converts the resources of a discovery response into target groups.
///
/// Implemented for plain functions and closures of the same shape. Failing
/// on any resource fails the whole parse.
pub trait ResourceParser: Send {
    fn parse(&self, resources: &[Resource], type_url: &str) -> crate::Result<Vec<TargetGroup>>;
}

impl<F> ResourceParser for F
where
    F: Fn(&[Resource], &str) -> crate::Result<Vec<TargetGroup>> + Send,
{
    fn parse(&self, resources: &[Resource], type_url: &str) -> crate::Result<Vec<TargetGroup>> {
        self(resources, type_url)
    }
}

pub type ParseFn = fn(&[Resource], &str) -> crate::Result<Vec<TargetGroup>>;

/// Glues a `ResourceClient` and a `ResourceParser` into something a
/// `RefreshDiscovery` can drive, and tags every group with where it came
/// from.
pub struct FetchDiscovery<C, P> {
    client: C,
    parser: P,
    source: String,
}

impl<C: ResourceClient, P: ResourceParser> FetchDiscovery<C, P> {
    pub fn new(client: C, parser: P, source: impl Into<String>) -> Self {
        Self {
            client,
            parser,
            source: source.into(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl<C: ResourceClient, P: ResourceParser> Refresh for FetchDiscovery<C, P> {
    async fn refresh(&mut self, shutdown: &CancellationToken) -> crate::Result<Vec<TargetGroup>> {
        let Some(response) = self.client.fetch(shutdown).await? else {
            let type_url = self.client.resource_type_url().to_string();

            return Err(Error::Unchanged {
                skip: SkipUpdate::new(format!("{type_url} is up to date")),
                type_url,
            }
            .into());
        };

        debug!(
            message = "discovery response received",
            type_url = %response.type_url,
            version = %response.version_info,
            resources = response.resources.len(),
        );

        let mut groups = self.parser.parse(&response.resources, &response.type_url)?;

        debug!(
            message = "resources parsed",
            version = %response.version_info,
            groups = groups.len(),
        );

        let server = self.client.server();
        let protocol_version = self.client.protocol_version();
        let client_id = self.client.id();
        for group in &mut groups {
            group.source.clone_from(&self.source);

            group
                .labels
                .insert(SERVER_LABEL.to_string(), server.to_string());
            group.labels.insert(
                PROTOCOL_VERSION_LABEL.to_string(),
                protocol_version.to_string(),
            );
            group
                .labels
                .insert(CLIENT_ID_LABEL.to_string(), client_id.to_string());
        }

        Ok(groups)
    }
}
