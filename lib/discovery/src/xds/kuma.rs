//! Discovery of Kuma dataplanes through the Monitoring Assignment
//! Discovery Service (MADS).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use metrics::Registry;
use serde::{Deserialize, Serialize};

use super::{
    Error, FetchDiscovery, HttpResourceClient, HttpResourceClientConfig, ParseFn,
    ProtocolVersion, Resource, make_endpoint,
};
use crate::http::{Auth, TlsConfig};
use crate::labels::{
    ADDRESS_LABEL, INSTANCE_LABEL, METRICS_PATH_LABEL, SCHEME_LABEL, sanitize_label_name,
};
use crate::refresh::RefreshDiscovery;
use crate::{LabelSet, TargetGroup};

/// Names the mechanism in metrics, and tags every group it emits.
pub const KUMA_MECHANISM: &str = "kuma";

pub const MADS_V1_RESOURCE_TYPE_URL: &str =
    "type.googleapis.com/kuma.observability.v1.MonitoringAssignment";
pub const MADS_V1_RESOURCE_TYPE: &str = "monitoringassignment";

const MESH_LABEL: &str = "__meta_kuma_mesh";
const SERVICE_LABEL: &str = "__meta_kuma_service";
const DATAPLANE_LABEL: &str = "__meta_kuma_dataplane";
const API_VERSION_LABEL: &str = "__meta_kuma_api_version";
const USER_LABEL_PREFIX: &str = "__meta_kuma_label_";

pub type KumaDiscovery = FetchDiscovery<HttpResourceClient, ParseFn>;

#[derive(Debug, thiserror::Error)]
pub enum KumaError {
    #[error("received invalid type URL for Kuma MADS v1 resource: {0}")]
    InvalidTypeUrl(String),
    #[error("cannot parse monitoring assignment: {0}")]
    Decode(serde_json::Error),

    #[error("kuma SD only supports MADS v1: {0}")]
    UnsupportedApiVersion(String),
    #[error("kuma SD client_id must not be empty")]
    EmptyClientId,
    #[error("kuma SD refresh_interval must be greater than zero")]
    ZeroRefreshInterval,
    #[error(transparent)]
    Xds(#[from] Error),
}

/// The MADS API version.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum MadsApiVersion {
    #[default]
    V1,
}

impl MadsApiVersion {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MadsApiVersion::V1 => "v1",
        }
    }
}

impl fmt::Display for MadsApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MadsApiVersion {
    type Err = KumaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1" => Ok(MadsApiVersion::V1),
            _ => Err(KumaError::UnsupportedApiVersion(s.to_string())),
        }
    }
}

impl TryFrom<String> for MadsApiVersion {
    type Error = KumaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MadsApiVersion> for String {
    fn from(value: MadsApiVersion) -> Self {
        value.as_str().to_string()
    }
}

/// The targets of one service in one mesh.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct MonitoringAssignment {
    pub mesh: String,

    #[serde(alias = "source")]
    pub service: String,

    pub labels: BTreeMap<String, String>,

    pub targets: Vec<MonitoringAssignmentTarget>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct MonitoringAssignmentTarget {
    /// The dataplane name.
    pub name: String,

    /// `host:port` to scrape.
    pub address: String,

    pub scheme: String,

    #[serde(alias = "metricsPath")]
    pub metrics_path: String,

    pub labels: BTreeMap<String, String>,
}

fn convert_labels(labels: &BTreeMap<String, String>) -> LabelSet {
    labels
        .iter()
        .map(|(key, value)| {
            (
                format!("{USER_LABEL_PREFIX}{}", sanitize_label_name(key)),
                value.clone(),
            )
        })
        .collect()
}

fn convert_assignment(assignment: MonitoringAssignment) -> TargetGroup {
    let mut labels = convert_labels(&assignment.labels);
    labels.insert(MESH_LABEL.to_string(), assignment.mesh);
    labels.insert(SERVICE_LABEL.to_string(), assignment.service);
    labels.insert(
        API_VERSION_LABEL.to_string(),
        MadsApiVersion::V1.to_string(),
    );

    let targets = assignment
        .targets
        .into_iter()
        .map(|target| {
            let mut labels = convert_labels(&target.labels);

            labels.insert(DATAPLANE_LABEL.to_string(), target.name.clone());
            labels.insert(INSTANCE_LABEL.to_string(), target.name);
            labels.insert(ADDRESS_LABEL.to_string(), target.address);
            labels.insert(SCHEME_LABEL.to_string(), target.scheme);
            if !target.metrics_path.is_empty() {
                labels.insert(METRICS_PATH_LABEL.to_string(), target.metrics_path);
            }

            labels
        })
        .collect();

    TargetGroup {
        targets,
        labels,
        source: String::new(),
    }
}

/// Converts MADS v1 resources into one target group per assignment.
pub fn parse_monitoring_assignments(
    resources: &[Resource],
    type_url: &str,
) -> crate::Result<Vec<TargetGroup>> {
    if type_url != MADS_V1_RESOURCE_TYPE_URL {
        return Err(KumaError::InvalidTypeUrl(type_url.to_string()).into());
    }

    resources
        .iter()
        .map(|resource| {
            serde_json::from_slice::<MonitoringAssignment>(&resource.value)
                .map(convert_assignment)
                .map_err(|err| crate::Error::from(KumaError::Decode(err)))
        })
        .collect()
}

const fn default_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

/// Configuration of a Kuma MADS discovery.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KumaSdConfig {
    /// Address of the Kuma control plane's MADS server, e.g.
    /// `http://kuma-control-plane.kuma-system.svc:5676`.
    pub server: String,

    /// Sent to the control plane to identify this client.
    #[serde(alias = "client_name")]
    pub client_id: String,

    #[serde(default)]
    pub api_version: MadsApiVersion,

    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    #[serde(
        default = "default_refresh_interval",
        with = "humanize::duration::serde"
    )]
    pub refresh_interval: Duration,

    #[serde(default)]
    pub tls: Option<TlsConfig>,

    #[serde(default)]
    pub auth: Option<Auth>,
}

impl KumaSdConfig {
    pub fn validate(&self) -> Result<(), KumaError> {
        if self.client_id.is_empty() {
            return Err(KumaError::EmptyClientId);
        }

        if self.refresh_interval.is_zero() {
            return Err(KumaError::ZeroRefreshInterval);
        }

        make_endpoint(self.protocol_version, &self.server, MADS_V1_RESOURCE_TYPE)?;

        Ok(())
    }

    /// Builds the fetch side only, without a scheduler.
    pub fn discovery(&self) -> Result<KumaDiscovery, KumaError> {
        self.validate()?;

        let client = HttpResourceClient::new(HttpResourceClientConfig {
            server: self.server.clone(),
            protocol_version: self.protocol_version,
            resource_type: MADS_V1_RESOURCE_TYPE.to_string(),
            resource_type_url: MADS_V1_RESOURCE_TYPE_URL.to_string(),
            client_id: self.client_id.clone(),
            tls: self.tls.clone(),
            auth: self.auth.clone(),
        })?;

        Ok(FetchDiscovery::new(
            client,
            parse_monitoring_assignments as ParseFn,
            KUMA_MECHANISM,
        ))
    }

    pub fn build(&self, registry: &Registry) -> Result<RefreshDiscovery<KumaDiscovery>, KumaError> {
        let discovery = self.discovery()?;

        Ok(RefreshDiscovery::new(
            registry,
            KUMA_MECHANISM,
            self.refresh_interval,
            discovery,
        ))
    }
}
