//! JSON rendition of the State-of-the-World discovery messages.
//!
//! Messages are written with proto field names. Responses are also accepted
//! with lowerCamelCase names, since control planes emitting canonical proto
//! JSON use those.

use serde::{Deserialize, Serialize};

/// Identifies the client to the control plane.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Node {
    #[serde(default)]
    pub id: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DiscoveryRequest {
    /// The version of the last accepted response, empty on the first request.
    #[serde(alias = "versionInfo")]
    pub version_info: String,

    pub node: Node,

    /// Empty means every resource of the type.
    #[serde(alias = "resourceNames")]
    pub resource_names: Vec<String>,

    #[serde(alias = "typeUrl")]
    pub type_url: String,

    /// The nonce of the last accepted response, empty on the first request.
    #[serde(alias = "responseNonce")]
    pub response_nonce: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DiscoveryResponse {
    #[serde(alias = "versionInfo")]
    pub version_info: String,

    pub resources: Vec<Resource>,

    #[serde(alias = "typeUrl")]
    pub type_url: String,

    pub nonce: String,
}

/// An opaque typed resource. `value` holds the resource's own JSON encoding
/// and is carried as base64 on the wire.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Resource {
    #[serde(default, alias = "typeUrl")]
    pub type_url: String,

    #[serde(default, with = "base64_bytes")]
    pub value: Vec<u8>,
}

impl Resource {
    pub fn from_json<T: Serialize>(type_url: impl Into<String>, value: &T) -> serde_json::Result<Self> {
        Ok(Resource {
            type_url: type_url.into(),
            value: serde_json::to_vec(value)?,
        })
    }
}

mod base64_bytes {
    use base64::prelude::{BASE64_STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;

        BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map_err(de::Error::custom)
    }
}
