//! Protocol messages exchanged with the update service.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::error::{Result, UpdateError};
use crate::json;

/// Flat device properties sent alongside a check-in
pub type Properties = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Check-in
// ---------------------------------------------------------------------------

/// Body of `POST {host}/tok/provision/update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckInRequest<'a> {
    pub id: &'a str,
    pub product: &'a str,
    pub version: &'a str,
    #[serde(flatten)]
    pub properties: &'a Properties,
}

impl CheckInRequest<'_> {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| UpdateError::InvalidArgument(format!("Cannot encode check-in: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// Offer
// ---------------------------------------------------------------------------

/// An update the service is offering this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOffer {
    pub download_url: String,
    /// Expected SHA-256 of the artifact, lowercase hex
    pub checksum: String,
    /// Opaque id echoed back in the status report
    pub update_id: String,
    /// Display only
    pub new_version: String,
}

impl UpdateOffer {
    /// Parse a check-in response.
    ///
    /// A body without a `url` field means no update is available. A `url`
    /// without all of `checksum`, `update` and `version` is rejected.
    pub fn from_response(body: &str) -> Result<Option<Self>> {
        let Some(download_url) = json::extract(body, "url") else {
            return Ok(None);
        };
        let checksum = json::extract(body, "checksum");
        let update_id = json::extract(body, "update");
        let new_version = json::extract(body, "version");

        match (checksum, update_id, new_version) {
            (Some(checksum), Some(update_id), Some(new_version)) => Ok(Some(Self {
                download_url,
                checksum,
                update_id,
                new_version,
            })),
            (checksum, update_id, new_version) => {
                let missing: Vec<&str> = [
                    ("checksum", checksum.is_none()),
                    ("update", update_id.is_none()),
                    ("version", new_version.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                Err(UpdateError::IncompleteOffer(missing.join(", ")))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Body of `POST {host}/tok/provision/updateReport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport<'a> {
    #[serde(serialize_with = "quoted_bool")]
    pub success: bool,
    pub id: &'a str,
    pub update: &'a str,
}

impl StatusReport<'_> {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| UpdateError::InvalidArgument(format!("Cannot encode report: {}", e)))
    }
}

/// The service expects `"true"`/`"false"` as strings.
fn quoted_bool<S: Serializer>(value: &bool, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "true" } else { "false" })
}
