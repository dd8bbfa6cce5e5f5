//! Supporting types shared by the discovery CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Restrictions on which remote clusters a DiscoveryConfig mirrors
///
/// Every dimension is an allow-list; an empty list (or a zero `lastActive`)
/// places no restriction on that dimension.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    /// Maximum age in days of the last inventory update (0 = unbounded)
    #[serde(default)]
    pub last_active: i64,

    /// OpenShift `major.minor` versions to keep
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_shift_versions: Vec<String>,

    /// Cluster types (plan ids such as OCP, ROSA, ARO) to keep
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_types: Vec<String>,

    /// Cloud providers (aws, gcp, azure, ...) to keep
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub infrastructure_providers: Vec<String>,

    /// Cloud regions to keep
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
}

impl Filter {
    /// Validate every version entry and the inactivity bound
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.last_active < 0 {
            return Err(crate::Error::validation(format!(
                "lastActive must not be negative, got {}",
                self.last_active
            )));
        }

        for version in &self.open_shift_versions {
            if !is_major_minor(version) {
                return Err(crate::Error::validation(format!(
                    "openShiftVersions entry '{version}' must be of the form major.minor"
                )));
            }
        }

        Ok(())
    }
}

/// Matches `^(0|[1-9]\d*)\.(0|[1-9]\d*)$`
fn is_major_minor(version: &str) -> bool {
    let Some((major, minor)) = version.split_once('.') else {
        return false;
    };
    is_version_component(major) && is_version_component(minor)
}

fn is_version_component(part: &str) -> bool {
    !part.is_empty()
        && part.bytes().all(|b| b.is_ascii_digit())
        && (part == "0" || !part.starts_with('0'))
}

/// Back-reference to the secret a cluster was discovered with
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct CredentialRef {
    /// Secret name
    pub name: String,
    /// Secret namespace
    pub namespace: String,
}
