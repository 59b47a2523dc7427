use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// apiVersion: imageversion.dev/v1alpha1
// kind: ManagedWorkload
// metadata:
//   name: monitoring
// spec:
//   replicas: 1
//   components:
//     agent: {}                         # tenant registry, auto-updated
//     connector:
//       version: 1.290.0                # pinned version from the tenant registry
//       autoUpdate: false
//     proxy:
//       image: quay.io/org/proxy:2.1.0  # pinned custom image
// status:
//   phase: Running
//   versions:
//     agent:
//       source: tenant-registry
//       imageRepository: registry.example.com/tenant/agent
//       imageTag: latest
//       imageHash: sha256:...

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "imageversion.dev",
    version = "v1alpha1",
    kind = "ManagedWorkload",
    plural = "managedworkloads",
    shortname = "mw",
    namespaced,
    status = "ManagedWorkloadStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name":"Updated","type":"date","jsonPath": ".status.updatedTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedWorkloadSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    /// Names of secrets in the workload's namespace used to pull component images.
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fully pinned image reference; wins over every other setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Tag to pull from the component's default repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Overrides the tenant registry repository of this component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default = "default_true")]
    pub auto_update: bool,
    #[serde(default)]
    pub public_registry: bool,
}

impl Default for ComponentSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            image: None,
            version: None,
            repository: None,
            auto_update: true,
            public_registry: false,
        }
    }
}

fn default_replicas() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedWorkloadStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionStatus>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Phase {
    Running,
    Deploying,
    Error,
}

/// Strategy that produced a component's current image.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum VersionSource {
    CustomImage,
    CustomVersion,
    PublicRegistry,
    TenantRegistry,
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VersionSource::CustomImage => "custom-image",
            VersionSource::CustomVersion => "custom-version",
            VersionSource::PublicRegistry => "public-registry",
            VersionSource::TenantRegistry => "tenant-registry",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_repository: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<VersionSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_timestamp: Option<DateTime<Utc>>,
}

impl VersionStatus {
    pub fn is_empty(&self) -> bool {
        self.image_repository.is_empty()
            && self.image_tag.is_empty()
            && self.image_hash.is_empty()
            && self.version.is_empty()
    }

    /// Pullable reference of the resolved image, pinned by digest when known.
    pub fn image_reference(&self) -> Option<String> {
        if self.image_repository.is_empty() {
            return None;
        }
        if !self.image_hash.is_empty() {
            return Some(format!("{}@{}", self.image_repository, self.image_hash));
        }
        if !self.image_tag.is_empty() {
            return Some(format!("{}:{}", self.image_repository, self.image_tag));
        }
        None
    }
}
