use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Where an application's source checkout currently points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Resolution {
    #[serde(rename = "not-a-repository")]
    NotARepository,
    #[serde(rename = "tracked")]
    TrackedAt { branch: String, commit_hash: String },
}

impl Resolution {
    pub fn branch(&self) -> Option<&str> {
        match self {
            Self::TrackedAt { branch, .. } => Some(branch),
            Self::NotARepository => None,
        }
    }

    pub fn commit_hash(&self) -> Option<&str> {
        match self {
            Self::TrackedAt { commit_hash, .. } => Some(commit_hash),
            Self::NotARepository => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResolutionCompat {
    Tagged(Resolution),
    LegacySentinel(String),
    LegacyObject {
        branch: Option<String>,
        commit_hash: Option<String>,
    },
}

impl From<ResolutionCompat> for Resolution {
    fn from(value: ResolutionCompat) -> Self {
        match value {
            ResolutionCompat::Tagged(resolution) => resolution,
            ResolutionCompat::LegacySentinel(_) => Self::NotARepository,
            ResolutionCompat::LegacyObject {
                branch: Some(branch),
                commit_hash: Some(commit_hash),
            } => Self::TrackedAt {
                branch,
                commit_hash,
            },
            ResolutionCompat::LegacyObject { .. } => Self::NotARepository,
        }
    }
}

fn deserialize_resolution<'de, D>(deserializer: D) -> Result<Resolution, D::Error>
where
    D: Deserializer<'de>,
{
    ResolutionCompat::deserialize(deserializer).map(Resolution::from)
}

/// Persisted metadata for one registered application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDescriptor {
    #[serde(deserialize_with = "deserialize_resolution")]
    pub resolution: Resolution,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub idx: usize,
    #[serde(default)]
    pub version: Option<String>,
}

pub type DescriptorMap = BTreeMap<String, AppDescriptor>;
