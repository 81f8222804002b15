use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured résumé data attached to a candidate profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resume {
    /// Skills, in the order the candidate listed them
    #[serde(default)]
    pub skills: Vec<String>,

    /// Preferred work location
    #[serde(default)]
    pub suggested_location: String,
}

/// Profile document as stored under the candidate's identifier.
///
/// A profile without `resume` is valid; it only means defaults are used when
/// the session context is synthesized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProfile {
    #[serde(default)]
    pub resume: Option<Resume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    /// No document exists for the identifier
    #[error("candidate profile not found")]
    NotFound,

    /// The store could not be reached or answered with garbage
    #[error("profile store unavailable: {0}")]
    Transport(String),
}

/// Key-indexed lookup of candidate profiles.
///
/// Implementations must not retry or cache: a failure is surfaced to the
/// caller immediately.
#[async_trait::async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn fetch(&self, candidate_id: &str) -> Result<CandidateProfile, ProfileError>;
}
