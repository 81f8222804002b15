use crate::profile::CandidateProfile;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_CANDIDATE_NAME: &str = "Candidato";
pub const DEFAULT_JOB_TITLE: &str = "Vaga";
pub const DEFAULT_COMPANY_NAME: &str = "Empresa";
pub const DEFAULT_SKILLS: &str = "Geral";
pub const DEFAULT_LOCATION: &str = "Brasil";

/// Parameters handed over by the hosting environment when the page opens.
///
/// Every field is optional here; empty strings count as absent. Values are
/// otherwise used as given, whitespace included. Fallbacks are applied by the
/// accessors so the raw values stay inspectable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapParams {
    pub candidate_id: Option<String>,
    pub candidate_name: Option<String>,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub job_description: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl BootstrapParams {
    pub fn for_candidate(candidate_id: impl Into<String>) -> Self {
        Self {
            candidate_id: Some(candidate_id.into()),
            ..Self::default()
        }
    }

    /// The profile key, or `None` when missing or empty
    pub fn candidate_id(&self) -> Option<&str> {
        present(&self.candidate_id)
    }

    pub fn candidate_name(&self) -> &str {
        present(&self.candidate_name).unwrap_or(DEFAULT_CANDIDATE_NAME)
    }

    pub fn job_title(&self) -> &str {
        present(&self.job_title).unwrap_or(DEFAULT_JOB_TITLE)
    }

    pub fn company_name(&self) -> &str {
        present(&self.company_name).unwrap_or(DEFAULT_COMPANY_NAME)
    }

    pub fn job_description(&self) -> &str {
        present(&self.job_description).unwrap_or("")
    }
}

/// Everything known once bootstrap has succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub bootstrap: Arc<BootstrapParams>,
    pub profile: CandidateProfile,
}

/// Fully resolved configuration for one session, derived at start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionParameters {
    pub candidate_name: String,
    pub job_title: String,
    pub company_name: String,
    pub job_description: String,
    pub resume_context: String,
}

impl SessionParameters {
    pub fn resolve(context: &SessionContext) -> Self {
        let bootstrap = &context.bootstrap;
        Self {
            candidate_name: bootstrap.candidate_name().to_string(),
            job_title: bootstrap.job_title().to_string(),
            company_name: bootstrap.company_name().to_string(),
            job_description: bootstrap.job_description().to_string(),
            resume_context: resume_context(&context.profile),
        }
    }
}

/// One-line résumé summary sent to the agent:
/// `Skills: <skills or Geral>. Localização: <location or Brasil>.`
pub fn resume_context(profile: &CandidateProfile) -> String {
    let resume = profile.resume.as_ref();

    let skills = resume
        .map(|r| r.skills.join(", "))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SKILLS.to_string());

    let location = resume
        .map(|r| r.suggested_location.as_str())
        .filter(|l| !l.is_empty())
        .unwrap_or(DEFAULT_LOCATION);

    format!("Skills: {}. Localização: {}.", skills, location)
}
