use super::repository::{CandidateProfile, ProfileError, ProfileRepository};
use crate::config::ProfileStoreConfig;
use anyhow::{Context, Result};
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Profile store reached over HTTP.
///
/// Documents live at `{base_url}/{collection}/{candidate_id}` and are plain
/// JSON: `{ "resume": { "skills": [..], "suggestedLocation": ".." } }`.
pub struct HttpProfileRepository {
    client: reqwest::Client,
    base_url: Url,
    collection: String,
    api_key: Option<String>,
}

impl HttpProfileRepository {
    pub fn new(config: &ProfileStoreConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid profile store URL: {}", config.base_url))?;

        if base_url.cannot_be_a_base() {
            anyhow::bail!("Profile store URL cannot be used as a base: {}", base_url);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build profile store HTTP client")?;

        info!(
            "Profile store at {} (collection '{}')",
            base_url, config.collection
        );

        Ok(Self {
            client,
            base_url,
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn document_url(&self, candidate_id: &str) -> Result<Url, ProfileError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProfileError::Transport("profile store URL has no path".to_string()))?
            .pop_if_empty()
            .push(&self.collection)
            .push(candidate_id);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl ProfileRepository for HttpProfileRepository {
    async fn fetch(&self, candidate_id: &str) -> Result<CandidateProfile, ProfileError> {
        let url = self.document_url(candidate_id)?;
        debug!("Fetching candidate profile from {}", url);

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProfileError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                warn!("No profile stored for candidate {}", candidate_id);
                Err(ProfileError::NotFound)
            }
            status if status.is_success() => response
                .json::<CandidateProfile>()
                .await
                .map_err(|e| ProfileError::Transport(format!("invalid profile document: {}", e))),
            status => Err(ProfileError::Transport(format!(
                "profile store answered {}",
                status
            ))),
        }
    }
}
