//! Known project names. Names come from the local project service and from the config file. The
//! classifier matches window titles against their union.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const REGISTRY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Project registry {url} unavailable: {reason}")]
    Unavailable { url: String, reason: String },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    /// Current project names. An error means the registry could not be asked, not that it
    /// knows no projects.
    async fn project_names(&self) -> Result<Vec<String>, RegistryError>;
}

#[derive(Debug, Deserialize)]
struct ProjectsResponse {
    #[serde(default)]
    projects: Vec<ProjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    #[serde(default)]
    name: String,
}

pub struct HttpProjectRegistry {
    client: Client,
    url: String,
}

impl HttpProjectRegistry {
    pub fn new(url: String) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(REGISTRY_TIMEOUT).build()?;
        Ok(Self { client, url })
    }

    async fn fetch(&self) -> reqwest::Result<Vec<String>> {
        let response: ProjectsResponse = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.projects.into_iter().map(|p| p.name).collect())
    }
}

#[async_trait]
impl ProjectRegistry for HttpProjectRegistry {
    async fn project_names(&self) -> Result<Vec<String>, RegistryError> {
        let names = self
            .fetch()
            .await
            .map_err(|e| RegistryError::Unavailable {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        debug!("Fetched {} project names from {}", names.len(), self.url);
        Ok(names)
    }
}

/// Union of configured and fetched names in first-seen order. Blank and repeated names are
/// dropped, comparing case-insensitively.
pub fn merge_project_names(configured: &[String], fetched: Vec<String>) -> Vec<String> {
    let mut merged: Vec<String> = vec![];
    for name in configured.iter().cloned().chain(fetched) {
        let name = name.trim().to_string();
        if name.is_empty() || merged.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
            continue;
        }
        merged.push(name);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::{
        merge_project_names, HttpProjectRegistry, ProjectRegistry, ProjectsResponse, RegistryError,
    };

    #[test]
    fn test_merge_deduplicates_and_drops_blank() {
        let merged = merge_project_names(
            &["mybro".into(), " ".into()],
            vec!["MyBro".into(), "worktrace".into(), "".into(), "worktrace".into()],
        );
        assert_eq!(merged, vec!["mybro".to_string(), "worktrace".to_string()]);
    }

    #[test]
    fn test_response_shape() {
        let response: ProjectsResponse =
            serde_json::from_str(r#"{"projects":[{"name":"a","path":"/x"},{"id":3}]}"#).unwrap();
        let names = response
            .projects
            .into_iter()
            .map(|p| p.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a".to_string(), "".to_string()]);

        let empty: ProjectsResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.projects.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_an_error() {
        // Port 9 (discard) on loopback is closed on test machines.
        let registry = HttpProjectRegistry::new("http://127.0.0.1:9/api/projects".into()).unwrap();
        assert!(matches!(
            registry.project_names().await,
            Err(RegistryError::Unavailable { .. })
        ));
    }
}
