use async_trait::async_trait;
use deployit_config::ReleaseFeedConfig;
use deployit_core::versions::{ToolVersion, VersionSet};
use deployit_core::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

static RELEASE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v(\d{1,3}\.\d{1,3}\.\d{1,3})$").unwrap());

const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 50;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of the versions published for one deployer tool.
#[async_trait]
pub trait VersionFetcher: Send + Sync {
    async fn fetch(&self) -> Result<VersionSet>;
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

/// Reads release tags of a GitHub repository.
pub struct GitHubReleaseFetcher {
    client: reqwest::Client,
    endpoint: String,
    repository: String,
}

impl GitHubReleaseFetcher {
    pub fn new(feed: &ReleaseFeedConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("deployit/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: feed.endpoint.trim_end_matches('/').to_string(),
            repository: feed.repository.clone(),
        }
    }

    async fn page(&self, page: usize) -> Result<Vec<Tag>> {
        let url = format!("{}/repos/{}/tags", self.endpoint, self.repository);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .query(&[("per_page", PAGE_SIZE), ("page", page)])
            .send()
            .await
            .map_err(|e| Error::ExternalService(format!("release feed {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ExternalService(format!(
                "release feed {url} returned {status}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::ExternalService(format!("release feed {url}: {e}")))
    }
}

#[async_trait]
impl VersionFetcher for GitHubReleaseFetcher {
    async fn fetch(&self) -> Result<VersionSet> {
        let mut versions = VersionSet::new();
        for page in 1..=MAX_PAGES {
            let tags = self.page(page).await?;
            let last = tags.len() < PAGE_SIZE;
            versions.extend(
                tags.iter()
                    .filter_map(|t| RELEASE_TAG.captures(&t.name))
                    .filter_map(|c| c[1].parse::<ToolVersion>().ok()),
            );
            if last {
                break;
            }
        }
        debug!(repository = %self.repository, count = versions.len(), "Fetched release tags");
        if versions.is_empty() {
            return Err(Error::ExternalService(format!(
                "no versions found for {}",
                self.repository
            )));
        }
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::collections::HashMap;

    async fn tags(
        Path((owner, _repo)): Path<(String, String)>,
        Query(q): Query<HashMap<String, usize>>,
    ) -> std::result::Result<Json<Value>, StatusCode> {
        match owner.as_str() {
            "broken" => Err(StatusCode::INTERNAL_SERVER_ERROR),
            "empty" => Ok(Json(json!([{"name": "nightly"}]))),
            _ => {
                // First page full of pre-releases, second page with a release.
                let page = q.get("page").copied().unwrap_or(1);
                let body: Vec<Value> = if page == 1 {
                    let mut v: Vec<Value> = (0..99)
                        .map(|i| json!({"name": format!("v1.{i}.0-rc1")}))
                        .collect();
                    v.push(json!({"name": "v1.6.2"}));
                    v
                } else {
                    vec![json!({"name": "v1.7.3"}), json!({"name": "1.8.0"})]
                };
                Ok(Json(Value::Array(body)))
            }
        }
    }

    async fn serve() -> String {
        let app = Router::new().route("/repos/{owner}/{repo}/tags", get(tags));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fetcher(endpoint: String, repository: &str) -> GitHubReleaseFetcher {
        GitHubReleaseFetcher::new(&ReleaseFeedConfig {
            endpoint,
            repository: repository.to_string(),
        })
    }

    #[tokio::test]
    async fn test_pages_and_filters_tags() {
        let f = fetcher(serve().await, "opentofu/opentofu");
        let versions = f.fetch().await.unwrap();
        let listed: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
        assert_eq!(listed, vec!["1.6.2", "1.7.3"]);
    }

    #[tokio::test]
    async fn test_empty_feed_is_error() {
        let f = fetcher(serve().await, "empty/repo");
        assert!(matches!(f.fetch().await, Err(Error::ExternalService(_))));
    }

    #[tokio::test]
    async fn test_http_failure_is_error() {
        let f = fetcher(serve().await, "broken/repo");
        assert!(matches!(f.fetch().await, Err(Error::ExternalService(_))));
    }
}
