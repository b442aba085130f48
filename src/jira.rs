//! JIRA Cloud REST v3 collaborator: credentials, a blocking HTTP client
//! with rate-limit retries, and the [`IssueSource`] implementation the
//! pagination driver consumes.

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::export::IssueSource;
use crate::models::{IssuePage, QuerySpec};

const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone)]
pub struct JiraConfig {
    pub url: String,
    pub email: String,
    pub api_token: String,
}

impl JiraConfig {
    /// Read `JIRA_URL`, `JIRA_EMAIL`, and `JIRA_API_TOKEN`. All three are
    /// required; missing ones are reported together.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("JIRA_URL").unwrap_or_default();
        let email = std::env::var("JIRA_EMAIL").unwrap_or_default();
        let api_token = std::env::var("JIRA_API_TOKEN").unwrap_or_default();

        let mut missing = Vec::new();
        if url.is_empty() {
            missing.push("JIRA_URL");
        }
        if email.is_empty() {
            missing.push("JIRA_EMAIL");
        }
        if api_token.is_empty() {
            missing.push("JIRA_API_TOKEN");
        }
        if !missing.is_empty() {
            bail!(
                "missing required environment variables: {}",
                missing.join(", ")
            );
        }

        Ok(JiraConfig {
            url: url.trim_end_matches('/').to_string(),
            email,
            api_token,
        })
    }
}

pub struct JiraClient {
    config: JiraConfig,
    client: Client,
}

impl JiraClient {
    pub fn new(config: JiraConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(JiraClient { config, client })
    }

    /// GET a v3 endpoint, retrying on 429 with the server's Retry-After
    /// (floored by exponential backoff). 401/403 fail immediately with a
    /// credential hint.
    fn api_get(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/rest/api/3/{}", self.config.url, endpoint);

        for attempt in 0..MAX_RETRIES {
            let response = self
                .client
                .get(&url)
                .basic_auth(&self.config.email, Some(&self.config.api_token))
                .header("Accept", "application/json")
                .query(params)
                .send()
                .with_context(|| format!("Request to {} failed", url))?;

            match response.status() {
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(10);
                    let wait = retry_after.max(1 << attempt);
                    warn!(
                        "rate limited by JIRA; waiting {}s before retry ({}/{})",
                        wait,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    std::thread::sleep(Duration::from_secs(wait));
                    continue;
                }
                StatusCode::UNAUTHORIZED => {
                    bail!("authentication failed (401): check JIRA_EMAIL and JIRA_API_TOKEN")
                }
                StatusCode::FORBIDDEN => {
                    bail!("access forbidden (403): token is valid but lacks permission")
                }
                status if !status.is_success() => {
                    let body = response.text().unwrap_or_default();
                    bail!("API request failed ({}) for {}: {}", status, url, body)
                }
                _ => {
                    return response
                        .json()
                        .with_context(|| format!("Invalid JSON from {}", url));
                }
            }
        }

        bail!("max retries ({}) exceeded for {}", MAX_RETRIES, url)
    }

    /// Identity of the authenticated account, for connection testing.
    pub fn myself(&self) -> Result<Value> {
        self.api_get("myself", &[])
    }

    /// All projects the account can see.
    pub fn list_projects(&self) -> Result<Vec<Value>> {
        let projects = self.api_get("project", &[])?;
        Ok(projects.as_array().cloned().unwrap_or_default())
    }

    /// All comments for one issue. Issues fetched through `search/jql`
    /// only embed a truncated comment list, so the full set is fetched
    /// per issue.
    fn issue_comments(&self, key: &str) -> Result<Vec<Value>> {
        let data = self.api_get(&format!("issue/{}/comment", key), &[])?;
        Ok(data
            .get("comments")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

impl IssueSource for JiraClient {
    fn fetch_page(
        &self,
        query: &QuerySpec,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<IssuePage> {
        let jql = query.to_jql();
        let max_results = page_size.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("jql", jql.as_str()),
            ("expand", "changelog,renderedFields"),
            ("fields", "*all"),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = cursor {
            params.push(("nextPageToken", token));
        }

        let data = self.api_get("search/jql", &params)?;

        let mut issues = data
            .get("issues")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        // Embed the full comment list so the mapper sees one complete
        // nested structure per issue.
        for issue in &mut issues {
            let Some(key) = issue.get("key").and_then(Value::as_str).map(String::from) else {
                continue;
            };
            match self.issue_comments(&key) {
                Ok(comments) => {
                    if let Some(obj) = issue.as_object_mut() {
                        obj.insert("comments".to_string(), Value::Array(comments));
                    }
                }
                Err(err) => {
                    debug!("could not fetch comments for {}: {:#}", key, err);
                }
            }
        }

        Ok(IssuePage {
            issues,
            next_cursor: data
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(String::from),
            total: data.get("total").and_then(Value::as_u64),
        })
    }
}
