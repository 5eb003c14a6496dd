//! Jira REST client
//!
//! Only the two reads the executors need: a JQL search and a single issue
//! with its links, parent and subtasks. Jira Cloud is served from API v3,
//! Server and Data Center from v2.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, de::DeserializeOwned};
use tahecho_agent::{ErrorTag, ExecutorError};

use crate::config::JiraSettings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SEARCH_FIELDS: &str = "summary,status,assignee,issuetype,priority";
const LINK_FIELDS: &str = "summary,status,issuelinks,parent,subtasks";
pub const MAX_RESULTS: u32 = 20;

#[derive(Debug, Clone)]
pub struct JiraClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    api_token: String,
    cloud: bool,
}

impl JiraClient {
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        api_token: impl Into<String>,
        cloud: bool,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            username: username.into(),
            api_token: api_token.into(),
            cloud,
        }
    }

    /// `None` while any connection setting is missing
    pub fn from_settings(settings: &JiraSettings) -> Option<Self> {
        if !settings.missing().is_empty() {
            return None;
        }
        Some(Self::new(
            settings.instance_url.as_deref()?,
            settings.username.as_deref()?,
            settings.api_token.as_deref()?,
            settings.cloud.unwrap_or(true),
        ))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn flavor(&self) -> &'static str {
        if self.cloud { "Jira Cloud" } else { "Jira Server" }
    }

    fn api_path(&self, path: &str) -> String {
        let version = if self.cloud { 3 } else { 2 };
        format!("{}/rest/api/{}/{}", self.base_url, version, path)
    }

    /// Run a JQL search, returning at most `MAX_RESULTS` issues
    pub async fn search(&self, jql: &str) -> Result<Vec<Issue>, ExecutorError> {
        // Cloud retired the plain search resource in favour of search/jql
        let path = if self.cloud { "search/jql" } else { "search" };
        let max_results = MAX_RESULTS.to_string();
        let response: SearchResponse = self
            .get(
                path,
                &[
                    ("jql", jql),
                    ("fields", SEARCH_FIELDS),
                    ("maxResults", &max_results),
                ],
            )
            .await?;
        Ok(response.issues)
    }

    /// Fetch one issue with its links, parent and subtasks
    pub async fn issue(&self, key: &str) -> Result<Issue, ExecutorError> {
        self.get(&format!("issue/{}", key), &[("fields", LINK_FIELDS)])
            .await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ExecutorError> {
        let url = self.api_path(path);
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.api_token))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Jira returned {} for {}", status, url);
            return Err(status_error(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ExecutorError::untagged(format!("Unexpected response from Jira: {}", e)))
    }
}

fn request_error(e: reqwest::Error) -> ExecutorError {
    if e.is_timeout() || e.is_connect() {
        ExecutorError::new(ErrorTag::Connectivity, format!("Could not reach Jira: {}", e))
    } else {
        ExecutorError::untagged(format!("Jira request failed: {}", e))
    }
}

fn status_error(status: StatusCode, body: &str) -> ExecutorError {
    let messages = error_messages(body);
    let detail = if messages.is_empty() {
        format!("Jira returned {}", status)
    } else {
        format!("Jira returned {}: {}", status, messages.join("; "))
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ExecutorError::new(ErrorTag::DomainAuth, detail)
        }
        // Jira answers 400 for JQL naming a project or user that doesn't exist
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
            ExecutorError::new(ErrorTag::NotFound, detail)
        }
        _ => ExecutorError::untagged(detail),
    }
}

/// Messages from a Jira error body (`errorMessages` and `errors`)
fn error_messages(body: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return Vec::new();
    };

    let mut messages: Vec<String> = value["errorMessages"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|m| m.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if let Some(errors) = value["errors"].as_object() {
        messages.extend(
            errors
                .iter()
                .filter_map(|(field, m)| m.as_str().map(|m| format!("{}: {}", field, m))),
        );
    }
    messages
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<Issue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub key: String,
    #[serde(default)]
    pub fields: IssueFields,
}

impl Issue {
    pub fn summary(&self) -> &str {
        self.fields.summary.as_deref().unwrap_or("(no summary)")
    }

    pub fn status(&self) -> &str {
        self.fields
            .status
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or("unknown status")
    }

    pub fn assignee(&self) -> &str {
        self.fields
            .assignee
            .as_ref()
            .and_then(|p| {
                p.display_name
                    .as_deref()
                    .or(p.email_address.as_deref())
                    .or(p.name.as_deref())
            })
            .unwrap_or("Unassigned")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IssueFields {
    pub summary: Option<String>,
    pub status: Option<Named>,
    pub assignee: Option<Person>,
    pub priority: Option<Named>,
    #[serde(rename = "issuetype")]
    pub issue_type: Option<Named>,
    #[serde(rename = "issuelinks")]
    pub issue_links: Vec<IssueLink>,
    pub parent: Option<Box<Issue>>,
    pub subtasks: Vec<Issue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Named {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub display_name: Option<String>,
    pub email_address: Option<String>,
    /// Server/Data Center username
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueLink {
    #[serde(rename = "type")]
    pub link_type: LinkType,
    pub inward_issue: Option<Issue>,
    pub outward_issue: Option<Issue>,
}

impl IssueLink {
    /// How the other issue relates to this one, e.g. "blocks" or "is blocked by"
    pub fn describe(&self) -> Option<(&str, &Issue)> {
        match (&self.outward_issue, &self.inward_issue) {
            (Some(other), _) => Some((self.link_type.outward.as_str(), other)),
            (None, Some(other)) => Some((self.link_type.inward.as_str(), other)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkType {
    pub inward: String,
    pub outward: String,
}
