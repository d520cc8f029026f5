use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::{StatusCode, Url};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;

const PAGE_SIZE: usize = 100;

/// The issue operations needed to file deduplicated error reports.
pub trait IssueTracker {
    fn label_exists(&self, name: &str) -> Result<bool>;

    /// Titles of every currently open issue.
    fn open_issue_titles(&self) -> Result<Vec<String>>;

    /// Creates an issue and returns its URL.
    fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct IssueSummary {
    title: String,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    html_url: String,
}

#[derive(Debug, Serialize)]
struct NewIssue<'a> {
    title: &'a str,
    body: &'a str,
    labels: &'a [String],
}

/// One repository on the GitHub REST API.
pub struct GithubRepo {
    http: Client,
    api_url: String,
    owner: String,
    repo: String,
}

impl GithubRepo {
    pub fn new(api_url: &str, token: &str, owner: &str, repo: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("ncanda-datacore"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("GitHub token contains invalid header characters")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build GitHub HTTP client")?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_url, self.owner, self.repo, suffix
        )
    }

    /// Label names are free text, so they go in as one escaped path segment.
    fn label_url(&self, name: &str) -> Result<Url> {
        let base = self.repo_url("labels");
        let mut url = Url::parse(&base).with_context(|| format!("invalid GitHub URL: {base}"))?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("GitHub URL cannot take path segments: {base}"))?
            .push(name);
        Ok(url)
    }
}

impl IssueTracker for GithubRepo {
    fn label_exists(&self, name: &str) -> Result<bool> {
        let url = self.label_url(name)?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .with_context(|| format!("GitHub request failed: {url}"))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => bail!("GitHub returned {status} for {url}"),
        }
    }

    fn open_issue_titles(&self) -> Result<Vec<String>> {
        let mut titles = Vec::new();
        let mut page = 1;

        loop {
            let url = self.repo_url(&format!(
                "issues?state=open&per_page={PAGE_SIZE}&page={page}"
            ));
            let response = self
                .http
                .get(&url)
                .send()
                .with_context(|| format!("GitHub request failed: {url}"))?;
            let status = response.status();
            if !status.is_success() {
                bail!("GitHub returned {status} for {url}");
            }

            let issues: Vec<IssueSummary> = response
                .json()
                .with_context(|| format!("failed to parse issue page {page}"))?;
            let count = issues.len();
            titles.extend(
                issues
                    .into_iter()
                    .filter(|issue| issue.pull_request.is_none())
                    .map(|issue| issue.title),
            );

            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        debug!(open = titles.len(), "loaded open issue titles");
        Ok(titles)
    }

    fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<String> {
        let url = self.repo_url("issues");
        let response = self
            .http
            .post(&url)
            .json(&NewIssue {
                title,
                body,
                labels,
            })
            .send()
            .with_context(|| format!("GitHub request failed: {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            bail!("GitHub refused issue '{title}' ({status}): {}", text.trim());
        }

        let created: CreatedIssue = response
            .json()
            .context("failed to parse created issue")?;
        Ok(created.html_url)
    }
}
