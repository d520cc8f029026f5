use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::cli::RedcapArgs;
use crate::config::{self, Config};
use crate::model::Record;

const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Field, form and event selection for a record export.
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub fields: Vec<String>,
    pub forms: Vec<String>,
    pub events: Vec<String>,
}

impl ExportRequest {
    pub fn fields<S: AsRef<str>>(fields: &[S]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_forms<S: AsRef<str>>(mut self, forms: &[S]) -> Self {
        self.forms = forms.iter().map(|f| f.as_ref().to_string()).collect();
        self
    }

    pub fn with_events<S: AsRef<str>>(mut self, events: &[S]) -> Self {
        self.events = events.iter().map(|e| e.as_ref().to_string()).collect();
        self
    }

    fn form_params(&self, token: &str) -> Vec<(String, String)> {
        let mut params = vec![
            ("token".to_string(), token.to_string()),
            ("content".to_string(), "record".to_string()),
            ("format".to_string(), "json".to_string()),
            ("type".to_string(), "flat".to_string()),
        ];
        push_indexed(&mut params, "fields", &self.fields);
        push_indexed(&mut params, "forms", &self.forms);
        push_indexed(&mut params, "events", &self.events);
        params
    }
}

fn push_indexed(params: &mut Vec<(String, String)>, name: &str, values: &[String]) {
    for (index, value) in values.iter().enumerate() {
        params.push((format!("{name}[{index}]"), value.clone()));
    }
}

#[derive(Debug, Deserialize)]
struct ImportResponse {
    count: usize,
}

/// Blocking client for the REDCap record API.
pub struct RedcapClient {
    http: Client,
    api_url: String,
    token: String,
}

impl RedcapClient {
    pub fn new(api_url: &str, token: &str, verify_ssl: bool) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .context("failed to build REDCap HTTP client")?;

        Ok(Self {
            http,
            api_url: api_url.to_string(),
            token: token.to_string(),
        })
    }

    pub fn from_args(args: &RedcapArgs, config: &Config) -> Result<Self> {
        let api_url = config::require(
            args.redcap_url.as_deref(),
            config.redcap.api_url.as_deref(),
            "redcap.api_url",
        )?;
        let token = config::require(
            args.redcap_token.as_deref(),
            config.redcap.token.as_deref(),
            "redcap.token",
        )?;
        Self::new(&api_url, &token, config.redcap.verify_ssl)
    }

    pub fn export_records(&self, request: &ExportRequest) -> Result<Vec<Record>> {
        debug!(
            fields = request.fields.len(),
            forms = ?request.forms,
            events = ?request.events,
            "exporting REDCap records"
        );

        let response = self
            .http
            .post(&self.api_url)
            .form(&request.form_params(&self.token))
            .send()
            .context("REDCap export request failed")?;

        let status = response.status();
        let body = response.text().context("failed to read REDCap export body")?;
        if !status.is_success() {
            bail!("REDCap export returned {}: {}", status, body.trim());
        }

        parse_export(&body)
    }

    /// Imports flat records and returns the number REDCap reports as written.
    pub fn import_records(&self, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let data = serde_json::to_string(records).context("failed to serialize import data")?;
        let params = [
            ("token", self.token.as_str()),
            ("content", "record"),
            ("format", "json"),
            ("type", "flat"),
            ("overwriteBehavior", "normal"),
            ("returnContent", "count"),
            ("data", data.as_str()),
        ];

        let response = self
            .http
            .post(&self.api_url)
            .form(&params)
            .send()
            .context("REDCap import request failed")?;

        let status = response.status();
        let body = response.text().context("failed to read REDCap import body")?;
        if !status.is_success() {
            bail!("REDCap import returned {}: {}", status, body.trim());
        }

        let parsed: ImportResponse = serde_json::from_str(&body)
            .with_context(|| format!("unexpected REDCap import response: {}", body.trim()))?;
        Ok(parsed.count)
    }
}

pub fn parse_export(body: &str) -> Result<Vec<Record>> {
    let rows: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_str(body).context("failed to parse REDCap export json")?;
    Ok(rows.into_iter().map(Record::from_json).collect())
}
