use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::cli::XnatArgs;
use crate::config::{self, Config};

const REQUEST_TIMEOUT_SECS: u64 = 600;

/// A file attached to an experiment resource, addressed as
/// `<experiment-id>/<resource-id>/<filename>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocation {
    pub experiment_id: String,
    pub resource_id: String,
    pub file_name: String,
}

impl FromStr for ResourceLocation {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split('/').collect();
        match parts.as_slice() {
            [experiment_id, resource_id, file_name]
                if !experiment_id.is_empty() && !resource_id.is_empty() && !file_name.is_empty() =>
            {
                Ok(Self {
                    experiment_id: experiment_id.to_string(),
                    resource_id: resource_id.to_string(),
                    file_name: file_name.to_string(),
                })
            }
            _ => bail!("expected <experiment-id>/<resource-id>/<filename>, got '{value}'"),
        }
    }
}

impl fmt::Display for ResourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.experiment_id, self.resource_id, self.file_name
        )
    }
}

/// Where experiment resource files come from.
pub trait ResourceSource {
    /// Copies one resource file to `dest` and returns the written path.
    fn copy_file(&self, location: &ResourceLocation, dest: &Path) -> Result<PathBuf>;

    /// Lists every file of every resource attached to an experiment.
    fn list_files(&self, experiment_id: &str) -> Result<Vec<ResourceLocation>>;
}

/// Custom fields on MR session experiments.
pub trait SessionFields {
    fn set_session_field(
        &self,
        project: &str,
        subject_id: &str,
        experiment_id: &str,
        name: &str,
        value: &str,
    ) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ResultSetEnvelope<T> {
    #[serde(rename = "ResultSet")]
    result_set: ResultSet<T>,
}

#[derive(Debug, Deserialize)]
struct ResultSet<T> {
    #[serde(rename = "Result")]
    result: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ResourceEntry {
    xnat_abstractresource_id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    #[serde(rename = "URI")]
    uri: String,
}

pub struct XnatClient {
    http: Client,
    server: String,
    user: String,
    password: String,
}

impl XnatClient {
    pub fn new(server: &str, user: &str, password: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build XNAT HTTP client")?;

        Ok(Self {
            http,
            server: server.trim_end_matches('/').to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn from_args(args: &XnatArgs, config: &Config) -> Result<Self> {
        let server = config::require(
            args.xnat_server.as_deref(),
            config.xnat.server.as_deref(),
            "xnat.server",
        )?;
        let user = config::require(
            args.xnat_user.as_deref(),
            config.xnat.user.as_deref(),
            "xnat.user",
        )?;
        let password = config::require(
            args.xnat_password.as_deref(),
            config.xnat.password.as_deref(),
            "xnat.password",
        )?;
        Self::new(&server, &user, &password)
    }

    fn get(&self, path: &str) -> Result<reqwest::blocking::Response> {
        let url = format!("{}{}", self.server, path);
        debug!(url = %url, "XNAT request");
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .with_context(|| format!("XNAT request failed: {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("XNAT returned {status} for {url}");
        }
        Ok(response)
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<Vec<T>> {
        let envelope: ResultSetEnvelope<T> = self
            .get(path)?
            .json()
            .with_context(|| format!("failed to parse XNAT listing for {path}"))?;
        Ok(envelope.result_set.result)
    }
}

impl SessionFields for XnatClient {
    fn set_session_field(
        &self,
        project: &str,
        subject_id: &str,
        experiment_id: &str,
        name: &str,
        value: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/data/projects/{project}/subjects/{subject_id}/experiments/{experiment_id}",
            self.server
        );
        let field = format!("xnat:mrSessionData/fields/field[name={name}]/field");
        debug!(url = %url, field = name, value, "XNAT update");
        let response = self
            .http
            .put(&url)
            .query(&[("xsiType", "xnat:mrSessionData"), (field.as_str(), value)])
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .with_context(|| format!("XNAT request failed: {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("XNAT returned {status} setting {name} on {experiment_id}");
        }
        Ok(())
    }
}

impl ResourceSource for XnatClient {
    fn copy_file(&self, location: &ResourceLocation, dest: &Path) -> Result<PathBuf> {
        let path = format!(
            "/data/experiments/{}/resources/{}/files/{}",
            location.experiment_id, location.resource_id, location.file_name
        );
        let mut response = self.get(&path)?;

        let mut file = File::create(dest)
            .with_context(|| format!("failed to create {}", dest.display()))?;
        io::copy(&mut response, &mut file)
            .with_context(|| format!("failed to download {location} to {}", dest.display()))?;

        Ok(dest.to_path_buf())
    }

    fn list_files(&self, experiment_id: &str) -> Result<Vec<ResourceLocation>> {
        let resources: Vec<ResourceEntry> =
            self.get_json(&format!("/data/experiments/{experiment_id}/resources?format=json"))?;

        let mut files = Vec::new();
        for resource in resources {
            let resource_id = match resource.xnat_abstractresource_id {
                serde_json::Value::String(id) => id,
                other => other.to_string(),
            };
            let entries: Vec<FileEntry> = self.get_json(&format!(
                "/data/experiments/{experiment_id}/resources/{resource_id}/files?format=json"
            ))?;

            for entry in entries {
                files.push(ResourceLocation {
                    experiment_id: experiment_id.to_string(),
                    resource_id: resource_id.clone(),
                    file_name: file_path_from_uri(&entry.uri).to_string(),
                });
            }
        }

        Ok(files)
    }
}

/// Strips everything up to and including `/files/` from a file URI, keeping
/// any subdirectory inside the resource.
pub fn file_path_from_uri(uri: &str) -> &str {
    match uri.rfind("/files/") {
        Some(index) => &uri[index + "/files/".len()..],
        None => uri,
    }
}
