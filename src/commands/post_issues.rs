use std::collections::BTreeSet;
use std::fs;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::cli::PostIssuesArgs;
use crate::config::{self, Config};
use crate::github::{GithubRepo, IssueTracker};
use crate::util::sha1_hex;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilingSummary {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
}

pub fn run(args: PostIssuesArgs, config: &Config) -> Result<()> {
    let token = config::require(
        args.github_token.as_deref(),
        config.github.token.as_deref(),
        "github.token",
    )?;
    let body = fs::read_to_string(&args.body)
        .with_context(|| format!("failed to read issue body {}", args.body.display()))?;
    let repo = GithubRepo::new(&config.github.api_url, &token, &args.org, &args.repo)?;

    let summary = create_issues(&repo, &args.title, &body)?;
    info!(
        repo = %format!("{}/{}", args.org, args.repo),
        created = summary.created.len(),
        skipped = summary.skipped.len(),
        "filed issues"
    );
    Ok(())
}

/// Text between the first `(` and the first `)` of the title.
pub fn issue_label(title: &str) -> Option<&str> {
    let start = title.find('(')? + 1;
    let end = title.find(')')?;
    let label = title.get(start..end)?.trim();
    (!label.is_empty()).then_some(label)
}

/// Title text before the ` (` that introduces the label.
pub fn subject_base(title: &str) -> Option<&str> {
    title.find(" (").map(|end| &title[..end])
}

/// A captured traceback is one issue; anything else is one issue per
/// non-blank line.
pub fn split_issues(body: &str) -> Vec<&str> {
    if body.contains("Traceback") {
        return vec![body];
    }
    body.split_inclusive('\n')
        .filter(|line| !line.trim().is_empty())
        .collect()
}

/// `<base>: <first six hex digits of the SHA-256 of the text>`
pub fn issue_title(base: &str, text: &str) -> String {
    let digest = sha1_hex(text);
    format!("{base}: {}", &digest[..6])
}

pub fn create_issues(
    tracker: &dyn IssueTracker,
    title: &str,
    body: &str,
) -> Result<FilingSummary> {
    let Some(label) = issue_label(title) else {
        bail!(
            "a label embedded in parentheses is required, e.g. 'Title of Error (title_tag)'; got '{title}'"
        );
    };
    if !tracker.label_exists(label)? {
        bail!("the label '{label}' does not exist on GitHub");
    }
    let Some(base) = subject_base(title) else {
        bail!("title '{title}' must separate the label with ' ('");
    };
    let labels = vec![label.to_string()];

    let mut open: BTreeSet<String> = tracker.open_issue_titles()?.into_iter().collect();
    let mut summary = FilingSummary::default();

    for text in split_issues(body) {
        let subject = issue_title(base, text);
        if open.contains(&subject) {
            debug!(subject = %subject, "issue already open");
            summary.skipped.push(subject);
            continue;
        }

        let url = tracker.create_issue(&subject, text, &labels)?;
        debug!(subject = %subject, url = %url, "created issue");
        open.insert(subject.clone());
        summary.created.push(subject);
    }

    Ok(summary)
}
