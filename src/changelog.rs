// src/changelog.rs

//! Serves a Keep a Changelog markdown file as JSON.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Body of the changelog endpoint when no changelog was loaded.
pub const NO_CHANGELOG_MESSAGE: &str = "No changelog can be found. Please contact support.";

/// Version given to the `[Unreleased]` section.
pub const UNRELEASED: &str = "unreleased";

/// One release section of the changelog.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Release {
    pub version: String,
    pub release_date: Option<String>,
    /// Entries per category (`added`, `fixed`, ...), lowercased.
    #[serde(flatten)]
    pub changes: BTreeMap<String, Vec<String>>,
}

/// Releases in document order, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Changelog {
    releases: Vec<Release>,
}

impl Changelog {
    pub fn from_markdown(markdown: &str) -> Self {
        let mut releases: Vec<Release> = Vec::new();
        let mut category: Option<String> = None;

        for line in markdown.lines() {
            let trimmed = line.trim();

            if let Some(heading) = trimmed.strip_prefix("## ") {
                releases.push(parse_release_heading(heading));
                category = None;
                continue;
            }

            let Some(release) = releases.last_mut() else {
                continue;
            };

            if let Some(heading) = trimmed.strip_prefix("### ") {
                let name = heading.trim().to_lowercase();
                release.changes.entry(name.clone()).or_default();
                category = Some(name);
                continue;
            }

            let Some(entries) = category
                .as_ref()
                .and_then(|name| release.changes.get_mut(name))
            else {
                continue;
            };

            if let Some(item) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
                entries.push(item.trim().to_string());
            } else if !trimmed.is_empty() && line.starts_with(char::is_whitespace) {
                // Wrapped bullet.
                if let Some(last) = entries.last_mut() {
                    last.push(' ');
                    last.push_str(trimmed);
                }
            }
        }

        debug!(releases = releases.len(), "Changelog parsed");
        Self { releases }
    }

    /// Reads and parses a changelog file.
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let markdown = std::fs::read_to_string(path)?;
        Ok(Self::from_markdown(&markdown))
    }

    /// Like [`Changelog::from_file`], logging instead of failing. The result
    /// is the state expected by [`changelog_handler`].
    pub fn load(path: impl AsRef<Path>) -> Option<Arc<Self>> {
        let path = path.as_ref();
        match Self::from_file(path) {
            Ok(changelog) => Some(Arc::new(changelog)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Changelog cannot be loaded");
                None
            }
        }
    }

    pub fn releases(&self) -> &[Release] {
        &self.releases
    }
}

/// Parses `[1.2.0] - 2024-03-01`, `1.2.0 - 2024-03-01` or `[Unreleased]`.
fn parse_release_heading(heading: &str) -> Release {
    let (name, date) = match heading.split_once(" - ") {
        Some((name, date)) => (name, date.split_whitespace().next()),
        None => (heading, None),
    };
    let name = name.trim().trim_start_matches('[').trim_end_matches(']').trim();

    if name.eq_ignore_ascii_case(UNRELEASED) {
        return Release {
            version: UNRELEASED.to_string(),
            ..Release::default()
        };
    }
    Release {
        version: name.to_string(),
        release_date: date.map(str::to_string),
        changes: BTreeMap::new(),
    }
}

/// Serves the changelog, e.g.
/// `.route("/changelog", get(changelog_handler)).with_state(Changelog::load("CHANGELOG.md"))`.
pub async fn changelog_handler(State(changelog): State<Option<Arc<Changelog>>>) -> Response {
    match changelog {
        Some(changelog) => Json(changelog.as_ref()).into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, NO_CHANGELOG_MESSAGE).into_response(),
    }
}
