//! Overpass API client
//!
//! Sends Overpass QL over HTTP POST (form field `data`) with a blocking
//! reqwest client and parses the OSM XML answer.

use std::time::Duration;

use tracing::debug;

use super::{RemoteSource, Scope};
use crate::config::Config;
use crate::error::RemoteError;
use crate::feed::{parse_osm_xml, FeedDocument};
use crate::models::ElementKind;

const USER_AGENT: &str = concat!("osmcache/", env!("CARGO_PKG_VERSION"));

/// Overpass QL pulling the children of the current set into it
pub(crate) const RECURSE_DOWN: &str = "(._;>;);";

/// Overpass QL for one element
pub fn element_query(kind: ElementKind, id: i64, recurse: bool, timeout_secs: u64) -> String {
    format!(
        "[out:xml][timeout:{}];{}({});{}out meta;",
        timeout_secs,
        kind,
        id,
        if recurse { RECURSE_DOWN } else { "" }
    )
}

/// Blocking client for one Overpass endpoint
pub struct OverpassClient {
    endpoint: String,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl OverpassClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            timeout,
            client,
        })
    }

    /// Client for the configured endpoint and timeout
    pub fn from_config(config: &Config) -> Result<Self, RemoteError> {
        Self::new(config.overpass_endpoint(), config.fetch_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs().max(1)
    }

    fn run(&self, ql: &str) -> Result<FeedDocument, RemoteError> {
        debug!("Overpass query to {}: {}", self.endpoint, ql);

        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("data", ql)])
            .send()
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                code: status.as_u16(),
            });
        }

        let body = response.text().map_err(|e| self.classify(e))?;
        parse_response(&body)
    }

    fn classify(&self, error: reqwest::Error) -> RemoteError {
        if error.is_timeout() {
            RemoteError::Timeout {
                after: self.timeout,
            }
        } else {
            RemoteError::Unavailable(error.to_string())
        }
    }
}

/// Parse an Overpass answer, turning runtime errors into failures
fn parse_response(body: &str) -> Result<FeedDocument, RemoteError> {
    let doc = parse_osm_xml(body).map_err(|e| RemoteError::Malformed(e.to_string()))?;

    // Overpass reports query failures in a <remark> with HTTP 200
    if let Some(remark) = &doc.remark {
        if remark.contains("error") {
            return Err(RemoteError::Malformed(remark.clone()));
        }
    }
    Ok(doc)
}

impl RemoteSource for OverpassClient {
    fn fetch_element(
        &self,
        kind: ElementKind,
        id: i64,
        recurse: bool,
    ) -> Result<FeedDocument, RemoteError> {
        self.run(&element_query(kind, id, recurse, self.timeout_secs()))
    }

    fn fetch_scoped(&self, scope: &Scope) -> Result<FeedDocument, RemoteError> {
        self.run(&scope.to_overpass_ql(self.timeout_secs()))
    }
}
