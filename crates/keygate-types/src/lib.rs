//! Shared types for Keygate
//!
//! This crate contains the data structures shared by the core engine,
//! the HTTP server, and the admin CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Resource Types
// ============================================================================

/// A file gated behind a secret URL key and a download limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResource {
    pub id: i64,
    pub title: String,
    pub secret_key: String,
    pub download_limit: u32,
    pub download_count: u32,
    pub active: bool,
    pub file_path: Option<PathBuf>,
    /// Filename presented to the client (falls back to the file path's name)
    #[serde(default)]
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadResource {
    /// Downloads left before the limit is reached
    pub fn remaining(&self) -> u32 {
        self.download_limit.saturating_sub(self.download_count)
    }

    pub fn is_exhausted(&self) -> bool {
        self.download_count >= self.download_limit
    }

    /// Name used in the Content-Disposition header
    pub fn display_file_name(&self) -> Option<String> {
        if let Some(name) = self.file_name.as_ref().filter(|n| !n.is_empty()) {
            return Some(name.clone());
        }
        self.file_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
    }

    /// Usage summary for status pages
    pub fn status(&self, unique_clients: usize) -> ResourceStatus {
        ResourceStatus {
            id: self.id,
            title: self.title.clone(),
            download_count: self.download_count,
            download_limit: self.download_limit,
            remaining: self.remaining(),
            unique_clients,
            active: self.active,
        }
    }
}

/// Options for creating/updating a resource
///
/// `None` leaves a field untouched on update. On create, `secret_key`
/// defaults to a freshly generated key and `download_limit` to 1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceOptions {
    pub title: Option<String>,
    pub secret_key: Option<String>,
    pub download_limit: Option<u32>,
    pub file_path: Option<PathBuf>,
    pub file_name: Option<String>,
    pub active: Option<bool>,
}

/// Usage counters for a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub id: i64,
    pub title: String,
    pub download_count: u32,
    pub download_limit: u32,
    pub remaining: u32,
    pub unique_clients: usize,
    pub active: bool,
}

impl ResourceStatus {
    /// Share of the limit already used, in percent
    pub fn used_percent(&self) -> f64 {
        if self.download_limit == 0 {
            return 100.0;
        }
        (self.download_count as f64 / self.download_limit as f64) * 100.0
    }
}

/// A client that already consumed a download of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedClient {
    pub client_id: String,
    pub consumed_at: DateTime<Utc>,
}

// ============================================================================
// Authorization Types
// ============================================================================

/// Why a download request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No active resource carries the requested key
    NotFound,
    /// The resource's download limit is used up
    LimitReached,
    /// This client already downloaded the resource
    AlreadyConsumed,
    /// The resource has no file, or the file is missing on disk
    NoFile,
}

impl DenyReason {
    /// Heading shown to the client
    pub fn title(&self) -> &'static str {
        match self {
            DenyReason::NotFound => "Invalid download key.",
            DenyReason::LimitReached => "Download Limit Reached",
            DenyReason::AlreadyConsumed => "Already Downloaded",
            DenyReason::NoFile => "File Not Found",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DenyReason::NotFound => "not_found",
            DenyReason::LimitReached => "limit_reached",
            DenyReason::AlreadyConsumed => "already_consumed",
            DenyReason::NoFile => "no_file",
        };
        f.write_str(s)
    }
}

/// A refused request, with whatever resource context was resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub reason: DenyReason,
    pub client_id: String,
    pub resource_title: Option<String>,
    pub download_limit: Option<u32>,
}

/// A recorded consumption: the caller may now stream the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Resource state after the consumption was recorded
    pub resource: DownloadResource,
    pub client_id: String,
    pub download_count: u32,
}

/// Outcome of an authorization attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "detail", rename_all = "snake_case")]
pub enum Decision {
    Allow(Grant),
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Allow(_) => None,
            Decision::Deny(denial) => Some(denial.reason),
        }
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// How resources are resolved from a key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupMode {
    /// Every active resource can be addressed by its own key
    #[default]
    Multi,
    /// Only `Settings::global_resource_id` is served
    Single,
}

/// HTTP status used for refusals other than an unknown key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyPolicy {
    /// 200 with an error page
    #[default]
    Page,
    /// 403 with the same error page
    Forbidden,
}

/// Service settings, persisted alongside the resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub bind_address: String,
    pub port: u16,
    #[serde(default)]
    pub mode: LookupMode,
    /// Resource served in single mode
    #[serde(default = "default_global_resource_id")]
    pub global_resource_id: i64,
    /// Allow each client only one download per resource
    #[serde(default = "default_track_clients")]
    pub track_clients: bool,
    #[serde(default)]
    pub deny_policy: DenyPolicy,
    /// Use the proxy-appended (rightmost) X-Forwarded-For entry as the client identity
    #[serde(default)]
    pub trust_forwarded_for: bool,
    /// Base URL used when printing download links
    #[serde(default)]
    pub public_base_url: Option<String>,
}

fn default_global_resource_id() -> i64 {
    1
}

fn default_track_clients() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8087,
            mode: LookupMode::Multi,
            global_resource_id: default_global_resource_id(),
            track_clients: default_track_clients(),
            deny_policy: DenyPolicy::Page,
            trust_forwarded_for: false,
            public_base_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> DownloadResource {
        let now = Utc::now();
        DownloadResource {
            id: 1,
            title: "Report".to_string(),
            secret_key: "abc".to_string(),
            download_limit: 3,
            download_count: 1,
            active: true,
            file_path: Some(PathBuf::from("/srv/files/report.pdf")),
            file_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn display_name_falls_back_to_path() {
        let mut r = resource();
        assert_eq!(r.display_file_name().as_deref(), Some("report.pdf"));

        r.file_name = Some("Annual Report.pdf".to_string());
        assert_eq!(r.display_file_name().as_deref(), Some("Annual Report.pdf"));

        r.file_name = None;
        r.file_path = None;
        assert_eq!(r.display_file_name(), None);
    }

    #[test]
    fn remaining_saturates() {
        let mut r = resource();
        assert_eq!(r.remaining(), 2);
        assert!(!r.is_exhausted());

        r.download_count = 5;
        assert_eq!(r.remaining(), 0);
        assert!(r.is_exhausted());
    }

    #[test]
    fn settings_fill_missing_fields() {
        let settings: Settings =
            serde_json::from_str(r#"{"bind_address":"0.0.0.0","port":9000}"#).unwrap();
        assert_eq!(settings.mode, LookupMode::Multi);
        assert_eq!(settings.global_resource_id, 1);
        assert!(settings.track_clients);
        assert_eq!(settings.deny_policy, DenyPolicy::Page);
    }
}
