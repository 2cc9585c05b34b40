//! Output formatting utilities

use crate::OutputFormat;
use keygate_types::ResourceStatus;
use serde::Serialize;
use std::fmt;

/// Print output in the specified format
pub fn print_output<T: Serialize + fmt::Display>(
    value: &T,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Human | OutputFormat::Table => {
            println!("{}", value);
        }
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// "used / limit" with the share of the limit already used
pub fn format_usage(status: &ResourceStatus) -> String {
    format!(
        "{} / {} ({:.0}%)",
        status.download_count,
        status.download_limit,
        status.used_percent()
    )
}

/// Download URL of a single resource
#[derive(Debug, Serialize)]
pub struct UrlOutput {
    pub id: i64,
    pub url: String,
}

impl fmt::Display for UrlOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// A freshly generated secret key
#[derive(Debug, Serialize)]
pub struct KeyOutput {
    pub id: i64,
    pub secret_key: String,
    pub url: String,
}

impl fmt::Display for KeyOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Secret key: {}", self.secret_key)?;
        write!(f, "Download URL: {}", self.url)
    }
}
