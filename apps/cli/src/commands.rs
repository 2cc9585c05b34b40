//! CLI command implementations

use crate::output::{format_bytes, format_usage, print_output, KeyOutput, UrlOutput};
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, Result};
use console::style;
use dialoguer::Confirm;
use keygate_core::KeygateCore;
use keygate_types::{DownloadResource, ResourceOptions, ResourceStatus, Settings};
use serde_json::Value;
use std::path::PathBuf;

// ============================================================================
// Resource Commands
// ============================================================================

pub async fn create_resource(
    core: &KeygateCore,
    options: ResourceOptions,
    format: OutputFormat,
) -> Result<()> {
    let resource = core.create_resource(options).await?;
    let url = core.download_url(&resource).await;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&resource)?);
        }
        OutputFormat::Human | OutputFormat::Table => {
            println!(
                "{} Created resource: {} (#{})",
                style("✓").green().bold(),
                style(&resource.title).cyan(),
                resource.id
            );
            println!("  Limit: {}", resource.download_limit);
            println!("  URL: {}", url);
        }
    }

    Ok(())
}

pub async fn list_resources(core: &KeygateCore, show_all: bool, format: OutputFormat) -> Result<()> {
    let resources = core.list_resources().await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&resources)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct ResourceRow {
                id: i64,
                title: String,
                key: String,
                used: String,
                active: String,
                file: String,
            }

            let rows: Vec<ResourceRow> = resources
                .iter()
                .map(|r| ResourceRow {
                    id: r.id,
                    title: truncate(&r.title, 30),
                    key: truncate(&r.secret_key, 12),
                    used: format!("{}/{}", r.download_count, r.download_limit),
                    active: if r.active { "Yes" } else { "No" }.to_string(),
                    file: r.display_file_name().unwrap_or_else(|| "-".to_string()),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            if resources.is_empty() {
                println!("No resources");
                return Ok(());
            }

            for resource in &resources {
                print_resource_summary(resource);
                if show_all {
                    println!("    Key: {}", resource.secret_key);
                    println!("    URL: {}", core.download_url(resource).await);
                    if let Some(ref path) = resource.file_path {
                        println!("    File: {}", path.display());
                    }
                    println!();
                }
            }
        }
    }

    Ok(())
}

fn print_resource_summary(resource: &DownloadResource) {
    let status_icon = if !resource.active {
        style("○").dim()
    } else if resource.is_exhausted() {
        style("✗").red()
    } else {
        style("●").green()
    };

    println!(
        "{} #{} {} {}",
        status_icon,
        resource.id,
        style(&resource.title).bold(),
        style(format!(
            "[{}/{}]",
            resource.download_count, resource.download_limit
        ))
        .dim()
    );
}

pub async fn show_info(core: &KeygateCore, id: i64, format: OutputFormat) -> Result<()> {
    let resource = core.get_resource(id).await?;
    let status = core.resource_status(id).await?;
    let url = core.download_url(&resource).await;

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "resource": resource,
                "status": status,
                "url": url,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ => {
            print_resource_summary(&resource);
            println!("    Active: {}", if resource.active { "Yes" } else { "No" });
            print_status(&status);
            println!("    Key: {}", resource.secret_key);
            println!("    URL: {}", url);
            match resource.file_path {
                Some(ref path) => {
                    let size = tokio::fs::metadata(path)
                        .await
                        .ok()
                        .filter(|m| m.is_file())
                        .map(|m| format_bytes(m.len()));
                    match size {
                        Some(size) => println!("    File: {} ({})", path.display(), size),
                        None => println!(
                            "    File: {} {}",
                            path.display(),
                            style("(missing)").red()
                        ),
                    }
                }
                None => println!("    File: {}", style("none").yellow()),
            }
            if let Some(name) = resource.display_file_name() {
                println!("    Served as: {}", name);
            }
        }
    }

    Ok(())
}

fn print_status(status: &ResourceStatus) {
    println!("    Used: {}", format_usage(status));
    println!("    Remaining: {}", status.remaining);
    println!("    Unique clients: {}", status.unique_clients);
}

pub async fn update_resource(
    core: &KeygateCore,
    id: i64,
    title: Option<String>,
    file_name: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    if title.is_none() && file_name.is_none() {
        return Err(anyhow!("Nothing to update; pass --title or --file-name"));
    }

    let options = ResourceOptions {
        title,
        file_name,
        ..Default::default()
    };
    let resource = core.update_resource(id, options).await?;
    report_saved(&resource, "Resource updated", format)
}

pub async fn set_key(core: &KeygateCore, id: i64, key: &str, format: OutputFormat) -> Result<()> {
    let resource = core.set_secret_key(id, key).await?;
    print_key(core, &resource, format).await
}

pub async fn rotate_key(core: &KeygateCore, id: i64, format: OutputFormat) -> Result<()> {
    let resource = core.rotate_secret_key(id).await?;
    print_key(core, &resource, format).await
}

async fn print_key(core: &KeygateCore, resource: &DownloadResource, format: OutputFormat) -> Result<()> {
    let output = KeyOutput {
        id: resource.id,
        secret_key: resource.secret_key.clone(),
        url: core.download_url(resource).await,
    };
    if let OutputFormat::Human = format {
        println!("{} Secret key updated", style("✓").green().bold());
    }
    print_output(&output, format)
}

pub async fn set_limit(core: &KeygateCore, id: i64, limit: u32, format: OutputFormat) -> Result<()> {
    let resource = core.set_limit(id, limit).await?;
    report_saved(&resource, "Download limit updated", format)
}

pub async fn set_file(
    core: &KeygateCore,
    id: i64,
    path: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let detached = path.is_none();
    let resource = core.set_file_ref(id, path).await?;
    let message = if detached {
        "File detached"
    } else {
        "File attached"
    };
    report_saved(&resource, message, format)
}

pub async fn set_active(core: &KeygateCore, id: i64, active: bool, format: OutputFormat) -> Result<()> {
    let resource = core.set_active(id, active).await?;
    let message = if active {
        "Resource enabled"
    } else {
        "Resource disabled"
    };
    report_saved(&resource, message, format)
}

fn report_saved(resource: &DownloadResource, message: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(resource)?);
        }
        _ => {
            println!("{} {}", style("✓").green().bold(), message);
            print_resource_summary(resource);
        }
    }
    Ok(())
}

// ============================================================================
// Counter Commands
// ============================================================================

/// Reset the counter and/or the consumed clients; neither flag means both
pub async fn reset(
    core: &KeygateCore,
    id: i64,
    counter: bool,
    clients: bool,
    yes: bool,
    format: OutputFormat,
) -> Result<()> {
    let (counter, clients) = if !counter && !clients {
        (true, true)
    } else {
        (counter, clients)
    };
    let resource = core.get_resource(id).await?;

    if !yes {
        let what = match (counter, clients) {
            (true, true) => "the download counter and the downloaded-by list",
            (true, false) => "the download counter",
            _ => "the downloaded-by list",
        };
        let confirmed = Confirm::new()
            .with_prompt(format!("Reset {} of \"{}\"?", what, resource.title))
            .default(false)
            .interact()?;
        if !confirmed {
            return Ok(());
        }
    }

    if counter {
        core.reset_counter(id).await?;
    }
    if clients {
        core.reset_consumed_clients(id).await?;
    }

    let status = core.resource_status(id).await?;
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        _ => {
            if counter {
                println!(
                    "{} Download counter has been reset to 0",
                    style("✓").green().bold()
                );
            }
            if clients {
                println!(
                    "{} Downloaded-by list has been cleared",
                    style("✓").green().bold()
                );
            }
            print_status(&status);
        }
    }

    Ok(())
}

pub async fn list_clients(core: &KeygateCore, id: i64, format: OutputFormat) -> Result<()> {
    let clients = core.list_consumed_clients(id).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&clients)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct ClientRow {
                #[tabled(rename = "#")]
                index: usize,
                client: String,
                downloaded_at: String,
            }

            let rows: Vec<ClientRow> = clients
                .iter()
                .enumerate()
                .map(|(i, c)| ClientRow {
                    index: i + 1,
                    client: c.client_id.clone(),
                    downloaded_at: c.consumed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            if clients.is_empty() {
                println!("No downloads recorded yet");
            }
            for (i, client) in clients.iter().enumerate() {
                println!(
                    "{:>3}. {} {}",
                    i + 1,
                    client.client_id,
                    style(client.consumed_at.format("%Y-%m-%d %H:%M:%S")).dim()
                );
            }
        }
    }

    Ok(())
}

pub async fn show_url(core: &KeygateCore, id: i64, format: OutputFormat) -> Result<()> {
    let resource = core.get_resource(id).await?;
    let output = UrlOutput {
        id,
        url: core.download_url(&resource).await,
    };
    print_output(&output, format)
}

pub async fn delete_resource(core: &KeygateCore, id: i64, yes: bool, _format: OutputFormat) -> Result<()> {
    let resource = core.get_resource(id).await?;

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete \"{}\" and its download history?",
                resource.title
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            return Ok(());
        }
    }

    core.delete_resource(id).await?;
    println!("{} Resource deleted", style("✓").green().bold());
    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config_action(
    core: &KeygateCore,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let settings = core.get_settings().await;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&settings)?);
                }
                _ => {
                    println!("Keygate Configuration:");
                    println!();
                    println!(
                        "  Listen address: {}:{}",
                        settings.bind_address, settings.port
                    );
                    println!("  Lookup mode: {:?}", settings.mode);
                    println!("  Global resource id: {}", settings.global_resource_id);
                    println!("  One download per client: {}", settings.track_clients);
                    println!("  Deny policy: {:?}", settings.deny_policy);
                    println!("  Trust X-Forwarded-For: {}", settings.trust_forwarded_for);
                    println!(
                        "  Public base URL: {}",
                        settings.public_base_url.as_deref().unwrap_or("(bind address)")
                    );
                }
            }
        }

        Some(ConfigAction::Get { key }) => {
            let settings = core.get_settings().await;
            match setting_value(&settings, &key)? {
                Value::String(s) => println!("{}", s),
                Value::Null => println!(),
                other => println!("{}", other),
            }
        }

        Some(ConfigAction::Set { key, value }) => {
            let settings = apply_setting(&core.get_settings().await, &key, &value)?;
            core.update_settings(settings).await?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Reset { yes }) => {
            let confirmed = yes
                || Confirm::new()
                    .with_prompt("Reset all settings to defaults?")
                    .default(false)
                    .interact()?;

            if confirmed {
                core.update_settings(Settings::default()).await?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }
    }

    Ok(())
}

fn setting_value(settings: &Settings, key: &str) -> Result<Value> {
    let value = serde_json::to_value(settings)?;
    value
        .get(key)
        .cloned()
        .ok_or_else(|| anyhow!("Unknown config key: {}", key))
}

/// Settings with `key` replaced by `raw`
///
/// `raw` is read as JSON first (numbers, booleans, `null`), then as a plain
/// string, so `port 9000` and `mode single` both work.
fn apply_setting(settings: &Settings, key: &str, raw: &str) -> Result<Settings> {
    let mut value = serde_json::to_value(settings)?;
    let fields = value
        .as_object_mut()
        .ok_or_else(|| anyhow!("Settings are not an object"))?;
    if !fields.contains_key(key) {
        return Err(anyhow!("Unknown config key: {}", key));
    }

    let candidates = match serde_json::from_str::<Value>(raw) {
        Ok(parsed) if !parsed.is_string() => vec![parsed, Value::String(raw.to_string())],
        _ => vec![Value::String(raw.to_string())],
    };

    let mut last_error = None;
    for candidate in candidates {
        fields.insert(key.to_string(), candidate);
        match serde_json::from_value::<Settings>(Value::Object(fields.clone())) {
            Ok(updated) => return Ok(updated),
            Err(e) => last_error = Some(e),
        }
    }

    Err(anyhow!(
        "Invalid value {:?} for {}: {}",
        raw,
        key,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_types::{DenyPolicy, LookupMode};

    #[test]
    fn config_set_parses_typed_values() {
        let settings = Settings::default();

        let updated = apply_setting(&settings, "port", "9000").unwrap();
        assert_eq!(updated.port, 9000);

        let updated = apply_setting(&settings, "mode", "single").unwrap();
        assert_eq!(updated.mode, LookupMode::Single);

        let updated = apply_setting(&settings, "deny_policy", "forbidden").unwrap();
        assert_eq!(updated.deny_policy, DenyPolicy::Forbidden);

        let updated = apply_setting(&settings, "track_clients", "false").unwrap();
        assert!(!updated.track_clients);

        let updated = apply_setting(&settings, "bind_address", "0.0.0.0").unwrap();
        assert_eq!(updated.bind_address, "0.0.0.0");
    }

    #[test]
    fn config_set_optional_url() {
        let settings = Settings::default();

        let updated =
            apply_setting(&settings, "public_base_url", "https://files.example.com").unwrap();
        assert_eq!(
            updated.public_base_url.as_deref(),
            Some("https://files.example.com")
        );

        let cleared = apply_setting(&updated, "public_base_url", "null").unwrap();
        assert_eq!(cleared.public_base_url, None);
    }

    #[test]
    fn config_rejects_unknown_keys_and_bad_values() {
        let settings = Settings::default();
        assert!(apply_setting(&settings, "theme", "dark").is_err());
        assert!(apply_setting(&settings, "port", "not-a-port").is_err());
        assert!(apply_setting(&settings, "port", "70000").is_err());
        assert!(apply_setting(&settings, "mode", "sometimes").is_err());
        assert!(setting_value(&settings, "theme").is_err());
    }

    #[test]
    fn config_get_reads_current_values() {
        let settings = Settings::default();
        assert_eq!(setting_value(&settings, "port").unwrap(), Value::from(8087));
        assert_eq!(
            setting_value(&settings, "mode").unwrap(),
            Value::String("multi".to_string())
        );
    }

    #[test]
    fn truncate_long_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long title indeed", 10), "a very ...");
    }
}
