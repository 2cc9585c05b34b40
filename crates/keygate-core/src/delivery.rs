//! File resolution for granted downloads

use crate::error::KeygateError;
use keygate_types::Grant;
use tokio::fs::File;
use tracing::warn;

/// Fallback when neither a display name nor a path name is available
const DEFAULT_FILE_NAME: &str = "download";

/// An opened file ready to be streamed as an attachment
#[derive(Debug)]
pub struct DeliveryFile {
    pub file: File,
    pub file_name: String,
    pub len: u64,
}

impl DeliveryFile {
    pub fn content_disposition(&self) -> String {
        content_disposition(&self.file_name)
    }
}

/// Open the file behind a grant
///
/// The file may have disappeared since authorization; that is reported as
/// [`KeygateError::DeliveryFailure`] and the recorded consumption stays.
pub async fn open_delivery(grant: &Grant) -> Result<DeliveryFile, KeygateError> {
    let resource = &grant.resource;
    let path = resource.file_path.as_ref().ok_or_else(|| {
        KeygateError::DeliveryFailure(format!("resource {} has no file", resource.id))
    })?;

    let file = File::open(path).await.map_err(|e| {
        warn!(
            resource_id = resource.id,
            path = %path.display(),
            "File vanished after the download was granted: {}",
            e
        );
        KeygateError::DeliveryFailure(format!("{}: {}", path.display(), e))
    })?;

    let metadata = file.metadata().await.map_err(|e| {
        KeygateError::DeliveryFailure(format!("{}: {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(KeygateError::DeliveryFailure(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    Ok(DeliveryFile {
        file,
        file_name: resource
            .display_file_name()
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
        len: metadata.len(),
    })
}

/// `attachment; filename="..."`, plus `filename*` when the name is not plain ASCII
pub fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    if fallback == file_name {
        format!("attachment; filename=\"{}\"", fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(file_name)
        )
    }
}
