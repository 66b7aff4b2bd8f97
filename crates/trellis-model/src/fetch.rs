//! Import document fetching.

use crate::error::{ModelError, Result};
use serde_json::Value;

/// Fetch a raw model document from a `file://`, `http://` or
/// `https://` reference.
pub async fn fetch_reference(client: &reqwest::Client, name: &str, url: &str) -> Result<Value> {
    if let Some(path) = url.strip_prefix("file://") {
        let text = tokio::fs::read_to_string(path).await.map_err(|err| {
            ModelError::ImportFetch {
                name: name.to_string(),
                reason: err.to_string(),
            }
        })?;
        return serde_json::from_str(&text).map_err(|err| ModelError::ImportFetch {
            name: name.to_string(),
            reason: err.to_string(),
        });
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        let response = client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| ModelError::ImportFetch {
                name: name.to_string(),
                reason: err.to_string(),
            })?;
        return response.json().await.map_err(|err| ModelError::ImportFetch {
            name: name.to_string(),
            reason: err.to_string(),
        });
    }

    Err(ModelError::BadImportReference {
        name: name.to_string(),
        url: url.to_string(),
    })
}
