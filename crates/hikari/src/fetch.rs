use bytes::Bytes;
use url::Url;

use crate::{
    error::{HikariError, HikariResult},
    util::http::HttpClient,
};

/// Fetch a remote resource into memory, treating any non-success status as
/// an error.
pub async fn fetch_bytes(client: &HttpClient, url: &Url) -> HikariResult<Bytes> {
    let response = client.get(url.clone()).send().await?;

    let status = response.status();
    if !status.is_success() {
        if let Ok(body) = response.text().await {
            tracing::warn!("Error body: {body}");
        }
        return Err(HikariError::HttpError(status));
    }

    Ok(response.bytes().await?)
}
