//! HTTP collaborators the fetchers and normalizer talk to. Each one hides a
//! concrete upstream behind a small trait so tests can swap in fakes.

pub mod listing_page;
pub mod page_reader;
pub mod timeline_api;

use crate::retry::{parse_retry_after, FetchError};

/// GET a document body with rate-limit and status mapping shared by the
/// feed and listing fetchers.
pub async fn fetch_document(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let resp = client.get(url).send().await.map_err(FetchError::from)?;
    let status = resp.status();
    if status.as_u16() == 429 {
        return Err(FetchError::RateLimited {
            retry_after: parse_retry_after(resp.headers()),
        });
    }
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    resp.text().await.map_err(FetchError::from)
}

/// Client with the UA and timeouts every collaborator uses unless it needs
/// its own budget.
pub fn default_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("newswire-relay/0.1")
        .connect_timeout(std::time::Duration::from_secs(4))
        .timeout(std::time::Duration::from_secs(15))
        .build()
        .expect("reqwest client")
}
