use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client};
use tracing::debug;

use crate::error::TransportError;

const USER_AGENT: &str = "BlogAggregator/1.0 (Feed Fetcher)";

const MAX_REDIRECTS: usize = 5;

/// Retrieves raw feed documents.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

pub struct HttpFetcher {
    client: Client,
    max_document_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_document_bytes: u64) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            max_document_bytes,
        })
    }

    fn check_size(&self, size: u64) -> Result<(), TransportError> {
        if size > self.max_document_bytes {
            return Err(TransportError::TooLarge {
                size,
                max: self.max_document_bytes,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        debug!("Fetching {}", url);

        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            self.check_size(length)?;
        }

        // Content-Length may be absent (chunked), so enforce the limit as chunks arrive
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            self.check_size((body.len() + chunk.len()) as u64)?;
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}
