use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use sha2::{Digest, Sha256};
use slog::{debug, warn, Logger};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use uuid::Uuid;
use weather_ingest_core::{create_dir_all, file_age};

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("invalid request url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("error sending request to {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest_middleware::Error,
    },
    #[error("{url} responded with {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("error reading body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("error building http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Idempotent GET returning the response body; either eventually succeeds or errors
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_text(&self, url: &str, query: &[(String, String)])
        -> Result<String, TransportError>;
}

/// On-disk response cache keyed by the full request url
pub struct ResponseCache {
    dir: PathBuf,
    expire_after: Duration,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, expire_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            expire_after,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    /// Cached body for `key` if it was stored less than `expire_after` ago
    pub async fn get(&self, key: &str) -> Option<String> {
        let path = self.entry_path(key);
        let age = file_age(&path)?;
        if age >= self.expire_after {
            return None;
        }
        tokio::fs::read_to_string(&path).await.ok()
    }

    /// Written beside the entry and renamed into place so `get` never sees a partial body
    pub async fn put(&self, key: &str, body: &str) -> std::io::Result<()> {
        create_dir_all(&self.dir)?;
        let path = self.entry_path(key);
        let partial = path.with_extension(format!("{}.part", Uuid::now_v7()));
        tokio::fs::write(&partial, body).await?;
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        Ok(())
    }
}

pub struct HttpFetcher {
    logger: Logger,
    client: ClientWithMiddleware,
    cache: Option<ResponseCache>,
}

impl HttpFetcher {
    pub fn new(
        logger: Logger,
        user_agent: &str,
        max_retries: u32,
        cache: Option<ResponseCache>,
    ) -> Result<HttpFetcher, TransportError> {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(200), Duration::from_secs(30))
            .build_with_max_retries(max_retries);
        let client = ClientBuilder::new(Client::builder().user_agent(user_agent).build()?)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            logger,
            client,
            cache,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<String, TransportError> {
        let url = Url::parse_with_params(url, query).map_err(|e| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let key = url.to_string();

        if let Some(cache) = &self.cache {
            if let Some(body) = cache.get(&key).await {
                debug!(self.logger, "cache hit: {}", key);
                return Ok(body);
            }
        }

        debug!(self.logger, "requesting: {}", key);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: key.clone(),
                source,
            })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| TransportError::Body {
                url: key.clone(),
                source,
            })?;
        if !status.is_success() {
            return Err(TransportError::Status {
                url: key,
                status,
                body,
            });
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&key, &body).await {
                warn!(self.logger, "failed to cache response for {}: {}", key, e);
            }
        }
        Ok(body)
    }
}
