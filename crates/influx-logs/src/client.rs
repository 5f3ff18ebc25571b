// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

use crate::batch::Batch;
use crate::errors::{CreationError, WriteError};

const DEFAULT_USER_AGENT: &str = concat!("influx-logs/", env!("CARGO_PKG_VERSION"));

/// Destination of flushed batches.
///
/// The worker calls `write` with the batch it currently owns. A failed write
/// leaves the batch with the worker, so implementations must not assume a
/// batch is only ever written once.
#[async_trait]
pub trait SinkClient: Send + Sync {
    async fn write(&self, batch: &Batch) -> Result<(), WriteError>;
}

#[derive(Clone, Debug, Default)]
pub struct HttpConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

/// InfluxDB 1.x HTTP write API client.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    write_url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self, CreationError> {
        let url = Url::parse(&config.url).map_err(|e| CreationError::InvalidUrl {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CreationError::UnsupportedScheme(url.scheme().to_string()));
        }

        let mut write_url = url.clone();
        write_url
            .path_segments_mut()
            .map_err(|()| CreationError::InvalidUrl {
                url: config.url.clone(),
                reason: "url cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .push("write");

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(
                config
                    .user_agent
                    .clone()
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            );
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| CreationError::Client(e.to_string()))?;

        Ok(Self {
            client,
            write_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    #[must_use]
    pub fn write_url(&self) -> &Url {
        &self.write_url
    }
}

#[async_trait]
impl SinkClient for HttpClient {
    async fn write(&self, batch: &Batch) -> Result<(), WriteError> {
        let body = batch.to_line_protocol()?;

        let mut query = vec![
            ("db", batch.database()),
            ("precision", batch.precision().as_str()),
        ];
        if let Some(rp) = batch.retention_policy() {
            query.push(("rp", rp));
        }

        let mut request = self.client.post(self.write_url.clone()).query(&query);
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_ref());
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| WriteError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("INFLUX | Wrote {} points with status {}", batch.len(), status);
            return Ok(());
        }

        Err(WriteError::Server {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}
