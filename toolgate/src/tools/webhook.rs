// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use super::Tool;
use crate::config::WebhookToolConfig;

/// A tool backed by an HTTP endpoint.
///
/// The argument map is POSTed as a JSON object; the response body is the
/// tool's text. Non-2xx statuses and transport failures are execution
/// errors.
pub struct WebhookTool {
    client: reqwest::Client,
    url: String,
    timeout: Option<Duration>,
}

impl WebhookTool {
    pub fn new(client: reqwest::Client, config: &WebhookToolConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            timeout: config.timeout_ms.map(Duration::from_millis),
        }
    }
}

#[async_trait]
impl Tool for WebhookTool {
    async fn call(&self, args: &BTreeMap<String, String>) -> Result<String, String> {
        let mut req = self.client.post(&self.url).json(args);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                format!("request to {} timed out", self.url)
            } else {
                format!("request to {} failed: {e}", self.url)
            }
        })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response from {}: {e}", self.url))?;

        if !status.is_success() {
            return Err(format!("{} returned {}: {}", self.url, status.as_u16(), body.trim()));
        }
        Ok(body)
    }
}
