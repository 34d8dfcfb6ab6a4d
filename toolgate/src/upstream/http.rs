// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// reqwest-backed CompletionClient.

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::collections::VecDeque;
use std::io::Read;
use std::time::Duration;

use super::{
    CompletionClient, CompletionRequest, FrameStream, PassthroughResponse, SseDecoder,
    UpstreamError,
};
use crate::config::UpstreamConfig;

pub struct ReqwestCompletionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Option<Duration>,
}

impl ReqwestCompletionClient {
    pub fn new(client: reqwest::Client, config: &UpstreamConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout_ms.map(Duration::from_millis),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn post(
        &self,
        request: &CompletionRequest,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, UpstreamError> {
        let mut req = self
            .authorize(self.client.post(self.url("/v1/chat/completions")))
            .json(request.body());
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await.map_err(map_send_error)?;
        reject_failure(resp).await
    }
}

#[async_trait]
impl CompletionClient for ReqwestCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Bytes, UpstreamError> {
        let resp = self.post(request, self.timeout).await?;
        let mut headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(map_send_error)?;
        maybe_decompress(&mut headers, body)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<FrameStream, UpstreamError> {
        // The total timeout would cut long generations short; only the
        // wait for response headers is bounded for streams.
        let resp = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.post(request, None))
                .await
                .map_err(|_| UpstreamError::Timeout("no response headers before deadline".into()))??,
            None => self.post(request, None).await?,
        };

        let bytes = resp
            .bytes_stream()
            .map_err(|e| UpstreamError::Stream(e.to_string()));
        let state = (Box::pin(bytes), SseDecoder::default(), VecDeque::new(), false);

        let frames = stream::unfold(
            state,
            |(mut input, mut decoder, mut pending, mut ended)| async move {
                loop {
                    if let Some(frame) = pending.pop_front() {
                        return Some((Ok(frame), (input, decoder, pending, ended)));
                    }
                    if ended {
                        return None;
                    }
                    match input.next().await {
                        Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                        Some(Err(e)) => {
                            ended = true;
                            return Some((Err(e), (input, decoder, pending, ended)));
                        }
                        None => {
                            ended = true;
                            pending.extend(decoder.finish());
                        }
                    }
                }
            },
        );
        Ok(Box::pin(frames))
    }

    async fn list_models(&self) -> Result<PassthroughResponse, UpstreamError> {
        let mut req = self.authorize(self.client.get(self.url("/v1/models")));
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let resp = req
            .send()
            .await
            .map_err(map_send_error)?;
        let status =
            StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(map_send_error)?;
        let body = maybe_decompress(&mut headers, body)?;
        Ok(PassthroughResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_send_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout(e.to_string())
    } else {
        UpstreamError::Transport(e.to_string())
    }
}

/// Turn a non-2xx response into `UpstreamError::Status`, keeping the body
/// text for the client.
async fn reject_failure(resp: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let mut headers = resp.headers().clone();
    let raw = resp.bytes().await.unwrap_or_default();
    let body = maybe_decompress(&mut headers, raw.clone()).unwrap_or(raw);
    Err(UpstreamError::Status {
        status: status.as_u16(),
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

// ---------------------------------------------------------------------------
// Content-Encoding
// ---------------------------------------------------------------------------

fn content_encoding_is(headers: &HeaderMap, encoding: &str) -> bool {
    headers
        .get(reqwest::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case(encoding))
        .unwrap_or(false)
}

fn inflate(reader: impl Read, label: &str) -> Result<Bytes, UpstreamError> {
    let mut reader = reader;
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|e| UpstreamError::Transport(format!("{label} decompression failed: {e}")))?;
    Ok(Bytes::from(out))
}

/// Decompress body if Content-Encoding is set. Strips Content-Encoding and
/// Content-Length from headers since the body size changes.
pub(crate) fn maybe_decompress(headers: &mut HeaderMap, body: Bytes) -> Result<Bytes, UpstreamError> {
    let result = if content_encoding_is(headers, "gzip") {
        inflate(GzDecoder::new(&body[..]), "gzip")?
    } else if content_encoding_is(headers, "deflate") {
        inflate(DeflateDecoder::new(&body[..]), "deflate")?
    } else {
        return Ok(body);
    };
    headers.remove(reqwest::header::CONTENT_ENCODING);
    headers.remove(reqwest::header::CONTENT_LENGTH);
    Ok(result)
}
