//! Single-attempt HTTP probe.
//!
//! Opens a fresh TCP connection, performs one HTTP/1.1 request with hyper
//! and reads the whole body, all under one timeout. Every failure mode is
//! folded into a [`ProbeOutcome`]; nothing here returns an error.

use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Empty};
use serde::de::DeserializeOwned;
use tracing::debug;

use farm_core::InstanceReply;

/// Tagged result of one probe.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// The instance answered. Any status, including non-2xx.
    Response {
        status: StatusCode,
        body: Bytes,
        latency: Duration,
    },
    /// No complete answer within the timeout.
    Timeout { latency: Duration },
    /// Connection refused, reset, or the exchange broke mid-way.
    Failed { reason: String, latency: Duration },
}

impl ProbeOutcome {
    pub fn latency(&self) -> Duration {
        match self {
            ProbeOutcome::Response { latency, .. }
            | ProbeOutcome::Timeout { latency }
            | ProbeOutcome::Failed { latency, .. } => *latency,
        }
    }

    /// 2xx response.
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Response { status, .. } if status.is_success())
    }

    /// Decode the body of a response as JSON. `None` for non-responses or
    /// bodies that do not parse.
    pub fn json<T: DeserializeOwned>(&self) -> Option<T> {
        match self {
            ProbeOutcome::Response { body, .. } => serde_json::from_slice(body).ok(),
            _ => None,
        }
    }

    /// Short description of why this was not a 2xx answer.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ProbeOutcome::Response { status, .. } if status.is_success() => None,
            ProbeOutcome::Response { status, .. } => Some(format!("HTTP {}", status.as_u16())),
            ProbeOutcome::Timeout { .. } => Some("timeout".to_string()),
            ProbeOutcome::Failed { reason, .. } => Some(reason.clone()),
        }
    }

    /// Serializable form for API responses.
    pub fn into_reply(self) -> InstanceReply {
        let latency_ms = millis(self.latency());
        match self {
            ProbeOutcome::Response { status, body, .. } => {
                let body = body_value(&body);
                if status.is_success() {
                    InstanceReply::Ok {
                        status: status.as_u16(),
                        latency_ms,
                        body,
                    }
                } else {
                    InstanceReply::HttpError {
                        status: status.as_u16(),
                        latency_ms,
                        body,
                    }
                }
            }
            ProbeOutcome::Timeout { .. } => InstanceReply::Timeout { latency_ms },
            ProbeOutcome::Failed { reason, .. } => {
                InstanceReply::Unreachable { reason, latency_ms }
            }
        }
    }
}

/// Body as JSON when it parses, otherwise as text. Empty bodies are null.
fn body_value(body: &Bytes) -> serde_json::Value {
    if body.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// Milliseconds with microsecond precision.
pub fn millis(d: Duration) -> f64 {
    d.as_micros() as f64 / 1000.0
}

/// A probe configuration: the per-call timeout.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    timeout: Duration,
}

impl Probe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// `GET http://{address}{path}`
    pub async fn get(&self, address: &str, path: &str) -> ProbeOutcome {
        self.send(Method::GET, address, path).await
    }

    /// `POST http://{address}{path}` with an empty body.
    pub async fn post(&self, address: &str, path: &str) -> ProbeOutcome {
        self.send(Method::POST, address, path).await
    }

    async fn send(&self, method: Method, address: &str, path: &str) -> ProbeOutcome {
        let started = Instant::now();
        let uri = format!("http://{address}{path}");

        let result = tokio::time::timeout(self.timeout, async {
            let stream = match tokio::net::TcpStream::connect(address).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, %uri, "probe connection failed");
                    return Err(format!("connect: {e}"));
                }
            };

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
                Ok(pair) => pair,
                Err(e) => {
                    debug!(error = %e, %uri, "probe handshake failed");
                    return Err(format!("handshake: {e}"));
                }
            };

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method(method)
                .uri(path)
                .header(http::header::HOST, address)
                .header(http::header::USER_AGENT, "farm-control-plane/0.1")
                .body(Empty::<Bytes>::new())
                .map_err(|e| format!("request: {e}"))?;

            let resp = match sender.send_request(req).await {
                Ok(resp) => resp,
                Err(e) => {
                    debug!(error = %e, %uri, "probe request failed");
                    return Err(format!("request: {e}"));
                }
            };

            let status = resp.status();
            match resp.into_body().collect().await {
                Ok(collected) => Ok((status, collected.to_bytes())),
                Err(e) => {
                    debug!(error = %e, %uri, "probe body read failed");
                    Err(format!("body: {e}"))
                }
            }
        })
        .await;

        let latency = started.elapsed();
        match result {
            Ok(Ok((status, body))) => {
                if !status.is_success() {
                    debug!(%status, %uri, "probe non-2xx");
                }
                ProbeOutcome::Response {
                    status,
                    body,
                    latency,
                }
            }
            Ok(Err(reason)) => ProbeOutcome::Failed { reason, latency },
            Err(_) => {
                debug!(%uri, "probe timed out");
                ProbeOutcome::Timeout { latency }
            }
        }
    }
}
