/// HTTP implementation of the platform capability interface.
///
/// Talks to a chat-platform gateway: cookie-bundle login for a session
/// token, JSON endpoints for thread info and title writes, and a
/// newline-delimited JSON stream for realtime events.
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::appstate::CookieEntry;
use crate::platform::{PlatformClient, PlatformError, PlatformEvent, ThreadInfo};

pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpGateway {
    /// Authenticate with the exported cookie bundle and return a live
    /// handle. Failure here is fatal at startup.
    pub async fn login(base_url: &str, appstate: &[CookieEntry]) -> Result<Self, PlatformError> {
        let http = reqwest::Client::new();
        let base_url = base_url.trim_end_matches('/').to_string();

        let resp = http
            .post(format!("{base_url}/session"))
            .json(&serde_json::json!({ "cookies": appstate }))
            .send()
            .await
            .map_err(|e| PlatformError::Http { source: e })?;

        if !resp.status().is_success() {
            return Err(PlatformError::Login {
                detail: format!("gateway answered status {}", resp.status()),
            });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| PlatformError::Http { source: e })?;
        let token = body["token"]
            .as_str()
            .ok_or_else(|| PlatformError::Login {
                detail: "login response carried no session token".to_string(),
            })?
            .to_string();

        info!("platform login succeeded");
        Ok(Self {
            http,
            base_url,
            token,
        })
    }
}

impl PlatformClient for HttpGateway {
    async fn thread_info(&self, thread_id: &str) -> Result<ThreadInfo, PlatformError> {
        let resp = self
            .http
            .get(format!("{}/threads/{}", self.base_url, thread_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| PlatformError::Http { source: e })?;

        if !resp.status().is_success() {
            return Err(PlatformError::Status {
                context: "thread info",
                status: resp.status().as_u16(),
            });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| PlatformError::Http { source: e })?;
        Ok(ThreadInfo {
            name: thread_name(&body),
        })
    }

    async fn set_title(&self, title: &str, thread_id: &str) -> Result<(), PlatformError> {
        let resp = self
            .http
            .post(format!("{}/threads/{}/title", self.base_url, thread_id))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await
            .map_err(|e| PlatformError::Http { source: e })?;

        if !resp.status().is_success() {
            return Err(PlatformError::Status {
                context: "set title",
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<PlatformEvent> {
        let (tx, rx) = mpsc::channel(64);
        let http = self.http.clone();
        let url = format!("{}/events", self.base_url);
        let token = self.token.clone();
        tokio::spawn(stream_events(http, url, token, tx));
        rx
    }
}

/// Read the event stream and feed decoded events to the channel.
///
/// Ends with a warning on any transport error; the poll fallback keeps the
/// daemon functional without it. There is no reconnect.
async fn stream_events(
    http: reqwest::Client,
    url: String,
    token: String,
    tx: mpsc::Sender<PlatformEvent>,
) {
    let resp = match http.get(&url).bearer_auth(&token).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            warn!(status = %r.status(), "event subscription rejected");
            return;
        }
        Err(e) => {
            warn!(error = %e, "event subscription failed");
            return;
        }
    };

    info!("event subscription established");
    let mut body = resp.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "event stream broke");
                break;
            }
        };
        buf.extend_from_slice(&chunk);
        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let Some(event) = decode_event(&line[..line.len() - 1]) else {
                continue;
            };
            if tx.send(event).await.is_err() {
                // Receiver gone, the listener stopped.
                return;
            }
        }
    }
    warn!("event stream ended");
}

/// Decode one stream line into an event.
///
/// Only `type == "event"` payloads carrying a log message category are
/// kept; anything else, including unparseable lines, is dropped so a
/// malformed event can never take the subscription down.
fn decode_event(line: &[u8]) -> Option<PlatformEvent> {
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return None;
    }
    let value: Value = match serde_json::from_slice(line) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "skipping undecodable event line");
            return None;
        }
    };
    if value["type"].as_str() != Some("event") {
        return None;
    }
    let category = value["logMessageType"].as_str()?.to_string();
    let thread_id = id_field(&value["threadID"])
        .or_else(|| id_field(&value["logMessageData"]["threadID"]))
        .or_else(|| id_field(&value["logMessageData"]["threadId"]));
    Some(PlatformEvent {
        category: Some(category),
        thread_id,
    })
}

/// Thread identifiers arrive as strings or bare numbers depending on the
/// event shape.
fn id_field(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(String::from)
        .or_else(|| value.as_u64().map(|n| n.to_string()))
}

/// Conversation name with the platform's fallback chain.
fn thread_name(body: &Value) -> String {
    body["name"]
        .as_str()
        .or_else(|| body["threadName"].as_str())
        .unwrap_or("Unknown")
        .to_string()
}
