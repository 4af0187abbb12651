use std::time::Duration;

use revflow_core::error::{CoreError, CoreResult};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::warn;

/// HTTP client for the AI provider backing every concrete agent. Every
/// failure mode a model call can hit — transport error, non-2xx status,
/// malformed body — is branched explicitly and turned into a typed error
/// rather than an opaque `anyhow` chain, so a caller can tell a transient
/// transport failure from a hard 4xx before falling back to a soft failure.
pub struct AiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

impl AiClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn request(&self, prompt: &str, stream: bool) -> reqwest::RequestBuilder {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let mut req = self.http.post(url).json(&serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": stream,
        }));
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        req
    }

    /// Single-shot, non-streaming completion.
    pub async fn call(&self, prompt: &str) -> CoreResult<String> {
        let resp = self
            .request(prompt, false)
            .send()
            .await
            .map_err(|e| CoreError::provider(format!("ai request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| CoreError::provider(format!("ai response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(CoreError::provider(format!(
                "ai provider returned {status}: {}",
                truncate(&body, 500)
            )));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| CoreError::provider(format!("ai response did not parse: {e}")))?;
        Ok(parsed.response)
    }

    /// Streaming completion. The provider returns one JSON object per
    /// line; each line's `response` fragment is forwarded on `chunk_tx` as
    /// it arrives (when a sender is given) and folded into the returned
    /// accumulated text until `done` is set. Dropping the future cancels
    /// the in-flight transfer.
    pub async fn call_streaming(
        &self,
        prompt: &str,
        chunk_tx: Option<mpsc::UnboundedSender<String>>,
    ) -> CoreResult<String> {
        let resp = self
            .request(prompt, true)
            .send()
            .await
            .map_err(|e| CoreError::provider(format!("ai request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CoreError::provider(format!(
                "ai provider returned {status}: {}",
                truncate(&body, 500)
            )));
        }

        let mut output = String::new();
        let mut pending = String::new();
        let stream = resp.bytes_stream();
        tokio::pin!(stream);
        'outer: while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| CoreError::provider(format!("ai stream failed: {e}")))?;
            pending.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(newline) = pending.find('\n') {
                let line: String = pending.drain(..=newline).collect();
                match parse_stream_line(line.trim()) {
                    Some(chunk) => {
                        if !chunk.response.is_empty() {
                            if let Some(tx) = &chunk_tx {
                                let _ = tx.send(chunk.response.clone());
                            }
                            output.push_str(&chunk.response);
                        }
                        if chunk.done {
                            break 'outer;
                        }
                    }
                    None => continue,
                }
            }
        }
        if let Some(chunk) = parse_stream_line(pending.trim()) {
            if let Some(tx) = &chunk_tx {
                let _ = tx.send(chunk.response.clone());
            }
            output.push_str(&chunk.response);
        }
        Ok(output)
    }
}

fn parse_stream_line(line: &str) -> Option<StreamChunk> {
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            warn!(error = %e, "skipping malformed stream chunk");
            None
        }
    }
}

/// Caps provider error text at `max` characters, cutting on a char
/// boundary so multibyte bodies cannot panic the caller.
fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Extracts the first top-level JSON object from model output, tolerating
/// surrounding prose or a markdown code fence.
pub fn extract_json(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let raw = "Here is the analysis:\n```json\n{\"risk\":\"high\"}\n```\nLet me know if you need more.";
        let v = extract_json(raw).unwrap();
        assert_eq!(v["risk"], "high");
    }

    #[test]
    fn returns_none_without_braces() {
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn truncate_cuts_multibyte_text_on_char_boundaries() {
        let short = "plain error";
        assert_eq!(truncate(short, 500), short);

        let long = "é".repeat(600);
        let cut = truncate(&long, 500);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 503);
    }

    #[test]
    fn parses_stream_chunk_lines() {
        let chunk = parse_stream_line(r#"{"response":"hel","done":false}"#).unwrap();
        assert_eq!(chunk.response, "hel");
        assert!(!chunk.done);

        let last = parse_stream_line(r#"{"done":true}"#).unwrap();
        assert!(last.done);

        assert!(parse_stream_line("").is_none());
        assert!(parse_stream_line("not json").is_none());
    }
}
