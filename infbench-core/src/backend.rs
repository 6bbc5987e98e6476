use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::api::{ApiKind, RequestDescriptor, ResponseInfo};
use crate::http::HttpClient;
use crate::prometheus::ModelServerMetricsMetadata;
use crate::tokenizer::Tokenizer;

/// Per-request failures. These never abort the run; the dispatcher wraps
/// them into a `Failure` outcome and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("http transport error: {0}")]
    Transport(#[from] crate::http::Error),

    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled at run deadline")]
    Cancelled,
}

impl RequestError {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::Transport(_) => "transport",
            RequestError::Status { .. } => "status",
            RequestError::Parse(_) => "parse",
            RequestError::Timeout(_) => "timeout",
            RequestError::Cancelled => "cancelled",
        }
    }
}

/// Structured failure payload kept in the lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub error_type: String,
    pub message: String,
}

impl From<&RequestError> for ErrorInfo {
    fn from(err: &RequestError) -> Self {
        Self {
            error_type: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Successful request result handed back to the dispatcher.
#[derive(Debug, Clone)]
pub struct CompletedRequest {
    pub info: ResponseInfo,
    /// Elapsed time from send to the first meaningful response chunk.
    /// Unset for non-streamed responses, where first-chunk granularity is
    /// unmeasurable (a known approximation, deliberately not conflated with
    /// full request latency).
    pub time_to_first_token: Option<Duration>,
}

/// Wire-level request produced by a backend adapter.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub route: &'static str,
    pub body: serde_json::Value,
    pub streaming: bool,
}

/// Translates between the abstract request/response model and one server's
/// JSON wire format. The dispatcher only ever talks through this interface.
pub trait BackendAdapter: Send + Sync {
    fn supported_apis(&self) -> &[ApiKind];

    fn build_request(&self, descriptor: &RequestDescriptor)
    -> Result<WireRequest, RequestError>;

    /// Parses a complete (non-streamed) response body.
    fn parse_response(&self, body: &[u8]) -> Result<ResponseInfo, RequestError>;

    /// Fresh per-request parser for a streamed response.
    fn stream_parser(&self) -> Box<dyn StreamParser>;

    /// Time-series metric mapping for this backend, if it exports one.
    fn metrics_metadata(&self) -> Option<ModelServerMetricsMetadata> {
        None
    }
}

/// Incremental-chunk contract for streaming backends: the adapter is handed
/// each raw chunk as it arrives and reports whether it carried first
/// meaningful content, then yields the aggregated response at stream end.
pub trait StreamParser: Send {
    /// Returns true if this chunk contained non-empty generated content.
    fn push_chunk(&mut self, chunk: &[u8]) -> bool;

    fn finish(self: Box<Self>) -> Result<ResponseInfo, RequestError>;
}

/// A model server endpoint the dispatcher can drive. Implementations issue
/// the network call (or simulate one) and compute time-to-first-token.
pub trait ModelServerClient: Send + Sync {
    fn supported_apis(&self) -> &[ApiKind];

    fn process_request(
        &self,
        descriptor: &RequestDescriptor,
    ) -> impl Future<Output = Result<CompletedRequest, RequestError>> + Send;

    fn metrics_metadata(&self) -> Option<ModelServerMetricsMetadata> {
        None
    }
}

/// HTTP-backed client: builds the wire request via the adapter, posts it,
/// and (for streamed responses) feeds chunks back into the adapter while
/// capturing the first-content timestamp exactly once.
pub struct HttpModelServerClient {
    http: HttpClient,
    base_url: String,
    adapter: Box<dyn BackendAdapter>,
}

impl HttpModelServerClient {
    pub fn new(base_url: impl Into<String>, adapter: Box<dyn BackendAdapter>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: HttpClient::default(),
            base_url,
            adapter,
        }
    }
}

impl ModelServerClient for HttpModelServerClient {
    fn supported_apis(&self) -> &[ApiKind] {
        self.adapter.supported_apis()
    }

    fn process_request(
        &self,
        descriptor: &RequestDescriptor,
    ) -> impl Future<Output = Result<CompletedRequest, RequestError>> + Send {
        async move {
            let wire = self.adapter.build_request(descriptor)?;
            let url = format!("{}{}", self.base_url, wire.route);

            if wire.streaming {
                let sent = Instant::now();
                let mut res = self.http.post_json_streaming(&url, &wire.body).await?;
                if res.status != 200 {
                    let collected = res.collect().await?;
                    return Err(RequestError::Status {
                        status: collected.status,
                        body: collected.body_utf8().unwrap_or_default().to_string(),
                    });
                }

                let mut parser = self.adapter.stream_parser();
                let mut time_to_first_token = None;
                while let Some(chunk) = res.next_chunk().await? {
                    let meaningful = parser.push_chunk(&chunk);
                    if meaningful && time_to_first_token.is_none() {
                        time_to_first_token = Some(sent.elapsed());
                    }
                }

                Ok(CompletedRequest {
                    info: parser.finish()?,
                    time_to_first_token,
                })
            } else {
                let res = self.http.post_json(&url, &wire.body).await?;
                if res.status != 200 {
                    return Err(RequestError::Status {
                        status: res.status,
                        body: res.body_utf8().unwrap_or_default().to_string(),
                    });
                }

                Ok(CompletedRequest {
                    info: self.adapter.parse_response(&res.body)?,
                    time_to_first_token: None,
                })
            }
        }
    }

    fn metrics_metadata(&self) -> Option<ModelServerMetricsMetadata> {
        self.adapter.metrics_metadata()
    }
}

/// Adapter for OpenAI-compatible completion/chat endpoints (vLLM and
/// friends): `/v1/completions` and `/v1/chat/completions`.
pub struct OpenAiAdapter {
    model_name: String,
    ignore_eos: bool,
    streaming: bool,
    tokenizer: Arc<dyn Tokenizer>,
}

impl OpenAiAdapter {
    const SUPPORTED: &'static [ApiKind] = &[ApiKind::Completion, ApiKind::Chat];

    pub fn new(
        model_name: impl Into<String>,
        ignore_eos: bool,
        streaming: bool,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            ignore_eos,
            streaming,
            tokenizer,
        }
    }

    fn response_info(&self, output_text: String) -> ResponseInfo {
        let output_len = self.tokenizer.count_tokens(&output_text) as u64;
        let mut info = ResponseInfo::new();
        info.insert("output_text", output_text);
        info.insert("output_len", output_len);
        info
    }
}

impl BackendAdapter for OpenAiAdapter {
    fn supported_apis(&self) -> &[ApiKind] {
        Self::SUPPORTED
    }

    fn build_request(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<WireRequest, RequestError> {
        // The single place that branches on the request variant.
        let (route, body) = match descriptor {
            RequestDescriptor::Completion { prompt, max_tokens } => (
                "/v1/completions",
                serde_json::json!({
                    "model": self.model_name,
                    "prompt": prompt,
                    "max_tokens": max_tokens,
                    "ignore_eos": self.ignore_eos,
                    "stream": self.streaming,
                }),
            ),
            RequestDescriptor::Chat {
                messages,
                max_tokens,
            } => (
                "/v1/chat/completions",
                serde_json::json!({
                    "model": self.model_name,
                    "messages": messages,
                    "max_tokens": max_tokens,
                    "ignore_eos": self.ignore_eos,
                    "stream": self.streaming,
                }),
            ),
        };

        Ok(WireRequest {
            route,
            body,
            streaming: self.streaming,
        })
    }

    fn parse_response(&self, body: &[u8]) -> Result<ResponseInfo, RequestError> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| RequestError::Parse(e.to_string()))?;
        let choice = value
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| RequestError::Parse("response has no choices".to_string()))?;

        // Completion responses carry `text`, chat responses `message.content`.
        let output_text = choice
            .get("text")
            .or_else(|| choice.get("message").and_then(|m| m.get("content")))
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(self.response_info(output_text))
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(SseStreamParser {
            tokenizer: self.tokenizer.clone(),
            pending: String::new(),
            text: String::new(),
            error: None,
        })
    }

    fn metrics_metadata(&self) -> Option<ModelServerMetricsMetadata> {
        Some(ModelServerMetricsMetadata::vllm(&self.model_name))
    }
}

/// Parses OpenAI-style SSE streams: `data: {json}` lines terminated by
/// `data: [DONE]`. Chunks may split mid-line; unterminated input is buffered
/// until the next chunk.
struct SseStreamParser {
    tokenizer: Arc<dyn Tokenizer>,
    pending: String,
    text: String,
    error: Option<String>,
}

impl SseStreamParser {
    fn take_content(&mut self, line: &str) -> bool {
        let Some(data) = line.strip_prefix("data:") else {
            return false;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return false;
        }

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(format!("bad stream chunk: {e}"));
                }
                return false;
            }
        };

        // Completion streams carry `text`, chat streams `delta.content`.
        let content = value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| {
                choice
                    .get("text")
                    .or_else(|| choice.get("delta").and_then(|d| d.get("content")))
            })
            .and_then(|t| t.as_str())
            .unwrap_or_default();

        if content.is_empty() {
            return false;
        }
        self.text.push_str(content);
        true
    }
}

impl StreamParser for SseStreamParser {
    fn push_chunk(&mut self, chunk: &[u8]) -> bool {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        let mut meaningful = false;
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            if self.take_content(line.trim_end()) {
                meaningful = true;
            }
        }
        meaningful
    }

    fn finish(mut self: Box<Self>) -> Result<ResponseInfo, RequestError> {
        // A final unterminated line still counts.
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.take_content(line.trim_end());
        }
        if let Some(error) = self.error {
            return Err(RequestError::Parse(error));
        }

        let output_len = self.tokenizer.count_tokens(&self.text) as u64;
        let mut info = ResponseInfo::new();
        info.insert("output_text", std::mem::take(&mut self.text));
        info.insert("output_len", output_len);
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WhitespaceTokenizer;

    fn adapter(streaming: bool) -> OpenAiAdapter {
        OpenAiAdapter::new("test-model", true, streaming, Arc::new(WhitespaceTokenizer::new()))
    }

    #[test]
    fn builds_completion_and_chat_payloads() {
        let a = adapter(false);
        let wire = a
            .build_request(&RequestDescriptor::Completion {
                prompt: "hello".to_string(),
                max_tokens: 16,
            })
            .unwrap_or_else(|e| panic!("build failed: {e}"));
        assert_eq!(wire.route, "/v1/completions");
        assert_eq!(wire.body["prompt"], "hello");
        assert_eq!(wire.body["max_tokens"], 16);
        assert_eq!(wire.body["ignore_eos"], true);

        let wire = a
            .build_request(&RequestDescriptor::Chat {
                messages: vec![crate::api::ChatMessage::user("hi")],
                max_tokens: 8,
            })
            .unwrap_or_else(|e| panic!("build failed: {e}"));
        assert_eq!(wire.route, "/v1/chat/completions");
        assert_eq!(wire.body["messages"][0]["content"], "hi");
    }

    #[test]
    fn parses_completion_and_chat_responses() {
        let a = adapter(false);
        let info = a
            .parse_response(br#"{"choices":[{"text":"one two three"}]}"#)
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(info.number("output_len"), Some(3.0));

        let info = a
            .parse_response(br#"{"choices":[{"message":{"content":"four five"}}]}"#)
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(info.number("output_len"), Some(2.0));
        assert_eq!(info.text("output_text"), Some("four five"));
    }

    #[test]
    fn sse_chunks_split_mid_line_reassemble() {
        let a = adapter(true);
        let mut parser = a.stream_parser();

        assert!(!parser.push_chunk(b"data: {\"choices\":[{\"te"));
        assert!(parser.push_chunk(b"xt\":\"hello\"}]}\n"));
        assert!(parser.push_chunk(b"data: {\"choices\":[{\"text\":\" world\"}]}\n"));
        assert!(!parser.push_chunk(b"data: [DONE]\n"));

        let info = parser
            .finish()
            .unwrap_or_else(|e| panic!("finish failed: {e}"));
        assert_eq!(info.text("output_text"), Some("hello world"));
        assert_eq!(info.number("output_len"), Some(2.0));
    }

    #[test]
    fn keepalive_and_empty_deltas_are_not_first_content() {
        let a = adapter(true);
        let mut parser = a.stream_parser();

        assert!(!parser.push_chunk(b"\n\n"));
        assert!(!parser.push_chunk(b"data: {\"choices\":[{\"delta\":{}}]}\n"));
        assert!(parser.push_chunk(b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n"));
    }

    #[test]
    fn malformed_stream_chunk_surfaces_at_finish() {
        let a = adapter(true);
        let mut parser = a.stream_parser();
        parser.push_chunk(b"data: {not json}\n");
        assert!(matches!(parser.finish(), Err(RequestError::Parse(_))));
    }
}
