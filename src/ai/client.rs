use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use super::wire::{self, StreamChunk};
use super::{ChatMessage, CompletionService, EmbeddingService};
use crate::cancel::CancelFlag;
use crate::error::{PileError, Result};

type LineParser = fn(&str) -> Result<StreamChunk>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Where completions and embeddings come from. Chosen once per request.
#[derive(Debug, Clone, PartialEq)]
pub enum Provider {
    /// OpenAI-compatible API (OpenAI, Gemini's compatibility endpoint, proxies).
    HostedCompatible { base_url: String, api_key: String },
    /// A local inference server speaking the Ollama API.
    LocalInference { base_url: String },
}

impl Provider {
    fn endpoint(&self, path: &str) -> String {
        let base = match self {
            Self::HostedCompatible { base_url, .. } | Self::LocalInference { base_url } => base_url,
        };
        format!("{}/{}", base.trim_end_matches('/'), path)
    }
}

/// One event of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(String),
    Done,
    Error(String),
}

/// Tokens of a completion as they arrive. Dropping the stream (or calling
/// [`CompletionStream::cancel`]) abandons the request.
#[derive(Debug)]
pub struct CompletionStream {
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancelFlag,
    finished: bool,
}

impl CompletionStream {
    /// A stream fed by the caller, for services that do not stream over HTTP.
    pub fn channel() -> (mpsc::Sender<StreamEvent>, CancelFlag, Self) {
        let (tx, rx) = mpsc::channel();
        let cancel = CancelFlag::new();
        let stream = Self {
            events: rx,
            cancel: cancel.clone(),
            finished: false,
        };
        (tx, cancel, stream)
    }

    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream into the full response text.
    pub fn collect_text(self) -> Result<String> {
        let mut text = String::new();
        for event in self {
            match event {
                StreamEvent::Token(token) => text.push_str(&token),
                StreamEvent::Done => break,
                StreamEvent::Error(message) => return Err(PileError::Service(message)),
            }
        }
        Ok(text)
    }
}

impl Iterator for CompletionStream {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.finished = true;
            return None;
        }
        match self.events.recv() {
            Ok(event) => {
                if matches!(event, StreamEvent::Done | StreamEvent::Error(_)) {
                    self.finished = true;
                }
                Some(event)
            }
            Err(_) => {
                self.finished = true;
                None
            }
        }
    }
}

impl Drop for CompletionStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Blocking HTTP client for one provider.
#[derive(Debug, Clone)]
pub struct AiClient {
    provider: Provider,
    http: Client,
}

impl AiClient {
    pub fn new(provider: Provider) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { provider, http })
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    fn post(&self, path: &str, body: &Value) -> RequestBuilder {
        let request = self.http.post(self.provider.endpoint(path)).json(body);
        match &self.provider {
            Provider::HostedCompatible { api_key, .. } if !api_key.is_empty() => {
                request.bearer_auth(api_key)
            }
            _ => request,
        }
    }

    fn send(&self, path: &str, body: &Value, model: &str) -> Result<Response> {
        let response = self.post(path, body).send()?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            log::warn!("[AI] {} returned {}", path, status);
            return Err(wire::status_error(status.as_u16(), &text, model));
        }
        Ok(response)
    }

    pub fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        match &self.provider {
            Provider::HostedCompatible { .. } => {
                let body = wire::hosted_chat_body(model, messages, false);
                let value: Value = self.send("chat/completions", &body, model)?.json()?;
                wire::parse_hosted_completion(&value)
            }
            Provider::LocalInference { .. } => {
                let body = wire::local_chat_body(model, messages, false);
                let value: Value = self.send("api/chat", &body, model)?.json()?;
                wire::parse_local_completion(&value)
            }
        }
    }

    /// Start a streamed completion. The HTTP status is checked before this
    /// returns; everything after that arrives as [`StreamEvent`]s.
    pub fn stream_complete(&self, model: &str, messages: &[ChatMessage]) -> Result<CompletionStream> {
        let (path, body, parse): (&str, Value, LineParser) = match &self.provider {
            Provider::HostedCompatible { .. } => (
                "chat/completions",
                wire::hosted_chat_body(model, messages, true),
                wire::parse_sse_line as LineParser,
            ),
            Provider::LocalInference { .. } => (
                "api/chat",
                wire::local_chat_body(model, messages, true),
                wire::parse_ndjson_line as LineParser,
            ),
        };

        let response = self.send(path, &body, model)?;
        let (tx, cancel, stream) = CompletionStream::channel();

        thread::spawn(move || {
            let reader = BufReader::new(response);
            for line in reader.lines() {
                if cancel.is_cancelled() {
                    log::debug!("[AI] Stream cancelled by caller");
                    return;
                }
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string()));
                        return;
                    }
                };
                let event = match parse(&line) {
                    Ok(StreamChunk::Token(token)) => StreamEvent::Token(token),
                    Ok(StreamChunk::Done) => {
                        let _ = tx.send(StreamEvent::Done);
                        return;
                    }
                    Ok(StreamChunk::Skip) => continue,
                    Err(e) => StreamEvent::Error(e.to_string()),
                };
                let is_error = matches!(event, StreamEvent::Error(_));
                if tx.send(event).is_err() || is_error {
                    return;
                }
            }
            // Server closed the body without an explicit terminator
            let _ = tx.send(StreamEvent::Done);
        });

        Ok(stream)
    }

    pub fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let body = wire::embed_body(model, text);
        match &self.provider {
            Provider::HostedCompatible { .. } => {
                let value: Value = self.send("embeddings", &body, model)?.json()?;
                wire::parse_hosted_embedding(&value)
            }
            Provider::LocalInference { .. } => {
                let value: Value = self.send("api/embed", &body, model)?.json()?;
                wire::parse_local_embedding(&value)
            }
        }
    }
}

impl CompletionService for AiClient {
    fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        AiClient::complete(self, model, messages)
    }

    fn stream_complete(&self, model: &str, messages: &[ChatMessage]) -> Result<CompletionStream> {
        AiClient::stream_complete(self, model, messages)
    }
}

impl EmbeddingService for AiClient {
    fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        AiClient::embed(self, model, text)
    }
}
