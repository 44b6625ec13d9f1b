//! Request bodies and response parsing for the two chat wire formats:
//! OpenAI-compatible (`/chat/completions`, SSE) and local inference
//! (`/api/chat`, newline-delimited JSON).

use serde_json::{json, Value};

use super::ChatMessage;
use crate::error::{PileError, Result};

pub const MAX_TOKENS: u32 = 500;

/// One parsed line of a streamed response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Token(String),
    Done,
    Skip,
}

pub fn hosted_chat_body(model: &str, messages: &[ChatMessage], stream: bool) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": MAX_TOKENS,
        "stream": stream,
    });
    if model.starts_with("gemini-") {
        body["reasoning_effort"] = json!("none");
    }
    body
}

pub fn local_chat_body(model: &str, messages: &[ChatMessage], stream: bool) -> Value {
    json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    })
}

pub fn embed_body(model: &str, text: &str) -> Value {
    json!({ "model": model, "input": text })
}

/// Text of a non-streamed `/chat/completions` response.
pub fn parse_hosted_completion(body: &Value) -> Result<String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PileError::Service("completion response has no content".into()))
}

/// Text of a non-streamed `/api/chat` response.
pub fn parse_local_completion(body: &Value) -> Result<String> {
    body["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PileError::Service("chat response has no message".into()))
}

/// One SSE line of a streamed `/chat/completions` response.
pub fn parse_sse_line(line: &str) -> Result<StreamChunk> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(StreamChunk::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamChunk::Done);
    }
    let value: Value = serde_json::from_str(data)
        .map_err(|e| PileError::Service(format!("malformed stream chunk: {}", e)))?;
    if let Some(message) = value["error"]["message"].as_str() {
        return Err(PileError::Service(message.to_string()));
    }
    match value["choices"][0]["delta"]["content"].as_str() {
        Some(token) if !token.is_empty() => Ok(StreamChunk::Token(token.to_string())),
        _ => Ok(StreamChunk::Skip),
    }
}

/// One NDJSON line of a streamed `/api/chat` response.
pub fn parse_ndjson_line(line: &str) -> Result<StreamChunk> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(StreamChunk::Skip);
    }
    let value: Value = serde_json::from_str(line)
        .map_err(|e| PileError::Service(format!("malformed stream chunk: {}", e)))?;
    if let Some(message) = value["error"].as_str() {
        return Err(PileError::Service(message.to_string()));
    }
    if value["done"].as_bool().unwrap_or(false) {
        return Ok(StreamChunk::Done);
    }
    match value["message"]["content"].as_str() {
        Some(token) if !token.is_empty() => Ok(StreamChunk::Token(token.to_string())),
        _ => Ok(StreamChunk::Skip),
    }
}

/// `data[0].embedding` of a hosted `/embeddings` response.
pub fn parse_hosted_embedding(body: &Value) -> Result<Vec<f32>> {
    vector_from(&body["data"][0]["embedding"])
}

/// `embeddings[0]` of a local `/api/embed` response.
pub fn parse_local_embedding(body: &Value) -> Result<Vec<f32>> {
    vector_from(&body["embeddings"][0])
}

fn vector_from(value: &Value) -> Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| PileError::Service("embedding response has no vector".into()))?;
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| PileError::Service("embedding contains a non-number".into()))
        })
        .collect()
}

/// Error for a non-success HTTP status.
pub fn status_error(status: u16, body: &str, model: &str) -> PileError {
    let message = match status {
        401 => "Invalid API key".to_string(),
        404 => format!("Model '{}' not found", model),
        429 => "Rate limit exceeded, try again later".to_string(),
        _ => format!("Request failed with status {}: {}", status, body.trim()),
    };
    PileError::Service(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::Role;

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::new(Role::System, "be kind"), ChatMessage::new(Role::User, "hi")]
    }

    #[test]
    fn test_hosted_body_shape() {
        let body = hosted_chat_body("gpt-4o", &messages(), true);
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body.get("reasoning_effort").is_none());

        let gemini = hosted_chat_body("gemini-2.0-flash", &messages(), false);
        assert_eq!(gemini["reasoning_effort"], "none");
    }

    #[test]
    fn test_local_body_has_no_token_cap() {
        let body = local_chat_body("llama3", &messages(), true);
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            StreamChunk::Token("Hel".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), StreamChunk::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), StreamChunk::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            StreamChunk::Skip
        );
        assert!(parse_sse_line("data: {not json").is_err());
    }

    #[test]
    fn test_ndjson_lines() {
        assert_eq!(
            parse_ndjson_line(r#"{"message":{"role":"assistant","content":"lo"},"done":false}"#).unwrap(),
            StreamChunk::Token("lo".into())
        );
        assert_eq!(parse_ndjson_line(r#"{"done":true}"#).unwrap(), StreamChunk::Done);
        assert_eq!(parse_ndjson_line("").unwrap(), StreamChunk::Skip);
        assert!(parse_ndjson_line(r#"{"error":"model not loaded"}"#).is_err());
    }

    #[test]
    fn test_embedding_responses() {
        let hosted = json!({"data": [{"embedding": [0.5, -1.0]}]});
        assert_eq!(parse_hosted_embedding(&hosted).unwrap(), vec![0.5, -1.0]);
        let local = json!({"embeddings": [[1.0, 2.0, 3.0]]});
        assert_eq!(parse_local_embedding(&local).unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(parse_local_embedding(&json!({})).is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert!(status_error(401, "", "m").to_string().contains("Invalid API key"));
        assert!(status_error(404, "", "llama9").to_string().contains("llama9"));
        assert!(status_error(429, "", "m").to_string().contains("Rate limit"));
        assert!(status_error(500, "boom", "m").to_string().contains("500: boom"));
    }
}
