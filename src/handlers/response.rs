// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Streamed response rewriting.
//!
//! Streaming bodies are SSE: `data: <json>` events separated by blank lines,
//! terminated by `data: [DONE]`. Events carrying a `usage` object get the
//! request's latency telemetry spliced in before re-emission; everything the
//! rewriter cannot parse passes through unchanged. Rebuilt bodies are
//! re-chunked so no frame exceeds the per-chunk byte limit.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::handlers::RequestContext;
use crate::protocols::BodyChunk;

pub const STREAMING_RESPONSE_PREFIX: &str = "data: ";
pub const STREAMING_END_MESSAGE: &str = "data: [DONE]";

/// Token accounting reported by the model server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: usize,
    #[serde(default)]
    pub completion_tokens: usize,
    #[serde(default)]
    pub total_tokens: usize,
}

/// Body chunks answered for one inbound response-body frame.
pub fn generate_response_body_chunks(
    ctx: &RequestContext,
    body: &[u8],
    end_of_stream: bool,
    body_byte_limit: usize,
) -> Vec<BodyChunk> {
    if ctx.model_server_streaming {
        let raw = String::from_utf8_lossy(body);
        let rebuilt = rewrite_streaming_events(ctx, &raw);
        chunk_body(rebuilt.as_bytes(), body_byte_limit, end_of_stream)
    } else {
        chunk_body(body, body_byte_limit, end_of_stream)
    }
}

/// Rewrite every SSE event in `raw`, splicing telemetry into `usage` objects.
/// `[DONE]` passes through verbatim; unparseable payloads pass through with a
/// log line; non-`data:` lines are dropped.
fn rewrite_streaming_events(ctx: &RequestContext, raw: &str) -> String {
    let mut rebuilt = String::with_capacity(raw.len());
    for event in raw.split("\n\n") {
        let Some(payload) = event.strip_prefix(STREAMING_RESPONSE_PREFIX) else {
            continue;
        };
        if payload == "[DONE]" {
            rebuilt.push_str(STREAMING_END_MESSAGE);
            rebuilt.push_str("\n\n");
            continue;
        }

        let payload = match serde_json::from_str::<Value>(payload) {
            Ok(mut object) => {
                if let Some(usage) = object.get_mut("usage").and_then(|u| u.as_object_mut()) {
                    splice_usage_telemetry(ctx, usage);
                }
                match serde_json::to_string(&object) {
                    Ok(serialized) => serialized,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to re-serialize modified SSE payload");
                        payload.to_string()
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, payload, "failed to parse SSE payload");
                payload.to_string()
            }
        };

        rebuilt.push_str(STREAMING_RESPONSE_PREFIX);
        rebuilt.push_str(&payload);
        rebuilt.push_str("\n\n");
    }
    rebuilt
}

fn splice_usage_telemetry(ctx: &RequestContext, usage: &mut serde_json::Map<String, Value>) {
    usage.insert("ttft_ms".to_string(), json!(ctx.ttft_ms));
    usage.insert("predicted_ttft_ms".to_string(), json!(ctx.predicted_ttft_ms));
    usage.insert(
        "tpot_observations_ms".to_string(),
        json!(ctx.tpot_observations_ms),
    );
    usage.insert(
        "predicted_tpot_observations_ms".to_string(),
        json!(ctx.predicted_tpot_observations_ms),
    );
    usage.insert("avg_tpot_ms".to_string(), json!(ctx.avg_tpot_ms));
    usage.insert(
        "avg_predicted_tpot_ms".to_string(),
        json!(ctx.avg_predicted_tpot_ms),
    );
}

/// Split `body` into chunks of at most `limit` bytes. The final chunk carries
/// `end_of_stream` when set; an empty body still emits one (empty) chunk so
/// every inbound frame gets an answer and end-of-stream propagates.
pub fn chunk_body(body: &[u8], limit: usize, end_of_stream: bool) -> Vec<BodyChunk> {
    if body.is_empty() {
        return vec![BodyChunk {
            data: Vec::new(),
            end_of_stream,
        }];
    }

    let mut chunks: Vec<BodyChunk> = body
        .chunks(limit)
        .map(|piece| BodyChunk {
            data: piece.to_vec(),
            end_of_stream: false,
        })
        .collect();
    if end_of_stream {
        if let Some(last) = chunks.last_mut() {
            last.end_of_stream = true;
        }
    }
    chunks
}

/// Scan a streamed chunk for a `data:` event with a `usage` object.
///
/// vLLM emits the usage event and `data: [DONE]` in the same body when
/// `stream_options.include_usage` is set; without it, `[DONE]` arrives alone
/// and this returns `None`.
pub fn parse_response_for_usage(text: &str) -> Option<Usage> {
    for line in text.lines() {
        let Some(content) = line.strip_prefix(STREAMING_RESPONSE_PREFIX) else {
            continue;
        };
        if content == "[DONE]" {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(content) else {
            tracing::warn!(payload = content, "unparseable payload while scanning for usage");
            continue;
        };
        if let Some(usage) = value.get("usage").filter(|u| u.is_object()) {
            if let Ok(usage) = serde_json::from_value::<Usage>(usage.clone()) {
                return Some(usage);
            }
        }
    }
    None
}

/// Usage from a complete non-streaming JSON response body.
pub fn parse_body_for_usage(body: &[u8]) -> Option<Usage> {
    let value = serde_json::from_slice::<Value>(body).ok()?;
    let usage = value.get("usage").filter(|u| u.is_object())?;
    serde_json::from_value::<Usage>(usage.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn streaming_ctx() -> RequestContext {
        let mut ctx = RequestContext::for_tests();
        ctx.model_server_streaming = true;
        ctx
    }

    #[test]
    fn test_usage_injection() {
        let mut ctx = streaming_ctx();
        ctx.ttft_ms = 120.0;
        ctx.predicted_ttft_ms = 110.0;
        ctx.tpot_observations_ms = vec![30.0];
        ctx.predicted_tpot_observations_ms = vec![28.0];
        ctx.avg_tpot_ms = 30.0;
        ctx.avg_predicted_tpot_ms = 28.0;

        let body = "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":4,\"total_tokens\":7}}\n\ndata: [DONE]\n\n";
        let chunks = generate_response_body_chunks(&ctx, body.as_bytes(), true, 64 * 1024);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].end_of_stream);
        assert!(chunks[0].data.len() <= 64 * 1024);

        let rebuilt = String::from_utf8(chunks[0].data.clone()).unwrap();
        let mut events = rebuilt.split("\n\n");
        let first = events.next().unwrap().strip_prefix("data: ").unwrap();
        let parsed: Value = serde_json::from_str(first).unwrap();
        let usage = parsed.get("usage").unwrap();
        assert_eq!(usage["ttft_ms"], json!(120.0));
        assert_eq!(usage["predicted_ttft_ms"], json!(110.0));
        assert_eq!(usage["tpot_observations_ms"], json!([30.0]));
        assert_eq!(usage["predicted_tpot_observations_ms"], json!([28.0]));
        assert_eq!(usage["avg_tpot_ms"], json!(30.0));
        assert_eq!(usage["avg_predicted_tpot_ms"], json!(28.0));
        assert_eq!(usage["prompt_tokens"], json!(3));
        assert_eq!(events.next().unwrap(), "data: [DONE]");
    }

    #[test]
    fn test_rewrite_idempotent_without_usage() {
        let ctx = streaming_ctx();
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n";
        let once = rewrite_streaming_events(&ctx, body);
        let twice = rewrite_streaming_events(&ctx, &once);
        assert_eq!(once, twice);

        let parsed: Value =
            serde_json::from_str(once.trim_end().strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(parsed, json!({"choices": [{"delta": {"content": "hi"}}]}));
    }

    #[test]
    fn test_done_passes_through_unchanged() {
        let ctx = streaming_ctx();
        assert_eq!(
            rewrite_streaming_events(&ctx, "data: [DONE]\n\n"),
            "data: [DONE]\n\n"
        );
    }

    #[test]
    fn test_unparseable_payload_passes_through() {
        let ctx = streaming_ctx();
        let rebuilt = rewrite_streaming_events(&ctx, "data: not json at all\n\n");
        assert_eq!(rebuilt, "data: not json at all\n\n");
    }

    #[test]
    fn test_non_data_lines_dropped() {
        let ctx = streaming_ctx();
        let rebuilt = rewrite_streaming_events(&ctx, ": keep-alive\n\ndata: [DONE]\n\n");
        assert_eq!(rebuilt, "data: [DONE]\n\n");
    }

    #[test]
    fn test_chunking_respects_limit() {
        let body = vec![b'x'; 100];
        let chunks = chunk_body(&body, 32, true);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.data.len() <= 32));
        assert!(chunks.last().unwrap().end_of_stream);
        assert!(chunks[..3].iter().all(|c| !c.end_of_stream));
        let total: usize = chunks.iter().map(|c| c.data.len()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_empty_body_still_answers_the_frame() {
        let chunks = chunk_body(&[], 32, true);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].data.is_empty());
        assert!(chunks[0].end_of_stream);

        let chunks = chunk_body(&[], 32, false);
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].end_of_stream);
    }

    #[test]
    fn test_parse_response_for_usage() {
        let text = "data: {\"usage\":{\"prompt_tokens\":7,\"total_tokens\":17,\"completion_tokens\":10}}\ndata: [DONE]\n";
        let usage = parse_response_for_usage(text).unwrap();
        assert_eq!(
            usage,
            Usage {
                prompt_tokens: 7,
                completion_tokens: 10,
                total_tokens: 17,
            }
        );
        assert!(parse_response_for_usage("data: [DONE]\n").is_none());
    }

    #[test]
    fn test_parse_body_for_usage_non_streaming() {
        let body = serde_json::to_vec(&json!({
            "choices": [],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
        }))
        .unwrap();
        let usage = parse_body_for_usage(&body).unwrap();
        assert_eq!(usage.total_tokens, 7);
        assert!(parse_body_for_usage(b"{}").is_none());
    }
}
