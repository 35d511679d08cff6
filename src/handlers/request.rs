// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request body parsing: the director only cares about `model` and the
//! prompt text; everything else passes through untouched.

use serde_json::{Map, Value};

use crate::error::Error;

/// Parse the buffered request body into a JSON object.
pub fn parse_request_body(body: &[u8]) -> Result<Map<String, Value>, Error> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::BadRequest(format!("invalid JSON request body: {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::BadRequest(
            "request body is not a JSON object".to_string(),
        )),
    }
}

/// Prompt text of an OpenAI-style payload.
///
/// Completion requests carry a top-level `prompt`; chat requests carry
/// `messages` whose `content` is either a string or a list of typed parts.
pub fn extract_prompt(body: &Map<String, Value>) -> Result<String, Error> {
    if let Some(prompt) = body.get("prompt").and_then(|v| v.as_str()) {
        return Ok(prompt.to_string());
    }

    if let Some(messages) = body.get("messages").and_then(|v| v.as_array()) {
        let mut parts = Vec::new();
        for message in messages {
            match message.get("content") {
                Some(Value::String(text)) => parts.push(text.clone()),
                Some(Value::Array(content_parts)) => {
                    for part in content_parts {
                        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                            parts.push(text.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        if !parts.is_empty() {
            return Ok(parts.join("\n"));
        }
    }

    Err(Error::BadRequest(
        "prompt not found in request body".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture is not an object"),
        }
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            parse_request_body(b"[1,2,3]"),
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            parse_request_body(b"not json"),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn test_completion_prompt() {
        let body = object(json!({"model": "foo", "prompt": "hello world"}));
        assert_eq!(extract_prompt(&body).unwrap(), "hello world");
    }

    #[test]
    fn test_chat_string_content() {
        let body = object(json!({
            "model": "foo",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hello world"}
            ]
        }));
        assert_eq!(extract_prompt(&body).unwrap(), "be brief\nhello world");
    }

    #[test]
    fn test_chat_part_list_content() {
        let body = object(json!({
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "describe"},
                    {"type": "image_url", "image_url": {"url": "http://x/y.png"}},
                    {"type": "text", "text": "this"}
                ]}
            ]
        }));
        assert_eq!(extract_prompt(&body).unwrap(), "describe\nthis");
    }

    #[test]
    fn test_missing_prompt_is_bad_request() {
        let body = object(json!({"model": "foo"}));
        assert!(matches!(
            extract_prompt(&body),
            Err(Error::BadRequest(_))
        ));
    }
}
