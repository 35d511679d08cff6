// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Frame types of the gateway ↔ EPP processing protocol.
//!
//! The wire codec itself is owned by the gateway integration; these enums
//! model the five logical frame kinds and the per-frame answers the EPP must
//! produce. Body payloads are opaque bytes whose semantic content is JSON
//! request/response bodies and SSE streams.

use std::collections::HashMap;

/// Header set on the request to direct it at the selected backend endpoint.
pub const DESTINATION_ENDPOINT_HEADER: &str = "x-gateway-destination-endpoint";

/// Inbound header supplying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// One frame received from the gateway.
#[derive(Debug, Clone)]
pub enum ProcessingRequest {
    RequestHeaders {
        headers: HashMap<String, String>,
        /// Filter metadata, e.g. the `envoy.lb.subset_hint` namespace.
        metadata: serde_json::Value,
        end_of_stream: bool,
    },
    RequestBody {
        body: Vec<u8>,
        end_of_stream: bool,
    },
    ResponseHeaders {
        headers: HashMap<String, String>,
    },
    ResponseBody {
        body: Vec<u8>,
        end_of_stream: bool,
    },
    ResponseTrailers {
        trailers: HashMap<String, String>,
    },
}

/// Ordered header mutations applied by the gateway.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMutation {
    pub set_headers: Vec<(String, String)>,
}

impl HeaderMutation {
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_headers.push((key.into(), value.into()));
        self
    }
}

/// One body chunk re-emitted toward the client. The final chunk of a body
/// carries `end_of_stream`.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyChunk {
    pub data: Vec<u8>,
    pub end_of_stream: bool,
}

/// One frame answered by the EPP.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingResponse {
    RequestHeaders {
        header_mutation: HeaderMutation,
    },
    /// Carries the (possibly rewritten) request body and the destination
    /// endpoint header mutation.
    RequestBody {
        body: Vec<u8>,
        header_mutation: HeaderMutation,
    },
    ResponseHeaders {
        header_mutation: HeaderMutation,
    },
    ResponseBody(BodyChunk),
    ResponseTrailers {
        header_mutation: HeaderMutation,
    },
    /// Terminal error answer; no further frames follow.
    ImmediateResponse {
        status: u16,
        details: String,
    },
}
