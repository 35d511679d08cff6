// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Extension points around the scheduling decision.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::backend::Pod;
use crate::scheduler::{SchedulingRequest, SchedulingResult};

/// Response view handed to post-response plugins.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: String,
    pub headers: HashMap<String, String>,
}

/// Runs after a target pod is selected, before the rewritten request is
/// released to the gateway.
#[async_trait]
pub trait PreRequest: Send + Sync {
    fn name(&self) -> &str;

    async fn pre_request(
        &self,
        request: &SchedulingRequest,
        result: &SchedulingResult,
        target_port: u16,
    );
}

/// Runs when response headers arrive from the backend.
#[async_trait]
pub trait PostResponse: Send + Sync {
    fn name(&self) -> &str;

    async fn post_response(
        &self,
        request: &SchedulingRequest,
        response: &Response,
        target_pod: &Pod,
    );
}
