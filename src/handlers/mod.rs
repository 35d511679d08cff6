// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-stream frame handling.
//!
//! [`StreamingServer::process`] owns one gateway stream: it builds the
//! [`RequestContext`] at stream open, drives the director through its stages
//! as frames arrive, and answers every frame. The context lives exactly as
//! long as the stream and is returned to the caller at the end, surfaced
//! errors included, so outer layers can emit diagnostics from it.

pub mod request;
pub mod response;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{Metrics, Pod};
use crate::datastore::Criticality;
use crate::director::Director;
use crate::error::Error;
use crate::metrics::DIRECTOR_METRICS;
use crate::protocols::{
    BodyChunk, HeaderMutation, ProcessingRequest, ProcessingResponse,
    DESTINATION_ENDPOINT_HEADER, REQUEST_ID_HEADER,
};
use crate::sampler::TokenSampler;
use crate::scheduler::{SchedulingRequest, SchedulingResult};
use response::{Usage, STREAMING_END_MESSAGE};

/// All state for one request, created at stream open and dropped at stream
/// close. Mutated only by the director and its stream handler, on a single
/// task.
pub struct RequestContext {
    pub request_id: String,
    pub request_headers: HashMap<String, String>,
    pub request_metadata: serde_json::Value,
    pub request_body: serde_json::Map<String, serde_json::Value>,

    pub model: String,
    pub resolved_target_model: String,
    pub prompt: String,
    pub criticality: Criticality,

    pub scheduling_request: Option<SchedulingRequest>,
    pub scheduling_result: Option<SchedulingResult>,
    pub target_pod: Option<Pod>,
    /// Set iff scheduling succeeded; never inspected otherwise.
    pub target_endpoint: Option<String>,
    pub last_seen_metrics: Option<Metrics>,

    pub request_received_timestamp: Instant,
    pub last_token_timestamp: Option<Instant>,
    pub ttft_ms: f64,
    pub predicted_ttft_ms: f64,
    pub generated_token_count: usize,
    pub tpot_observations_ms: Vec<f64>,
    pub predicted_tpot_observations_ms: Vec<f64>,
    pub avg_tpot_ms: f64,
    pub avg_predicted_tpot_ms: f64,
    pub token_sampler: Option<TokenSampler>,

    pub usage: Option<Usage>,
    pub response_complete: bool,
    pub model_server_streaming: bool,
    pub response_headers: HashMap<String, String>,
    pub response_trailers: HashMap<String, String>,

    pub cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(
        request_headers: HashMap<String, String>,
        request_metadata: serde_json::Value,
        cancellation: CancellationToken,
    ) -> Self {
        let request_id = request_headers
            .get(REQUEST_ID_HEADER)
            .cloned()
            .unwrap_or_default();
        Self {
            request_id,
            request_headers,
            request_metadata,
            request_body: serde_json::Map::new(),
            model: String::new(),
            resolved_target_model: String::new(),
            prompt: String::new(),
            criticality: Criticality::Standard,
            scheduling_request: None,
            scheduling_result: None,
            target_pod: None,
            target_endpoint: None,
            last_seen_metrics: None,
            request_received_timestamp: Instant::now(),
            last_token_timestamp: None,
            ttft_ms: 0.0,
            predicted_ttft_ms: 0.0,
            generated_token_count: 0,
            tpot_observations_ms: Vec::new(),
            predicted_tpot_observations_ms: Vec::new(),
            avg_tpot_ms: 0.0,
            avg_predicted_tpot_ms: 0.0,
            token_sampler: None,
            usage: None,
            response_complete: false,
            model_server_streaming: false,
            response_headers: HashMap::new(),
            response_trailers: HashMap::new(),
            cancellation,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(
            HashMap::new(),
            serde_json::Value::Null,
            CancellationToken::new(),
        )
    }
}

/// Handles the framed gateway ↔ EPP stream for one request.
pub struct StreamingServer {
    director: Arc<Director>,
}

impl StreamingServer {
    pub fn new(director: Arc<Director>) -> Self {
        Self { director }
    }

    /// Run one stream to completion. Frames arrive on `frames`; per-frame
    /// answers go out on `responses`. Returns the request context (if the
    /// stream got far enough to create one) for outer-layer diagnostics.
    pub async fn process(
        &self,
        mut frames: mpsc::Receiver<ProcessingRequest>,
        responses: mpsc::Sender<ProcessingResponse>,
        cancellation: CancellationToken,
    ) -> anyhow::Result<Option<RequestContext>> {
        let mut ctx: Option<RequestContext> = None;
        let mut request_buffer: Vec<u8> = Vec::new();
        let mut response_buffer: Vec<u8> = Vec::new();

        loop {
            let frame = tokio::select! {
                _ = cancellation.cancelled() => {
                    tracing::debug!("stream cancelled by gateway");
                    break;
                }
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            match frame {
                ProcessingRequest::RequestHeaders {
                    headers, metadata, ..
                } => {
                    DIRECTOR_METRICS.requests_total.inc();
                    ctx = Some(RequestContext::new(
                        headers,
                        metadata,
                        cancellation.child_token(),
                    ));
                    responses
                        .send(ProcessingResponse::RequestHeaders {
                            header_mutation: HeaderMutation::default(),
                        })
                        .await?;
                }

                ProcessingRequest::RequestBody {
                    body,
                    end_of_stream,
                } => {
                    let Some(ctx) = ctx.as_mut() else {
                        anyhow::bail!("request body frame before request headers");
                    };
                    request_buffer.extend_from_slice(&body);
                    if !end_of_stream {
                        continue;
                    }

                    let outcome = request::parse_request_body(&request_buffer)
                        .map(|parsed| ctx.request_body = parsed);
                    let outcome = match outcome {
                        Ok(()) => self.director.handle_request(ctx).await,
                        Err(e) => Err(e),
                    };
                    match outcome {
                        Ok(()) => {
                            let mutated = serde_json::to_vec(&serde_json::Value::Object(
                                ctx.request_body.clone(),
                            ))?;
                            let endpoint = ctx.target_endpoint.clone().unwrap_or_default();
                            let header_mutation = HeaderMutation::default()
                                .set(DESTINATION_ENDPOINT_HEADER, endpoint)
                                .set("content-length", mutated.len().to_string());
                            responses
                                .send(ProcessingResponse::RequestBody {
                                    body: mutated,
                                    header_mutation,
                                })
                                .await?;
                        }
                        Err(err) => {
                            self.fail_stream(ctx, &responses, err).await?;
                            break;
                        }
                    }
                }

                ProcessingRequest::ResponseHeaders { headers } => {
                    let Some(ctx) = ctx.as_mut() else {
                        anyhow::bail!("response headers frame before request headers");
                    };
                    ctx.response_headers = headers;
                    ctx.model_server_streaming = ctx
                        .response_headers
                        .get("content-type")
                        .is_some_and(|ct| ct.contains("text/event-stream"));

                    if let Err(err) = self.director.handle_response_headers(ctx).await {
                        self.fail_stream(ctx, &responses, err).await?;
                        break;
                    }
                    responses
                        .send(ProcessingResponse::ResponseHeaders {
                            header_mutation: self.response_header_mutation(ctx),
                        })
                        .await?;
                }

                ProcessingRequest::ResponseBody {
                    body,
                    end_of_stream,
                } => {
                    let Some(ctx) = ctx.as_mut() else {
                        anyhow::bail!("response body frame before request headers");
                    };
                    let chunks = if ctx.model_server_streaming {
                        self.handle_streaming_body(ctx, &body, end_of_stream).await
                    } else {
                        response_buffer.extend_from_slice(&body);
                        if !end_of_stream {
                            continue;
                        }
                        self.handle_buffered_body(ctx, &response_buffer)
                    };
                    for chunk in chunks {
                        responses.send(ProcessingResponse::ResponseBody(chunk)).await?;
                    }
                }

                ProcessingRequest::ResponseTrailers { trailers } => {
                    let Some(ctx) = ctx.as_mut() else {
                        anyhow::bail!("response trailers frame before request headers");
                    };
                    ctx.response_trailers = trailers;
                    if let Err(err) = self.director.handle_response_trailers(ctx).await {
                        self.fail_stream(ctx, &responses, err).await?;
                        break;
                    }
                    let mut mutation =
                        HeaderMutation::default().set("x-went-into-resp-trailers", "true");
                    for (key, value) in &ctx.response_trailers {
                        mutation = mutation.set(key.clone(), value.clone());
                    }
                    responses
                        .send(ProcessingResponse::ResponseTrailers {
                            header_mutation: mutation,
                        })
                        .await?;
                }
            }
        }

        Ok(ctx)
    }

    /// One streamed SSE chunk: capture usage on the `[DONE]` chunk, run the
    /// director's token observation, then rewrite and re-chunk the body.
    async fn handle_streaming_body(
        &self,
        ctx: &mut RequestContext,
        body: &[u8],
        end_of_stream: bool,
    ) -> Vec<BodyChunk> {
        let text = String::from_utf8_lossy(body);
        if text.contains(STREAMING_END_MESSAGE) {
            if let Some(usage) = response::parse_response_for_usage(&text) {
                record_usage(ctx, usage);
            }
            ctx.response_complete = true;
        }

        self.director.handle_response_body_chunk(ctx).await;

        response::generate_response_body_chunks(
            ctx,
            body,
            end_of_stream,
            self.director.config().body_byte_limit,
        )
    }

    /// Complete non-streaming body: capture usage from the JSON object and
    /// re-chunk it out.
    fn handle_buffered_body(&self, ctx: &mut RequestContext, body: &[u8]) -> Vec<BodyChunk> {
        if let Some(usage) = response::parse_body_for_usage(body) {
            record_usage(ctx, usage);
        }
        ctx.response_complete = true;
        response::generate_response_body_chunks(
            ctx,
            body,
            true,
            self.director.config().body_byte_limit,
        )
    }

    fn response_header_mutation(&self, ctx: &RequestContext) -> HeaderMutation {
        let mut mutation = HeaderMutation::default().set("x-went-into-resp-headers", "true");
        if let Some(pod) = &ctx.target_pod {
            mutation = mutation.set("x-target-pod", pod.address.clone());
        }
        // Metrics the scheduler saw when it picked the pod.
        if let Some(at_start) = ctx
            .scheduling_result
            .as_ref()
            .and_then(|r| r.primary_pod())
            .map(|p| &p.metrics)
        {
            mutation = mutation
                .set(
                    "x-kvcache-size-at-start",
                    format!("{}", at_start.kv_cache_usage_percent),
                )
                .set(
                    "x-waiting-queue-size-at-start",
                    at_start.waiting_queue_size.to_string(),
                )
                .set(
                    "x-running-queue-size-at-start",
                    at_start.running_queue_size.to_string(),
                );
        }
        for (key, value) in &ctx.response_headers {
            mutation = mutation.set(key.clone(), value.clone());
        }
        mutation
    }

    async fn fail_stream(
        &self,
        ctx: &RequestContext,
        responses: &mpsc::Sender<ProcessingResponse>,
        err: Error,
    ) -> anyhow::Result<()> {
        let status = err.status_code();
        let status_label = status.to_string();
        DIRECTOR_METRICS
            .request_errors_total
            .with_label_values(&[status_label.as_str()])
            .inc();
        tracing::warn!(
            request_id = %ctx.request_id,
            model = %ctx.model,
            resolved_target_model = %ctx.resolved_target_model,
            status,
            error = %err,
            "request failed"
        );
        responses
            .send(ProcessingResponse::ImmediateResponse {
                status,
                details: err.to_string(),
            })
            .await?;
        Ok(())
    }
}

fn record_usage(ctx: &mut RequestContext, usage: Usage) {
    DIRECTOR_METRICS
        .input_sequence_tokens
        .observe(usage.prompt_tokens as f64);
    DIRECTOR_METRICS
        .output_sequence_tokens
        .observe(usage.completion_tokens as f64);
    tracing::debug!(
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        "usage captured"
    );
    ctx.usage = Some(usage);
}
