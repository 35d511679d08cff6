// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The request director: per-request orchestration of admission, scheduling,
//! request preparation, response observation and predictor feedback.
//!
//! One gateway stream is owned by one task; the director mutates that
//! stream's [`RequestContext`] serially through its stages. Predictor
//! failures never abort a request: they degrade to a zero-value observation
//! and a log line. Training submissions are unconditional per output token,
//! while predictions are Poisson-sampled and capped; the two paths must not
//! be conflated.

pub mod admission;
pub mod plugins;
pub mod routing;
pub mod stats;

use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::backend::{Metrics, Pod};
use crate::config::DirectorConfig;
use crate::datastore::{subset_pods, Criticality, Datastore, InferenceModel};
use crate::error::Error;
use crate::handlers::request::extract_prompt;
use crate::handlers::RequestContext;
use crate::metrics::DIRECTOR_METRICS;
use crate::predictor::{epoch_millis, PredictionRequest, Predictor, TrainingEntry};
use crate::sampler::TokenSampler;
use crate::scheduler::{Scheduler, SchedulingRequest, SchedulingResult};

use admission::SaturationDetector;
use plugins::{PostResponse, PreRequest, Response};
use stats::running_average;

/// Word count of the prompt, used as the input-token feature for the
/// predictor. Whitespace split; the EPP has no tokenizer for the target
/// model.
fn input_token_length(prompt: &str) -> usize {
    prompt.split_whitespace().count()
}

#[derive(Debug, Clone, Copy)]
enum PredictionKind {
    Ttft,
    Tpot,
}

impl PredictionKind {
    fn as_str(self) -> &'static str {
        match self {
            PredictionKind::Ttft => "TTFT",
            PredictionKind::Tpot => "TPOT",
        }
    }
}

pub struct Director {
    datastore: Arc<dyn Datastore>,
    scheduler: Arc<dyn Scheduler>,
    saturation_detector: Arc<dyn SaturationDetector>,
    predictor: Option<Arc<dyn Predictor>>,
    config: DirectorConfig,
    pre_request_plugins: Vec<Arc<dyn PreRequest>>,
    post_response_plugins: Vec<Arc<dyn PostResponse>>,
}

impl Director {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        scheduler: Arc<dyn Scheduler>,
        saturation_detector: Arc<dyn SaturationDetector>,
        predictor: Option<Arc<dyn Predictor>>,
        config: DirectorConfig,
    ) -> Self {
        tracing::info!(
            predictor = predictor.is_some(),
            sampling_mean = config.sampling_mean,
            max_sampled_tokens = config.max_sampled_tokens,
            "director created"
        );
        Self {
            datastore,
            scheduler,
            saturation_detector,
            predictor,
            config,
            pre_request_plugins: Vec::new(),
            post_response_plugins: Vec::new(),
        }
    }

    pub fn with_pre_request_plugin(mut self, plugin: Arc<dyn PreRequest>) -> Self {
        self.pre_request_plugins.push(plugin);
        self
    }

    pub fn with_post_response_plugin(mut self, plugin: Arc<dyn PostResponse>) -> Self {
        self.post_response_plugins.push(plugin);
        self
    }

    pub fn config(&self) -> &DirectorConfig {
        &self.config
    }

    pub fn is_predictor_available(&self) -> bool {
        self.predictor.is_some()
    }

    /// Request lifecycle up to release: parse → resolve → admit → schedule →
    /// prepare. On error the context keeps whatever was populated so far, so
    /// the caller can still emit diagnostics.
    pub async fn handle_request(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        // --- 1. Parse request details ---
        let model = ctx
            .request_body
            .get("model")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::BadRequest("model not found in request body".to_string()))?
            .to_string();
        ctx.model = model;
        ctx.prompt = extract_prompt(&ctx.request_body)?;

        let model_obj = self.datastore.model_get(&ctx.model).unwrap_or_else(|| {
            tracing::info!(model = %ctx.model, "no registered inference model, using sheddable default");
            InferenceModel::sheddable_default(&ctx.model)
        });

        ctx.resolved_target_model = ctx.model.clone();
        if !model_obj.target_models.is_empty() {
            let resolved = routing::random_weighted_draw(&model_obj, 0).ok_or_else(|| {
                Error::BadConfiguration(format!(
                    "error getting target model name for model {}",
                    model_obj.model_name
                ))
            })?;
            ctx.request_body
                .insert("model".to_string(), serde_json::Value::String(resolved.clone()));
            ctx.resolved_target_model = resolved;
        }
        if ctx.resolved_target_model.is_empty() {
            return Err(Error::BadConfiguration(format!(
                "empty resolved target model for model {}",
                ctx.model
            )));
        }

        ctx.criticality = model_obj.criticality.unwrap_or(Criticality::Standard);

        let scheduling_request = SchedulingRequest {
            request_id: ctx.request_id.clone(),
            target_model: ctx.resolved_target_model.clone(),
            prompt: ctx.prompt.clone(),
            headers: ctx.request_headers.clone(),
        };
        ctx.scheduling_request = Some(scheduling_request.clone());
        tracing::debug!(
            model = %ctx.model,
            resolved_target_model = %ctx.resolved_target_model,
            criticality = ?ctx.criticality,
            "LLM request assembled"
        );

        // --- 2. Admission control ---
        admission::admit_request(self.saturation_detector.as_ref(), ctx.criticality)?;

        // --- 3. Candidate snapshot + scheduling ---
        let candidates = subset_pods(self.datastore.as_ref(), &ctx.request_metadata);
        if candidates.is_empty() {
            return Err(Error::ServiceUnavailable(
                "no candidate pods after endpoint subset filtering".to_string(),
            ));
        }
        let result = self
            .scheduler
            .schedule(&scheduling_request, candidates)
            .await
            .map_err(|e| {
                Error::InferencePoolResourceExhausted(format!("failed to find target pod: {e}"))
            })?;

        // --- 4. Prepare request ---
        self.prepare_request(ctx, result).await
    }

    /// Pin the scheduling result to the context: endpoint, target pod and the
    /// first metrics snapshot.
    async fn prepare_request(
        &self,
        ctx: &mut RequestContext,
        result: SchedulingResult,
    ) -> Result<(), Error> {
        let Some(pod_metrics) = result.primary_pod() else {
            return Err(Error::Internal(
                "scheduling result has no primary profile target pod".to_string(),
            ));
        };
        let pool = self
            .datastore
            .pool_get()
            .map_err(|e| Error::Internal(e.to_string()))?;

        ctx.last_seen_metrics = Some(pod_metrics.metrics.clone());
        ctx.target_pod = Some(pod_metrics.pod.clone());
        ctx.target_endpoint = Some(pod_metrics.pod.endpoint(pool.target_port));
        ctx.scheduling_result = Some(result);

        if let (Some(request), Some(result)) = (&ctx.scheduling_request, &ctx.scheduling_result) {
            self.run_pre_request_plugins(request, result, pool.target_port)
                .await;
        }
        Ok(())
    }

    /// Response-headers stage: notify plugins, refresh metrics and make the
    /// one-per-request TTFT prediction. TTFT prediction is never sampled.
    pub async fn handle_response_headers(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        if let (Some(request), Some(pod)) = (&ctx.scheduling_request, &ctx.target_pod) {
            let response = Response {
                request_id: ctx.request_id.clone(),
                headers: ctx.response_headers.clone(),
            };
            self.run_post_response_plugins(request, &response, pod).await;
        }

        let Some(predictor) = self.predictor.clone() else {
            tracing::debug!("no latency predictor configured; skipping header prediction");
            return Ok(());
        };
        if ctx.scheduling_result.is_none() {
            tracing::debug!("no scheduling result; skipping header prediction");
            return Ok(());
        }
        let Some(metrics) = self.current_target_metrics(ctx) else {
            tracing::debug!("no target pod metrics; skipping header prediction");
            return Ok(());
        };
        ctx.last_seen_metrics = Some(metrics.clone());

        let prediction_request = PredictionRequest {
            kv_cache_percentage: metrics.kv_cache_usage_percent,
            input_token_length: input_token_length(&ctx.prompt),
            num_request_waiting: metrics.waiting_queue_size,
            num_request_running: metrics.running_queue_size,
            // TTFT is for the first token
            num_tokens_generated: 0,
        };

        ctx.predicted_ttft_ms = match self
            .make_prediction_safely(
                predictor.as_ref(),
                &ctx.cancellation,
                prediction_request,
                PredictionKind::Ttft,
            )
            .await
        {
            Ok(prediction) => prediction,
            Err(e) => {
                tracing::debug!(error = %e, "TTFT prediction failed");
                0.0
            }
        };
        tracing::debug!(predicted_ttft_ms = ctx.predicted_ttft_ms, "header stage complete");
        Ok(())
    }

    /// Response body chunk stage. First chunk sets TTFT and forces a TPOT
    /// prediction; later chunks measure inter-token latency, always submit a
    /// training sample and predict only at sampled tokens. Metrics refresh
    /// last, so the next chunk's prediction sees metrics sampled just after
    /// this token.
    pub async fn handle_response_body_chunk(&self, ctx: &mut RequestContext) {
        let Some(predictor) = self.predictor.clone() else {
            return;
        };
        if ctx.scheduling_result.is_none() {
            tracing::debug!("skipping body-chunk logic; no scheduling result");
            return;
        }
        let Some(fresh_metrics) = self.current_target_metrics(ctx) else {
            tracing::debug!("skipping body-chunk logic; no valid target pod");
            return;
        };
        if ctx.cancellation.is_cancelled() {
            tracing::debug!("request cancelled; skipping body-chunk predictions");
            return;
        }

        let now = Instant::now();

        if ctx.token_sampler.is_none() {
            let sampler = TokenSampler::new(
                &ctx.request_id,
                self.config.sampling_mean,
                self.config.max_sampled_tokens,
            );
            tracing::debug!(
                request_id = %ctx.request_id,
                first_prediction_token = sampler.next_sample_token(),
                "initialized per-request token sampler"
            );
            ctx.token_sampler = Some(sampler);
        }

        let input_tokens = input_token_length(&ctx.prompt);
        let seen = ctx.last_seen_metrics.clone().unwrap_or_default();

        if ctx.generated_token_count == 0 {
            // First output token: record TTFT and force the first TPOT
            // prediction so the observation sequences stay aligned.
            ctx.ttft_ms = now
                .duration_since(ctx.request_received_timestamp)
                .as_millis() as f64;
            ctx.generated_token_count = 1;
            DIRECTOR_METRICS
                .time_to_first_token_seconds
                .observe(ctx.ttft_ms / 1000.0);
            tracing::debug!(ttft_ms = ctx.ttft_ms, "first token received");

            let entry = TrainingEntry {
                kv_cache_percentage: seen.kv_cache_usage_percent,
                input_token_length: input_tokens,
                actual_ttft_ms: ctx.ttft_ms,
                actual_tpot_ms: 0.0,
                num_request_waiting: seen.waiting_queue_size,
                num_request_running: seen.running_queue_size,
                num_tokens_generated: 0,
                timestamp_ms: epoch_millis(),
            };
            self.submit_training(predictor.as_ref(), &ctx.cancellation, vec![entry])
                .await;

            // Predicts the latency of the next token (token 2).
            let prediction_request = PredictionRequest {
                kv_cache_percentage: seen.kv_cache_usage_percent,
                input_token_length: input_tokens,
                num_request_waiting: seen.waiting_queue_size,
                num_request_running: seen.running_queue_size,
                num_tokens_generated: ctx.generated_token_count,
            };
            let predicted = match self
                .make_prediction_safely(
                    predictor.as_ref(),
                    &ctx.cancellation,
                    prediction_request,
                    PredictionKind::Tpot,
                )
                .await
            {
                Ok(prediction) => prediction,
                Err(e) => {
                    tracing::debug!(error = %e, "first TPOT prediction failed");
                    0.0
                }
            };
            ctx.predicted_tpot_observations_ms.push(predicted);
            ctx.avg_predicted_tpot_ms = running_average(
                ctx.avg_predicted_tpot_ms,
                predicted,
                ctx.predicted_tpot_observations_ms.len(),
            );
        } else {
            let inter_token_latency = ctx
                .last_token_timestamp
                .map(|last| now.duration_since(last).as_millis() as f64)
                .unwrap_or(0.0);
            ctx.generated_token_count += 1;
            let token_count = ctx.generated_token_count;
            DIRECTOR_METRICS
                .inter_token_latency_seconds
                .observe(inter_token_latency / 1000.0);

            let sampled = ctx
                .token_sampler
                .as_ref()
                .is_some_and(|s| s.should_predict(token_count));

            // The ==2 clause aligns the observed sequence with the forced
            // first prediction made on the previous chunk.
            if token_count == 2 || sampled {
                ctx.tpot_observations_ms.push(inter_token_latency);
                ctx.avg_tpot_ms = running_average(
                    ctx.avg_tpot_ms,
                    inter_token_latency,
                    ctx.tpot_observations_ms.len(),
                );
            }

            tracing::trace!(
                latency_ms = inter_token_latency,
                token_count,
                sampled,
                "inter-token latency measured"
            );

            // Every token trains, sampled or not.
            let entry = TrainingEntry {
                kv_cache_percentage: seen.kv_cache_usage_percent,
                input_token_length: input_tokens,
                actual_ttft_ms: 0.0,
                actual_tpot_ms: inter_token_latency,
                num_request_waiting: seen.waiting_queue_size,
                num_request_running: seen.running_queue_size,
                num_tokens_generated: token_count - 1,
                timestamp_ms: epoch_millis(),
            };
            self.submit_training(predictor.as_ref(), &ctx.cancellation, vec![entry])
                .await;

            if sampled {
                let prediction_request = PredictionRequest {
                    kv_cache_percentage: seen.kv_cache_usage_percent,
                    input_token_length: input_tokens,
                    num_request_waiting: seen.waiting_queue_size,
                    num_request_running: seen.running_queue_size,
                    num_tokens_generated: token_count,
                };
                let predicted = match self
                    .make_prediction_safely(
                        predictor.as_ref(),
                        &ctx.cancellation,
                        prediction_request,
                        PredictionKind::Tpot,
                    )
                    .await
                {
                    Ok(prediction) => prediction,
                    Err(e) => {
                        tracing::debug!(error = %e, token = token_count, "TPOT prediction failed");
                        0.0
                    }
                };
                ctx.predicted_tpot_observations_ms.push(predicted);
                ctx.avg_predicted_tpot_ms = running_average(
                    ctx.avg_predicted_tpot_ms,
                    predicted,
                    ctx.predicted_tpot_observations_ms.len(),
                );
                if let Some(sampler) = ctx.token_sampler.as_mut() {
                    sampler.record_prediction(token_count);
                    tracing::trace!(
                        current_token = token_count,
                        next_prediction_token = sampler.next_sample_token(),
                        "scheduled next prediction"
                    );
                }
            }
        }

        // Refresh at the end of the chunk: the next chunk's prediction sees
        // metrics sampled just after this token.
        ctx.last_token_timestamp = Some(now);
        ctx.last_seen_metrics = Some(fresh_metrics);
    }

    /// Trailer stage. Aggregates already live on the context; nothing extra
    /// is computed here.
    pub async fn handle_response_trailers(&self, _ctx: &mut RequestContext) -> Result<(), Error> {
        Ok(())
    }

    /// An arbitrary pod, for diagnostics paths that need any live backend.
    pub fn random_pod(&self) -> Option<Pod> {
        let pods = self.datastore.pod_get_all();
        if pods.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..pods.len());
        pods.into_iter().nth(index).map(|p| p.pod)
    }

    /// Live metrics for the scheduled target pod, falling back to the
    /// snapshot captured at scheduling time if the pod left the datastore.
    fn current_target_metrics(&self, ctx: &RequestContext) -> Option<Metrics> {
        let pod = ctx.target_pod.as_ref()?;
        self.datastore
            .pod_list(&|candidate| candidate.pod.name == pod.name)
            .into_iter()
            .next()
            .map(|p| p.metrics)
            .or_else(|| {
                ctx.scheduling_result
                    .as_ref()
                    .and_then(|r| r.primary_pod())
                    .map(|p| p.metrics.clone())
            })
    }

    /// One predictor call under the request's cancellation token. Negative
    /// predictions clamp to 0; every failure is recoverable by the caller.
    async fn make_prediction_safely(
        &self,
        predictor: &dyn Predictor,
        cancellation: &CancellationToken,
        request: PredictionRequest,
        kind: PredictionKind,
    ) -> anyhow::Result<f64> {
        let started = Instant::now();
        let prediction = tokio::select! {
            _ = cancellation.cancelled() => {
                anyhow::bail!("request cancelled during {} prediction", kind.as_str())
            }
            result = predictor.predict(request) => result?,
        };

        let value = match kind {
            PredictionKind::Ttft => prediction.ttft_ms,
            PredictionKind::Tpot => prediction.tpot_ms,
        };
        if value < 0.0 {
            tracing::debug!(kind = kind.as_str(), value, "negative prediction received");
            return Ok(0.0);
        }
        tracing::trace!(
            kind = kind.as_str(),
            value,
            duration_us = started.elapsed().as_micros() as u64,
            "prediction successful"
        );
        Ok(value)
    }

    /// Training submission is fire-and-forget: failures are logged, never
    /// propagated. A cancelled request stops submitting.
    async fn submit_training(
        &self,
        predictor: &dyn Predictor,
        cancellation: &CancellationToken,
        entries: Vec<TrainingEntry>,
    ) {
        tokio::select! {
            _ = cancellation.cancelled() => {
                tracing::debug!("request cancelled; dropping training sample");
            }
            result = predictor.add_training_data_bulk(entries) => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, "failed to add training sample");
                }
            }
        }
    }

    async fn run_pre_request_plugins(
        &self,
        request: &SchedulingRequest,
        result: &SchedulingResult,
        target_port: u16,
    ) {
        for plugin in &self.pre_request_plugins {
            let before = Instant::now();
            plugin.pre_request(request, result, target_port).await;
            tracing::debug!(
                plugin = plugin.name(),
                duration_us = before.elapsed().as_micros() as u64,
                "ran pre-request plugin"
            );
        }
    }

    async fn run_post_response_plugins(
        &self,
        request: &SchedulingRequest,
        response: &Response,
        target_pod: &Pod,
    ) {
        for plugin in &self.post_response_plugins {
            let before = Instant::now();
            plugin.post_response(request, response, target_pod).await;
            tracing::debug!(
                plugin = plugin.name(),
                duration_us = before.elapsed().as_micros() as u64,
                "ran post-response plugin"
            );
        }
    }
}
