// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! # Dynamo EPP
//!
//! External processing extension (EPP) that sits between an API gateway and a
//! fleet of LLM inference servers. The gateway streams each client request to
//! the EPP over a bidirectional processing protocol; the EPP selects a target
//! backend pod, rewrites the request to direct it there, observes the streamed
//! response, and feeds live TTFT/TPOT measurements back into an online latency
//! predictor.
//!
//! The crate is organized around the [`director::Director`] per-request state
//! machine. [`handlers::StreamingServer`] owns the frame loop for one gateway
//! stream and drives the director through its stages; [`datastore::Datastore`],
//! [`scheduler::Scheduler`] and [`predictor::Predictor`] are the seams to the
//! pod/metrics store, the scheduling layer and the remote latency predictor.

pub mod backend;
pub mod config;
pub mod datastore;
pub mod director;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod predictor;
pub mod protocols;
pub mod sampler;
pub mod scheduler;
