// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Surfaced error taxonomy for the request director.
//!
//! Only errors that abort a request live here; transient predictor failures,
//! training write errors and malformed SSE payloads are recovered locally and
//! never cross this boundary.

/// Errors surfaced to the gateway as an immediate response.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid `model` / prompt in the request body.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Weighted draw over misconfigured target models.
    #[error("bad configuration: {0}")]
    BadConfiguration(String),

    /// Zero candidate pods after subset filtering.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Saturation shedding or scheduler failure.
    #[error("inference pool resources exhausted: {0}")]
    InferencePoolResourceExhausted(String),

    /// Scheduling result shape violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status carried by the protocol's immediate response.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::BadConfiguration(_) => 500,
            Error::ServiceUnavailable(_) => 503,
            Error::InferencePoolResourceExhausted(_) => 429,
            Error::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::BadRequest("x".into()).status_code(), 400);
        assert_eq!(Error::BadConfiguration("x".into()).status_code(), 500);
        assert_eq!(Error::ServiceUnavailable("x".into()).status_code(), 503);
        assert_eq!(
            Error::InferencePoolResourceExhausted("x".into()).status_code(),
            429
        );
        assert_eq!(Error::Internal("x".into()).status_code(), 500);
    }
}
