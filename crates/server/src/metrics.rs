// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::LazyLock;

use axum::{Router, routing::get};
use prometheus::{
    Encoder, Histogram, IntCounterVec, TextEncoder, register_histogram, register_int_counter_vec,
};

use crate::error::{ApiError, ApiResult, InternalSnafu};

pub const OP_LABEL: &str = "op";
pub const OUTCOME_LABEL: &str = "outcome";

pub static QUEUE_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "keyq_requests_total",
        "Total number of queue requests by operation and outcome",
        &[OP_LABEL, OUTCOME_LABEL]
    )
    .unwrap()
});

pub static QUEUE_WAIT_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "keyq_wait_duration_seconds",
        "Time bounded-wait retrievals spent parked"
    )
    .unwrap()
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Op {
    TakeNow,
    TakeWaiting,
    Append,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Ok,
    Miss,
    Invalid,
    Unsupported,
    Error,
}

impl Outcome {
    pub const fn of<T>(result: &ApiResult<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(ApiError::NotFound { .. }) => Self::Miss,
            Err(ApiError::InvalidArgument { .. }) => Self::Invalid,
            Err(ApiError::Unsupported { .. }) => Self::Unsupported,
            Err(ApiError::Internal { .. }) => Self::Error,
        }
    }
}

pub fn record(op: Op, outcome: Outcome) {
    let op: &'static str = op.into();
    let outcome: &'static str = outcome.into();
    QUEUE_REQUESTS.with_label_values(&[op, outcome]).inc();
}

/// Prometheus text exposition of the default registry at `/metrics`.
///
/// Mount it on an admin listener: on the queue listener it would shadow the
/// key `metrics`.
pub fn metrics_routes(router: Router) -> Router { router.route("/metrics", get(render)) }

async fn render() -> ApiResult<String> {
    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buf)
        .map_err(|e| InternalSnafu { reason: e.to_string() }.build())?;
    String::from_utf8(buf).map_err(|e| InternalSnafu { reason: e.to_string() }.build())
}

#[cfg(test)]
mod tests {
    use keyq_store::TakeError;
    use snafu::IntoError;

    use super::*;
    use crate::error::NotFoundSnafu;

    #[test]
    fn outcome_classifies_results() {
        let miss: ApiResult<()> = Err(TakeError::Expired).map_err(|source| {
            NotFoundSnafu { key: "a" }.into_error(source)
        });
        assert_eq!(Outcome::of(&miss), Outcome::Miss);
        assert_eq!(Outcome::of(&Ok::<_, ApiError>(())), Outcome::Ok);
    }

    #[tokio::test]
    async fn render_exposes_recorded_requests() {
        record(Op::Append, Outcome::Ok);
        QUEUE_WAIT_SECONDS.observe(0.5);

        let text = render().await.unwrap();
        assert!(text.contains("keyq_requests_total"));
        assert!(text.contains(r#"op="append""#));
        assert!(text.contains("keyq_wait_duration_seconds"));
    }
}
