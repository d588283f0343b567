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

//! HTTP routes over a [`QueueStore`].
//!
//! | request | store operation |
//! |---|---|
//! | `GET /{key}` | take now |
//! | `GET /{key}?timeout=<secs>` | take, waiting up to `secs` |
//! | `PUT /{key}?v=<value>` | append |
//!
//! A retrieval that finds nothing answers 404 whether or not it waited. A path
//! that is not exactly one non-empty segment answers 400, and any other method
//! answers 501. That includes HEAD: running a retrieval for it would consume
//! a value nobody sees.
//!
//! Parked retrievals answer 404 as soon as the shutdown token fires, so long
//! timeouts do not hold up graceful shutdown.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{Method, Uri},
    routing::get,
};
use keyq_store::{QueueStore, TakeError};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt, ensure};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{ApiError, ApiResult, InvalidArgumentSnafu, NotFoundSnafu, UnsupportedSnafu},
    metrics::{self, Op, Outcome},
};

pub type SharedStore = Arc<QueueStore>;

#[derive(Clone)]
struct QueueState {
    store:    SharedStore,
    /// Cancelled once the process begins shutting down
    shutdown: CancellationToken,
}

/// Query string of a retrieval.
#[derive(Debug, Default, Deserialize)]
pub struct TakeParams {
    /// Whole seconds to wait. Absent or empty means do not wait.
    timeout: Option<String>,
}

impl TakeParams {
    fn wait(&self) -> ApiResult<Option<Duration>> {
        match self.timeout.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse::<u64>()
                .map(|secs| Some(Duration::from_secs(secs)))
                .map_err(|_| {
                    InvalidArgumentSnafu {
                        reason: format!("timeout must be a whole number of seconds, got {raw:?}"),
                    }
                    .build()
                }),
        }
    }
}

/// Query string of an insertion.
#[derive(Debug, Default, Deserialize)]
pub struct AppendParams {
    v: Option<String>,
}

/// Adds the queue routes, backed by `store`, to `router`. Cancelling
/// `shutdown` releases every parked retrieval.
pub fn queue_routes(router: Router, store: SharedStore, shutdown: CancellationToken) -> Router {
    let queue = Router::new()
        .route(
            "/{key}",
            get(take).head(unsupported).put(append).fallback(unsupported),
        )
        .fallback(malformed_path)
        .with_state(QueueState { store, shutdown });
    router.merge(queue)
}

/// [`queue_routes`] bound to `store`, in the shape
/// [`start_rest_server`](crate::http::start_rest_server) takes.
pub fn queue_service(
    store: SharedStore,
    shutdown: CancellationToken,
) -> impl Fn(Router) -> Router + Send + Sync + 'static {
    move |router: Router| queue_routes(router, Arc::clone(&store), shutdown.clone())
}

fn checked_key(key: String) -> ApiResult<String> {
    ensure!(
        !key.is_empty(),
        InvalidArgumentSnafu {
            reason: "key must not be empty",
        }
    );
    Ok(key)
}

async fn take(
    State(state): State<QueueState>,
    Path(key): Path<String>,
    Query(params): Query<TakeParams>,
) -> ApiResult<String> {
    let wait = params.wait();
    let op = match wait {
        Ok(Some(_)) => Op::TakeWaiting,
        _ => Op::TakeNow,
    };
    let result = match (checked_key(key), wait) {
        (Ok(key), Ok(wait)) => take_value(&state, key, wait).await,
        (Err(e), _) | (_, Err(e)) => Err(e),
    };
    metrics::record(op, Outcome::of(&result));
    result
}

async fn take_value(state: &QueueState, key: String, wait: Option<Duration>) -> ApiResult<String> {
    let Some(timeout) = wait else {
        return state.store.take_now(&key).context(NotFoundSnafu { key });
    };

    debug!(%key, ?timeout, "waiting for value");
    let started = Instant::now();
    // Dropping the wait de-registers the waiter and requeues anything it was
    // already handed.
    let taken = tokio::select! {
        taken = state.store.take_waiting(&key, timeout) => taken,
        () = state.shutdown.cancelled() => {
            debug!(%key, "releasing waiter for shutdown");
            Err(TakeError::Expired)
        }
    };
    metrics::QUEUE_WAIT_SECONDS.observe(started.elapsed().as_secs_f64());
    taken.context(NotFoundSnafu { key })
}

async fn append(
    State(state): State<QueueState>,
    Path(key): Path<String>,
    Query(params): Query<AppendParams>,
) -> ApiResult<()> {
    let result = checked_key(key).and_then(|key| {
        let value = params
            .v
            .filter(|v| !v.is_empty())
            .context(InvalidArgumentSnafu {
                reason: "missing value parameter `v`",
            })?;
        state.store.append(&key, value);
        debug!(%key, "value appended");
        Ok(())
    });
    metrics::record(Op::Append, Outcome::of(&result));
    result
}

async fn unsupported(method: Method) -> ApiError {
    metrics::record(Op::Other, Outcome::Unsupported);
    UnsupportedSnafu {
        method: method.to_string(),
    }
    .build()
}

async fn malformed_path(method: Method, uri: Uri) -> ApiError {
    if method != Method::GET && method != Method::PUT {
        return unsupported(method).await;
    }
    metrics::record(Op::Other, Outcome::Invalid);
    InvalidArgumentSnafu {
        reason: format!("path {} must name exactly one key", uri.path()),
    }
    .build()
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;

    fn router(store: &SharedStore) -> Router {
        queue_routes(Router::new(), Arc::clone(store), CancellationToken::new())
    }

    async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn parked(store: &SharedStore, key: &str) {
        while store.waiting(key) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn put_then_get_drains_in_order() {
        let store = SharedStore::default();
        let app = router(&store);

        assert_eq!(send(&app, Method::PUT, "/a?v=x").await, (StatusCode::OK, String::new()));
        assert_eq!(send(&app, Method::PUT, "/a?v=z").await.0, StatusCode::OK);

        assert_eq!(send(&app, Method::GET, "/a").await, (StatusCode::OK, "x".to_string()));
        assert_eq!(send(&app, Method::GET, "/a").await, (StatusCode::OK, "z".to_string()));

        let (status, body) = send(&app, Method::GET, "/a").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn put_requires_non_empty_value() {
        let store = SharedStore::default();
        let app = router(&store);

        assert_eq!(send(&app, Method::PUT, "/a").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(send(&app, Method::PUT, "/a?v=").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(store.backlog_len("a"), 0);
    }

    #[tokio::test]
    async fn malformed_paths_are_bad_requests() {
        let store = SharedStore::default();
        store.append("a", "x".to_string());
        let app = router(&store);

        for uri in ["/", "/a/b", "/a/", "/a/b?v=1"] {
            assert_eq!(send(&app, Method::GET, uri).await.0, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(send(&app, Method::PUT, uri).await.0, StatusCode::BAD_REQUEST, "{uri}");
        }
        assert_eq!(store.backlog_len("a"), 1);
    }

    #[tokio::test]
    async fn other_methods_are_not_implemented() {
        let app = router(&SharedStore::default());

        assert_eq!(send(&app, Method::POST, "/a").await.0, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(send(&app, Method::DELETE, "/a").await.0, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(send(&app, Method::PATCH, "/a/b").await.0, StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn head_is_not_implemented_and_takes_nothing() {
        let store = SharedStore::default();
        store.append("a", "x".to_string());
        let app = router(&store);

        for uri in ["/a", "/a?timeout=5", "/a/b"] {
            assert_eq!(send(&app, Method::HEAD, uri).await.0, StatusCode::NOT_IMPLEMENTED, "{uri}");
        }
        assert_eq!(store.backlog_len("a"), 1);
        assert_eq!(send(&app, Method::GET, "/a").await, (StatusCode::OK, "x".to_string()));
    }

    #[tokio::test]
    async fn timeout_must_be_whole_seconds() {
        let app = router(&SharedStore::default());

        for uri in ["/a?timeout=abc", "/a?timeout=-1", "/a?timeout=1.5"] {
            assert_eq!(send(&app, Method::GET, uri).await.0, StatusCode::BAD_REQUEST, "{uri}");
        }
        assert_eq!(send(&app, Method::GET, "/a?timeout=").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn buffered_value_returns_without_waiting() {
        let store = SharedStore::default();
        let app = router(&store);
        send(&app, Method::PUT, "/a?v=y").await;

        let started = Instant::now();
        let got = send(&app, Method::GET, "/a?timeout=30").await;

        assert_eq!(got, (StatusCode::OK, "y".to_string()));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_get_times_out_as_not_found() {
        let app = router(&SharedStore::default());

        let started = Instant::now();
        let (status, _) = send(&app, Method::GET, "/b?timeout=1").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn put_hands_value_to_waiting_get() {
        let store = SharedStore::default();
        let app = router(&store);

        let waiting = tokio::spawn({
            let app = app.clone();
            async move { send(&app, Method::GET, "/a?timeout=60").await }
        });
        parked(&store, "a").await;

        assert_eq!(send(&app, Method::PUT, "/a?v=v").await.0, StatusCode::OK);
        assert_eq!(send(&app, Method::GET, "/a").await.0, StatusCode::NOT_FOUND);
        assert_eq!(waiting.await.unwrap(), (StatusCode::OK, "v".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_waiting_get() {
        let store = SharedStore::default();
        let shutdown = CancellationToken::new();
        let app = queue_routes(Router::new(), Arc::clone(&store), shutdown.clone());

        let started = Instant::now();
        let waiting = tokio::spawn({
            let app = app.clone();
            async move { send(&app, Method::GET, "/a?timeout=3600").await }
        });
        parked(&store, "a").await;

        shutdown.cancel();

        assert_eq!(waiting.await.unwrap().0, StatusCode::NOT_FOUND);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(store.waiting("a"), 0);

        send(&app, Method::PUT, "/a?v=kept").await;
        assert_eq!(store.backlog_len("a"), 1);
    }
}
