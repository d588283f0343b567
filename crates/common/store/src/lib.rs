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

//! In-memory, per-key FIFO value queues.
//!
//! A [`QueueStore`] keeps, for every key, a backlog of undelivered values and
//! a waitlist of parked consumers. Producers call [`QueueStore::append`];
//! consumers either take what is buffered right now
//! ([`QueueStore::take_now`]) or park until a value arrives or a deadline
//! passes ([`QueueStore::take_waiting`], [`QueueStore::take_until`]).
//!
//! ```rust
//! use std::time::Duration;
//!
//! use keyq_store::{QueueStore, TakeError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = QueueStore::new();
//! store.append("jobs", "first".to_string());
//!
//! assert_eq!(store.take_now("jobs"), Ok("first".to_string()));
//! assert_eq!(store.take_now("jobs"), Err(TakeError::NotFound));
//! assert_eq!(
//!     store.take_waiting("jobs", Duration::ZERO).await,
//!     Err(TakeError::Expired)
//! );
//! # }
//! ```

mod error;
mod store;
mod waiter;

pub use error::{Result, TakeError};
pub use store::QueueStore;
