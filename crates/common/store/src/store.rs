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

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::{
    Result, TakeError,
    waiter::{Parked, Waiter},
};

/// Stand-in deadline for waits too long to represent on the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A process-wide set of independent FIFO queues, one per key.
///
/// One lock guards both the backlogs and the waitlists of every key. It is
/// only ever held for bookkeeping; parked consumers wait outside of it.
/// Share the store behind an [`Arc`](std::sync::Arc).
pub struct QueueStore<V = String> {
    inner: Mutex<Inner<V>>,
}

pub(crate) struct Inner<V> {
    /// Undelivered values per key, oldest first.
    backlog:        HashMap<String, VecDeque<V>>,
    /// Parked consumers per key, oldest first.
    waiters:        HashMap<String, VecDeque<Waiter<V>>>,
    next_waiter_id: u64,
}

impl<V> Default for QueueStore<V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                backlog:        HashMap::new(),
                waiters:        HashMap::new(),
                next_waiter_id: 0,
            }),
        }
    }
}

impl<V> QueueStore<V> {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner<V>> { self.inner.lock() }

    /// Appends `value` to the queue under `key`.
    ///
    /// If consumers are parked on `key`, the oldest one receives the value
    /// directly and the backlog is left untouched. Never blocks and never
    /// fails.
    pub fn append(&self, key: &str, value: V) {
        let mut inner = self.lock();
        if let Some(value) = inner.hand_off(key, value) {
            inner
                .backlog
                .entry(key.to_owned())
                .or_default()
                .push_back(value);
        }
    }

    /// Removes and returns the oldest buffered value under `key`.
    ///
    /// Returns [`TakeError::NotFound`] if nothing is buffered.
    pub fn take_now(&self, key: &str) -> Result<V> {
        self.lock().pop_backlog(key).ok_or(TakeError::NotFound)
    }

    /// Like [`take_until`](Self::take_until) with a deadline `timeout` from
    /// now.
    pub async fn take_waiting(&self, key: &str, timeout: Duration) -> Result<V> {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.take_until(key, deadline).await
    }

    /// Takes the oldest value under `key`, waiting for one to be appended if
    /// none is buffered.
    ///
    /// A buffered value is returned without parking. Otherwise the caller
    /// joins the tail of the key's waitlist and is woken by the first
    /// [`append`](Self::append) that reaches it, or gets
    /// [`TakeError::Expired`] once `deadline` passes. A deadline that has
    /// already passed returns right after the backlog check.
    ///
    /// Dropping the returned future removes the waiter; a value that was
    /// already handed to it goes back to the head of the queue.
    pub async fn take_until(&self, key: &str, deadline: Instant) -> Result<V> {
        let parked = {
            let mut inner = self.lock();
            if let Some(value) = inner.pop_backlog(key) {
                return Ok(value);
            }
            if deadline <= Instant::now() {
                return Err(TakeError::Expired);
            }
            let (id, rx) = inner.park(key);
            Parked::new(self, key, id, rx)
        };
        parked.wait_until(deadline).await
    }

    /// Number of values buffered under `key`.
    pub fn backlog_len(&self, key: &str) -> usize {
        self.lock().backlog.get(key).map_or(0, VecDeque::len)
    }

    /// Number of consumers parked on `key`.
    pub fn waiting(&self, key: &str) -> usize {
        self.lock().waiters.get(key).map_or(0, VecDeque::len)
    }
}

impl<V> Inner<V> {
    fn pop_backlog(&mut self, key: &str) -> Option<V> {
        let values = self.backlog.get_mut(key)?;
        let value = values.pop_front();
        if values.is_empty() {
            self.backlog.remove(key);
        }
        value
    }

    /// Gives `value` to the oldest live waiter on `key`, skipping waiters
    /// whose consumer has gone away. Returns the value if nobody took it.
    fn hand_off(&mut self, key: &str, value: V) -> Option<V> {
        let Some(waiters) = self.waiters.get_mut(key) else {
            return Some(value);
        };
        let mut pending = value;
        let leftover = loop {
            let Some(waiter) = waiters.pop_front() else {
                break Some(pending);
            };
            match waiter.deliver(pending) {
                Ok(()) => break None,
                Err(value) => pending = value,
            }
        };
        if waiters.is_empty() {
            self.waiters.remove(key);
        }
        leftover
    }

    fn park(&mut self, key: &str) -> (u64, tokio::sync::oneshot::Receiver<V>) {
        let id = self.next_waiter_id;
        self.next_waiter_id = self.next_waiter_id.wrapping_add(1);
        let (waiter, rx) = Waiter::new(id);
        self.waiters
            .entry(key.to_owned())
            .or_default()
            .push_back(waiter);
        (id, rx)
    }

    /// Removes waiter `id` from the waitlist of `key`. Returns `false` if an
    /// append already popped it.
    pub(crate) fn unpark(&mut self, key: &str, id: u64) -> bool {
        let Some(waiters) = self.waiters.get_mut(key) else {
            return false;
        };
        let Some(pos) = waiters.iter().position(|w| w.id == id) else {
            return false;
        };
        waiters.remove(pos);
        if waiters.is_empty() {
            self.waiters.remove(key);
        }
        true
    }

    /// Returns a value a departed waiter never observed: to the next waiter
    /// if there is one, otherwise to the head of the backlog.
    pub(crate) fn redeliver(&mut self, key: &str, value: V) {
        if let Some(value) = self.hand_off(key, value) {
            self.backlog
                .entry(key.to_owned())
                .or_default()
                .push_front(value);
        }
    }
}
