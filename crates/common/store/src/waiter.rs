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

use tokio::{
    sync::oneshot,
    time::{Instant, timeout_at},
};

use crate::{TakeError, store::QueueStore};

/// The store-side half of a parked consumer: a single-use delivery slot.
pub(crate) struct Waiter<V> {
    pub(crate) id: u64,
    slot:          oneshot::Sender<V>,
}

impl<V> Waiter<V> {
    pub(crate) fn new(id: u64) -> (Self, oneshot::Receiver<V>) {
        let (slot, rx) = oneshot::channel();
        (Self { id, slot }, rx)
    }

    /// Hands `value` over without blocking. Gives it back if the consumer is
    /// gone.
    pub(crate) fn deliver(self, value: V) -> Result<(), V> { self.slot.send(value) }
}

/// The consumer-side half of a parked consumer.
///
/// Whatever ends the wait (delivery, deadline, or the owning future being
/// dropped) settles the waiter exactly once. Settling without a delivery takes
/// the store lock and removes the waiter from its waitlist; if it is no longer
/// there, an `append` already filled the slot and the value is read from it.
pub(crate) struct Parked<'a, V> {
    store:   &'a QueueStore<V>,
    key:     &'a str,
    id:      u64,
    rx:      oneshot::Receiver<V>,
    settled: bool,
}

impl<'a, V> Parked<'a, V> {
    pub(crate) const fn new(
        store: &'a QueueStore<V>,
        key: &'a str,
        id: u64,
        rx: oneshot::Receiver<V>,
    ) -> Self {
        Self {
            store,
            key,
            id,
            rx,
            settled: false,
        }
    }

    pub(crate) async fn wait_until(mut self, deadline: Instant) -> Result<V, TakeError> {
        match timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(value)) => {
                self.settled = true;
                Ok(value)
            }
            // The sender only disappears after delivering or after this
            // waiter removed itself, so a closed slot is handled like expiry.
            Ok(Err(_)) | Err(_) => self.expire(),
        }
    }

    fn expire(mut self) -> Result<V, TakeError> {
        self.settled = true;
        let mut inner = self.store.lock();
        if inner.unpark(self.key, self.id) {
            return Err(TakeError::Expired);
        }
        // Append won the race: the value is already sitting in the slot.
        self.rx.try_recv().map_err(|_| TakeError::Expired)
    }
}

impl<V> Drop for Parked<'_, V> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.store.lock();
        if inner.unpark(self.key, self.id) {
            return;
        }
        if let Ok(value) = self.rx.try_recv() {
            inner.redeliver(self.key, value);
        }
    }
}
