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

use std::{sync::Arc, time::Duration};

use keyq_store::{QueueStore, TakeError};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn append_racing_expiry_delivers_exactly_once() {
    let store: Arc<QueueStore> = Arc::new(QueueStore::new());

    for round in 0..200 {
        let key = format!("race-{round}");
        let value = format!("v{round}");

        let consumer = tokio::spawn({
            let store = Arc::clone(&store);
            let key = key.clone();
            async move { store.take_waiting(&key, Duration::from_millis(1)).await }
        });
        let producer = tokio::spawn({
            let store = Arc::clone(&store);
            let key = key.clone();
            let value = value.clone();
            async move {
                tokio::time::sleep(Duration::from_micros(round % 3 * 500)).await;
                store.append(&key, value);
            }
        });
        producer.await.unwrap();

        let received = consumer.await.unwrap();
        let buffered = store.take_now(&key);
        match (received, buffered) {
            (Ok(got), Err(TakeError::NotFound)) | (Err(TakeError::Expired), Ok(got)) => {
                assert_eq!(got, value);
            }
            other => panic!("round {round}: value lost or duplicated: {other:?}"),
        }
        assert_eq!(store.waiting(&key), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_and_consumers_lose_nothing() {
    let store: Arc<QueueStore<u32>> = Arc::new(QueueStore::new());
    let producers = 4;
    let per_producer = 250;

    let consumers: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut got = Vec::new();
                while let Ok(v) = store.take_waiting("shared", Duration::from_millis(200)).await {
                    got.push(v);
                }
                got
            })
        })
        .collect();

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..per_producer {
                    store.append("shared", p * per_producer + i);
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let mut all = Vec::new();
    for consumer in consumers {
        all.extend(consumer.await.unwrap());
    }
    while let Ok(v) = store.take_now("shared") {
        all.push(v);
    }
    all.sort_unstable();

    let expected: Vec<u32> = (0..producers * per_producer).collect();
    assert_eq!(all, expected);
}

#[tokio::test]
async fn immediate_then_bounded_retrieval_scenario() {
    let store: QueueStore = QueueStore::new();

    store.append("a", "x".to_string());
    assert_eq!(store.take_now("a").unwrap(), "x");
    assert_eq!(store.take_now("a"), Err(TakeError::NotFound));

    store.append("a", "y".to_string());
    let start = tokio::time::Instant::now();
    let got = store.take_waiting("a", Duration::from_secs(5)).await.unwrap();
    assert_eq!(got, "y");
    assert!(start.elapsed() < Duration::from_secs(1));
}
