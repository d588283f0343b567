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

//! Panic reporting through tracing, plus optional deadlock detection.

#[cfg(feature = "deadlock_detection")]
use std::time::Duration;
use std::{
    panic::{self, PanicHookInfo},
    sync::{LazyLock, Once},
};

use backtrace::Backtrace;
use prometheus::{IntCounter, register_int_counter};

/// Panics observed since startup.
pub static PANIC_COUNTER: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("keyq_panics_total", "Total number of panics").unwrap()
});

/// Install a panic hook that logs the panic, its location and a backtrace as
/// an error event and bumps [`PANIC_COUNTER`] before running the previous
/// hook.
///
/// Idempotent: only the first call installs anything.
pub fn set_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let default_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            log_panic(info);
            PANIC_COUNTER.inc();
            default_hook(info);
        }));

        #[cfg(feature = "deadlock_detection")]
        spawn_deadlock_detector();
    });
}

fn log_panic(info: &PanicHookInfo<'_>) {
    let backtrace = format!("{:?}", Backtrace::new());
    match info.location() {
        Some(location) => tracing::error!(
            message = %info,
            backtrace = %backtrace,
            panic.file = location.file(),
            panic.line = location.line(),
            panic.column = location.column(),
        ),
        None => tracing::error!(message = %info, backtrace = %backtrace),
    }
}

/// Reports parking_lot deadlocks every five seconds.
#[cfg(feature = "deadlock_detection")]
fn spawn_deadlock_detector() {
    let _ = std::thread::Builder::new()
        .name("deadlock-detector".to_string())
        .spawn(|| {
            loop {
                std::thread::sleep(Duration::from_secs(5));
                let deadlocks = parking_lot::deadlock::check_deadlock();
                if deadlocks.is_empty() {
                    continue;
                }

                tracing::error!("{} deadlocks detected", deadlocks.len());
                for (i, threads) in deadlocks.iter().enumerate() {
                    tracing::error!("Deadlock #{}", i);
                    for t in threads {
                        tracing::error!("Thread Id {:#?}", t.thread_id());
                        tracing::error!("{:#?}", t.backtrace());
                    }
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_counts_panics_and_can_be_installed_twice() {
        set_panic_hook();
        set_panic_hook();

        let before = PANIC_COUNTER.get();
        let result = std::panic::catch_unwind(|| panic!("boom"));

        assert!(result.is_err());
        assert!(PANIC_COUNTER.get() > before);
    }
}
