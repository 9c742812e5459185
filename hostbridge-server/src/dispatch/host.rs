// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Host-side tick plumbing.
//!
//! An embedding host drives [`DispatchQueue::drain_tick`] from its own main
//! loop. [`HostThread`] is a stand-in for that loop: a dedicated OS thread
//! that ticks on a fixed period or as soon as a tick is requested.

use super::queue::DispatchQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Asks the host to run a tick soon. Called after every enqueue.
pub trait TickRequester: Send + Sync {
    fn request_tick(&self);
}

/// For hosts that tick unconditionally.
pub struct NoopTick;

impl TickRequester for NoopTick {
    fn request_tick(&self) {}
}

/// Condvar-backed wake flag.
#[derive(Default)]
pub struct TickSignal {
    requested: Mutex<bool>,
    condvar: Condvar,
}

impl TickSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until a tick is requested or `timeout` passes. Returns whether
    /// a request was pending, and clears it.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut requested = self.requested.lock();
        if !*requested {
            let _ = self.condvar.wait_for(&mut requested, timeout);
        }
        std::mem::replace(&mut *requested, false)
    }
}

impl TickRequester for TickSignal {
    fn request_tick(&self) {
        *self.requested.lock() = true;
        self.condvar.notify_one();
    }
}

/// A dedicated OS thread acting as the host's main loop.
pub struct HostThread {
    stop: Arc<AtomicBool>,
    signal: Arc<TickSignal>,
    handle: Option<JoinHandle<()>>,
}

impl HostThread {
    pub fn spawn(
        queue: Arc<DispatchQueue>,
        signal: Arc<TickSignal>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_signal = Arc::clone(&signal);

        let handle = std::thread::Builder::new()
            .name("hostbridge-host".to_string())
            .spawn(move || {
                tracing::info!(interval_ms = interval.as_millis() as u64, "Host thread started");
                while !thread_stop.load(Ordering::Acquire) {
                    thread_signal.wait(interval);
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    if let Err(e) = queue.drain_tick() {
                        tracing::error!(error = %e, "Host thread cannot drain the queue");
                        break;
                    }
                }
                tracing::info!("Host thread stopped");
            })?;

        Ok(Self {
            stop,
            signal,
            handle: Some(handle),
        })
    }

    /// Stop ticking and join the thread.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.signal.request_tick();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Host thread panicked");
            }
        }
    }
}

impl Drop for HostThread {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_signal_wakes_waiter() {
        let signal = Arc::new(TickSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || {
                let started = Instant::now();
                let requested = signal.wait(Duration::from_secs(5));
                (requested, started.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        signal.request_tick();

        let (requested, elapsed) = waiter.join().unwrap();
        assert!(requested);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_times_out_without_request() {
        let signal = TickSignal::new();
        assert!(!signal.wait(Duration::from_millis(5)));
    }

    #[test]
    fn test_pending_request_consumed_once() {
        let signal = TickSignal::new();
        signal.request_tick();
        assert!(signal.wait(Duration::from_millis(1)));
        assert!(!signal.wait(Duration::from_millis(1)));
    }
}
