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

//! Resilience supervisor for the serving loop.
//!
//! ```text
//!            start()                      failure / failed probe
//!  Stopped ───────────► Running ────────────────────────────► RestartScheduled
//!     ▲                    ▲                                        │
//!     │ stop() / budget    │          relaunch succeeded            │
//!     │ exhausted          └────────────────────────────────────────┤
//!     └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! At most `max_restart_attempts` automatic restarts are made per cooldown
//! window. The window opens at the first attempt and the count returns to
//! zero once more than `cooldown` has passed since then. An exhausted
//! supervisor that was started deliberately keeps accepting failure reports
//! and liveness checks, and relaunches the loop once the window has passed.

use crate::config::SupervisorConfig;
use async_trait::async_trait;
use hostbridge_core::CallError;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorPhase {
    Stopped,
    Running,
    RestartScheduled,
}

/// Reported by a serving loop when it ends without being asked to.
#[derive(Debug, Clone)]
pub struct LoopExit {
    /// Generation passed to the `launch` that started the loop.
    pub generation: u64,
    pub reason: String,
}

/// The supervised service.
#[async_trait]
pub trait ServingLoop: Send + Sync {
    fn name(&self) -> &str;

    /// Start serving. Returns once the loop is up; unexpected termination is
    /// reported later through `exits`.
    async fn launch(
        &self,
        generation: u64,
        exits: mpsc::UnboundedSender<LoopExit>,
    ) -> anyhow::Result<()>;

    /// Stop serving. Must not report a [`LoopExit`].
    async fn shutdown(&self);

    async fn is_responsive(&self) -> bool;
}

/// Outcome of handling a failure or probe that did not exhaust the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Nothing to do: not running, or the report was stale.
    Ignored,
    /// Probe found the loop responsive.
    Healthy,
    /// Loop stopped and left stopped because auto-restart is off.
    AutoRestartDisabled,
    Restarted { attempt: u32 },
}

/// Attempt accounting over a cooldown window.
#[derive(Debug, Clone)]
pub struct RestartBudget {
    max_attempts: u32,
    cooldown: Duration,
    attempts: u32,
    window_started: Option<Instant>,
}

impl RestartBudget {
    pub fn new(max_attempts: u32, cooldown: Duration) -> Self {
        Self {
            max_attempts,
            cooldown,
            attempts: 0,
            window_started: None,
        }
    }

    fn refresh(&mut self, now: Instant) {
        if let Some(started) = self.window_started {
            if now.saturating_duration_since(started) > self.cooldown {
                self.attempts = 0;
                self.window_started = None;
            }
        }
    }

    /// Spend one attempt. Returns the attempt number within the window, or
    /// the time left until the window closes when none are left.
    pub fn try_acquire(&mut self, now: Instant) -> Result<u32, Duration> {
        self.refresh(now);
        if self.attempts >= self.max_attempts {
            let retry_after = self
                .window_started
                .map(|started| (started + self.cooldown).saturating_duration_since(now))
                .unwrap_or_default();
            return Err(retry_after);
        }
        if self.window_started.is_none() {
            self.window_started = Some(now);
        }
        self.attempts += 1;
        Ok(self.attempts)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub service: String,
    pub phase: SupervisorPhase,
    pub restart_attempts_in_window: u32,
    pub total_restarts: u64,
    pub exhausted: bool,
    pub resume_after_interruption: bool,
    pub interrupted: bool,
    pub last_failure: Option<String>,
    pub generation: u64,
}

struct SupervisorState {
    phase: SupervisorPhase,
    budget: RestartBudget,
    generation: u64,
    resume_after_interruption: bool,
    interrupted: bool,
    exhausted: bool,
    total_restarts: u64,
    last_failure: Option<String>,
}

impl SupervisorState {
    /// Stopped by an exhausted budget while a deliberate start still stands.
    fn awaiting_budget(&self) -> bool {
        self.phase == SupervisorPhase::Stopped
            && self.exhausted
            && self.resume_after_interruption
            && !self.interrupted
    }
}

pub struct Supervisor {
    service: Arc<dyn ServingLoop>,
    config: SupervisorConfig,
    state: Mutex<SupervisorState>,
    phase_tx: watch::Sender<SupervisorPhase>,
    exit_tx: mpsc::UnboundedSender<LoopExit>,
    exit_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<LoopExit>>>,
    monitors_started: AtomicBool,
    background: CancellationToken,
}

impl Supervisor {
    pub fn new(service: Arc<dyn ServingLoop>, config: SupervisorConfig) -> Arc<Self> {
        let (phase_tx, _) = watch::channel(SupervisorPhase::Stopped);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            service,
            state: Mutex::new(SupervisorState {
                phase: SupervisorPhase::Stopped,
                budget: RestartBudget::new(config.max_restart_attempts, config.cooldown()),
                generation: 0,
                resume_after_interruption: false,
                interrupted: false,
                exhausted: false,
                total_restarts: 0,
                last_failure: None,
            }),
            config,
            phase_tx,
            exit_tx,
            exit_rx: parking_lot::Mutex::new(Some(exit_rx)),
            monitors_started: AtomicBool::new(false),
            background: CancellationToken::new(),
        })
    }

    pub fn phase(&self) -> SupervisorPhase {
        *self.phase_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorPhase> {
        self.phase_tx.subscribe()
    }

    /// Deliberately start the serving loop.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        self.spawn_monitors();

        let mut state = self.state.lock().await;
        if state.phase == SupervisorPhase::Running {
            return Ok(());
        }
        state.resume_after_interruption = true;
        self.launch_locked(&mut state).await?;
        state.exhausted = false;
        tracing::info!(service = %self.service.name(), generation = state.generation, "Serving loop started");
        Ok(())
    }

    /// Deliberately stop the serving loop. Clears the resume-after-
    /// interruption flag.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.resume_after_interruption = false;
        if state.phase != SupervisorPhase::Stopped {
            self.service.shutdown().await;
            self.set_phase(&mut state, SupervisorPhase::Stopped);
            tracing::info!(service = %self.service.name(), "Serving loop stopped");
        }
    }

    /// Stop the loop and the background exit watcher and liveness probe.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.background.cancel();
    }

    /// Report an unexpected failure of the running loop.
    pub async fn handle_failure(&self, reason: &str) -> Result<RestartDecision, CallError> {
        self.fail(None, reason, Instant::now()).await
    }

    /// As [`handle_failure`](Self::handle_failure), at an explicit instant.
    pub async fn handle_failure_at(
        &self,
        reason: &str,
        now: Instant,
    ) -> Result<RestartDecision, CallError> {
        self.fail(None, reason, now).await
    }

    /// Check the loop once; a running loop that does not respond is treated
    /// as failed. While the budget is exhausted this retries the relaunch.
    pub async fn probe_liveness(&self) -> Result<RestartDecision, CallError> {
        let generation = {
            let state = self.state.lock().await;
            if state.awaiting_budget() {
                drop(state);
                return self
                    .fail(None, "restart budget exhausted", Instant::now())
                    .await;
            }
            if state.phase != SupervisorPhase::Running {
                return Ok(RestartDecision::Ignored);
            }
            state.generation
        };
        if self.service.is_responsive().await {
            return Ok(RestartDecision::Healthy);
        }
        self.fail(Some(generation), "liveness probe failed", Instant::now())
            .await
    }

    /// The host is about to reload. A running loop is stopped but will be
    /// resumed by [`end_interruption`](Self::end_interruption).
    pub async fn begin_interruption(&self) {
        let mut state = self.state.lock().await;
        if state.interrupted {
            return;
        }
        state.interrupted = true;
        if state.phase != SupervisorPhase::Stopped {
            tracing::info!(service = %self.service.name(), "Pausing serving loop for host interruption");
            self.service.shutdown().await;
            self.set_phase(&mut state, SupervisorPhase::Stopped);
        }
    }

    /// The host finished reloading. Returns whether the loop was resumed.
    pub async fn end_interruption(&self) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        if !state.interrupted {
            return Ok(false);
        }
        state.interrupted = false;
        if !state.resume_after_interruption || state.phase != SupervisorPhase::Stopped {
            return Ok(false);
        }
        self.launch_locked(&mut state).await?;
        state.exhausted = false;
        tracing::info!(service = %self.service.name(), "Serving loop resumed after host interruption");
        Ok(true)
    }

    pub async fn status(&self) -> SupervisorStatus {
        let state = self.state.lock().await;
        SupervisorStatus {
            service: self.service.name().to_string(),
            phase: state.phase,
            restart_attempts_in_window: state.budget.attempts(),
            total_restarts: state.total_restarts,
            exhausted: state.exhausted,
            resume_after_interruption: state.resume_after_interruption,
            interrupted: state.interrupted,
            last_failure: state.last_failure.clone(),
            generation: state.generation,
        }
    }

    async fn fail(
        &self,
        generation: Option<u64>,
        reason: &str,
        now: Instant,
    ) -> Result<RestartDecision, CallError> {
        let mut state = self.state.lock().await;
        // Exits tagged with a generation come from a loop that is already
        // gone once the budget ran out.
        let retrying = state.awaiting_budget() && generation.is_none();
        if retrying {
            tracing::debug!(service = %self.service.name(), reason, "Retrying exhausted serving loop");
        } else {
            if state.phase != SupervisorPhase::Running {
                return Ok(RestartDecision::Ignored);
            }
            if generation.is_some_and(|g| g != state.generation) {
                return Ok(RestartDecision::Ignored);
            }
            state.last_failure = Some(reason.to_string());
            tracing::warn!(service = %self.service.name(), reason, "Serving loop failed");
            self.service.shutdown().await;
        }

        if !self.config.auto_restart {
            self.set_phase(&mut state, SupervisorPhase::Stopped);
            return Ok(RestartDecision::AutoRestartDisabled);
        }

        self.set_phase(&mut state, SupervisorPhase::RestartScheduled);
        let mut attempt_at = now;
        loop {
            let attempt = match state.budget.try_acquire(attempt_at) {
                Ok(attempt) => attempt,
                Err(retry_after) => {
                    self.set_phase(&mut state, SupervisorPhase::Stopped);
                    let err = CallError::SupervisorExhausted {
                        attempts: state.budget.attempts(),
                        retry_after_ms: retry_after.as_millis() as u64,
                    };
                    if state.exhausted {
                        tracing::debug!(service = %self.service.name(), error = %err, "Restart budget still exhausted");
                    } else {
                        tracing::error!(service = %self.service.name(), error = %err, "Giving up on serving loop");
                    }
                    state.exhausted = true;
                    return Err(err);
                }
            };

            let delay = self.config.restart_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.launch_locked(&mut state).await {
                Ok(()) => {
                    state.exhausted = false;
                    state.total_restarts += 1;
                    tracing::info!(
                        service = %self.service.name(),
                        attempt,
                        max_attempts = self.config.max_restart_attempts,
                        "Serving loop restarted"
                    );
                    return Ok(RestartDecision::Restarted { attempt });
                }
                Err(e) => {
                    tracing::warn!(service = %self.service.name(), attempt, error = %e, "Relaunch failed");
                    self.set_phase(&mut state, SupervisorPhase::RestartScheduled);
                    attempt_at = attempt_at.max(Instant::now());
                }
            }
        }
    }

    async fn launch_locked(&self, state: &mut SupervisorState) -> anyhow::Result<()> {
        state.generation += 1;
        match self
            .service
            .launch(state.generation, self.exit_tx.clone())
            .await
        {
            Ok(()) => {
                self.set_phase(state, SupervisorPhase::Running);
                Ok(())
            }
            Err(e) => {
                self.set_phase(state, SupervisorPhase::Stopped);
                Err(e)
            }
        }
    }

    fn set_phase(&self, state: &mut SupervisorState, phase: SupervisorPhase) {
        if state.phase != phase {
            tracing::debug!(from = ?state.phase, to = ?phase, "Supervisor phase change");
            state.phase = phase;
            self.phase_tx.send_replace(phase);
        }
    }

    fn spawn_monitors(self: &Arc<Self>) {
        if self.monitors_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(mut exits) = self.exit_rx.lock().take() else {
            return;
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let cancel = self.background.clone();
        tokio::spawn(async move {
            loop {
                let exit = tokio::select! {
                    _ = cancel.cancelled() => break,
                    exit = exits.recv() => exit,
                };
                let Some(exit) = exit else { break };
                let Some(supervisor) = weak.upgrade() else { break };
                let _ = supervisor
                    .fail(Some(exit.generation), &exit.reason, Instant::now())
                    .await;
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        let cancel = self.background.clone();
        let period = self.config.liveness_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(supervisor) = weak.upgrade() else { break };
                let _ = supervisor.probe_liveness().await;
            }
        });
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.background.cancel();
    }
}
