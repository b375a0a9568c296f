//! Build session: state machine, single-flight guard and failure gate
//!
//! The session is the explicit context object every pipeline call goes
//! through; nothing about the current build lives in ambient storage. All
//! failures are recovered here into a [`BuildResult`] - the pipeline stays
//! usable after any single failure.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::bootstrap::Bootstrapper;
use crate::errors::PipelineError;
use crate::models::{AppEvent, BoardProfile, BuildPhase, BuildResult};
use crate::ports::PortMonitor;
use crate::toolchain::Dispatcher;

struct SessionInner {
    phase: BuildPhase,
    /// Bumped on every edit; a completion observing a stale epoch lands in
    /// `Unverified` no matter what the tool reported.
    epoch: u64,
    /// Set on any failed attempt; gates further requests until
    /// `acknowledge` is called.
    unacknowledged: bool,
    /// Backs the "show details" affordance; session-held only.
    last_result: Option<BuildResult>,
}

/// Orchestrates verify/flash requests for one workspace.
pub struct BuildSession {
    inner: Mutex<SessionInner>,
    dispatcher: Arc<Dispatcher>,
    bootstrapper: Arc<Bootstrapper>,
    monitor: Arc<Mutex<PortMonitor>>,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl BuildSession {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        bootstrapper: Arc<Bootstrapper>,
        monitor: Arc<Mutex<PortMonitor>>,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                phase: BuildPhase::Unverified,
                epoch: 0,
                unacknowledged: false,
                last_result: None,
            }),
            dispatcher,
            bootstrapper,
            monitor,
            events,
        }
    }

    pub fn phase(&self) -> BuildPhase {
        self.inner.lock().expect("session lock").phase
    }

    /// Detail of the last attempt, for the expandable panel.
    pub fn last_result(&self) -> Option<BuildResult> {
        self.inner.lock().expect("session lock").last_result.clone()
    }

    pub fn port_monitor(&self) -> &Arc<Mutex<PortMonitor>> {
        &self.monitor
    }

    /// The editor reports a source edit: whatever was verified no longer is.
    ///
    /// While an operation is in flight the busy phase is kept (it is the
    /// single-flight guard); the epoch bump makes the eventual completion
    /// land in `Unverified` anyway.
    pub fn notify_edit(&self) {
        let mut inner = self.inner.lock().expect("session lock");
        inner.epoch += 1;
        if !inner.phase.is_busy() && inner.phase != BuildPhase::Unverified {
            inner.phase = BuildPhase::Unverified;
            let _ = self.events.send(AppEvent::PhaseChanged(BuildPhase::Unverified));
        }
    }

    /// The user dismissed the failure message. Failed phases collapse to
    /// `Unverified` (a failed flash forces re-verification) and the retained
    /// detail is dropped.
    pub fn acknowledge(&self) {
        let mut inner = self.inner.lock().expect("session lock");
        inner.unacknowledged = false;
        inner.last_result = None;
        if inner.phase.needs_acknowledge() {
            inner.phase = BuildPhase::Unverified;
            let _ = self.events.send(AppEvent::PhaseChanged(BuildPhase::Unverified));
        }
    }

    /// Compile-only step. Never fails the caller; failures come back as an
    /// unverified [`BuildResult`].
    pub async fn verify(&self, profile: &BoardProfile, source: &str) -> BuildResult {
        let (entry_phase, epoch) = match self.begin(BuildPhase::Verifying) {
            Ok(captured) => captured,
            Err(rejection) => return rejection,
        };

        let outcome = self.dispatcher.verify(profile, source).await;
        self.finish_verify(entry_phase, epoch, outcome).await
    }

    /// Upload step. Gated on a fresh verify and a real port selection.
    pub async fn flash(&self, profile: &BoardProfile, source: &str) -> BuildResult {
        let (port, epoch) = {
            let mut inner = self.inner.lock().expect("session lock");
            if inner.unacknowledged {
                drop(inner);
                return self.reject(&PipelineError::FailureNotAcknowledged);
            }
            if inner.phase.is_busy() {
                drop(inner);
                return self.reject(&PipelineError::OperationInFlight);
            }
            if inner.phase != BuildPhase::Verified {
                let result = BuildResult::from_error(&PipelineError::NotVerified);
                inner.unacknowledged = true;
                inner.last_result = Some(result.clone());
                let _ = self.events.send(AppEvent::BuildFinished(result.clone()));
                return result;
            }
            inner.phase = BuildPhase::Flashing;
            let _ = self.events.send(AppEvent::PhaseChanged(BuildPhase::Flashing));

            // Selection captured by value here; a concurrent poll can no
            // longer change what this invocation uses.
            let port = self
                .monitor
                .lock()
                .expect("port monitor lock")
                .selection()
                .clone();
            (port, inner.epoch)
        };

        let outcome = self.dispatcher.flash(profile, source, &port).await;
        self.finish_flash(BuildPhase::Verified, epoch, outcome).await
    }

    /// Atomically check the gates and enter a busy phase.
    fn begin(&self, busy: BuildPhase) -> Result<(BuildPhase, u64), BuildResult> {
        let mut inner = self.inner.lock().expect("session lock");
        if inner.unacknowledged {
            drop(inner);
            return Err(self.reject(&PipelineError::FailureNotAcknowledged));
        }
        if inner.phase.is_busy() {
            drop(inner);
            return Err(self.reject(&PipelineError::OperationInFlight));
        }
        let entry = inner.phase;
        inner.phase = busy;
        let _ = self.events.send(AppEvent::PhaseChanged(busy));
        Ok((entry, inner.epoch))
    }

    /// A gate rejection: reported, but not recorded as the pending failure.
    fn reject(&self, err: &PipelineError) -> BuildResult {
        let result = BuildResult::from_error(err);
        let _ = self.events.send(AppEvent::Warning(err.to_string()));
        result
    }

    async fn finish_verify(
        &self,
        entry_phase: BuildPhase,
        epoch: u64,
        outcome: crate::errors::Result<BuildResult>,
    ) -> BuildResult {
        let (result, next_phase) = match outcome {
            Ok(result) => (result, BuildPhase::Verified),
            Err(PipelineError::EnvironmentNotReady) => {
                self.trigger_bootstrap().await;
                // The original request is aborted, not queued; the user
                // retries once the install finished.
                (
                    BuildResult::from_error(&PipelineError::EnvironmentNotReady),
                    entry_phase,
                )
            }
            Err(err @ PipelineError::Compilation { .. }) => {
                (BuildResult::from_error(&err), BuildPhase::VerifyFailed)
            }
            // The tool never ran against the program; the previous phase
            // still describes reality.
            Err(err) => (BuildResult::from_error(&err), entry_phase),
        };

        self.settle(result, next_phase, epoch)
    }

    async fn finish_flash(
        &self,
        entry_phase: BuildPhase,
        epoch: u64,
        outcome: crate::errors::Result<BuildResult>,
    ) -> BuildResult {
        let (result, next_phase) = match outcome {
            Ok(result) => (result, BuildPhase::Flashed),
            Err(PipelineError::EnvironmentNotReady) => {
                self.trigger_bootstrap().await;
                (
                    BuildResult::from_error(&PipelineError::EnvironmentNotReady),
                    entry_phase,
                )
            }
            Err(err @ PipelineError::Upload { .. }) => {
                (BuildResult::from_error(&err), BuildPhase::FlashFailed)
            }
            // No flash attempt reached the hardware (no port, no volume,
            // unstartable tool): the verify still stands.
            Err(err) => (BuildResult::from_error(&err), entry_phase),
        };

        self.settle(result, next_phase, epoch)
    }

    /// Record the outcome and land in the right phase, honoring edits that
    /// arrived while the operation was in flight.
    fn settle(&self, result: BuildResult, next_phase: BuildPhase, epoch: u64) -> BuildResult {
        let mut inner = self.inner.lock().expect("session lock");
        let phase = if inner.epoch != epoch {
            BuildPhase::Unverified
        } else {
            next_phase
        };
        inner.phase = phase;
        if !result.verified {
            inner.unacknowledged = true;
        }
        inner.last_result = Some(result.clone());
        let _ = self.events.send(AppEvent::PhaseChanged(phase));
        let _ = self.events.send(AppEvent::BuildFinished(result.clone()));
        result
    }

    async fn trigger_bootstrap(&self) {
        log::info!("Environment not ready, starting bootstrap");
        if let Err(e) = self.bootstrapper.ensure_environment().await {
            let _ = self.events.send(AppEvent::Error(e.to_string()));
        }
    }
}
