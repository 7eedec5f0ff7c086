//! Click scheduler
//!
//! A dedicated thread turns the configured rate into evenly spaced input
//! injections. Callers steer it only through the control surface
//! (`activate`, `deactivate`, `toggle`, `invalidate`, `shutdown`), which
//! flips flags and returns immediately; all timing state lives on the
//! scheduler thread.

pub mod cadence;
pub mod wait;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::arbiter::SchedulerControl;
use crate::config::{Output, Rate, RuntimeConfig, ValidationError};
use crate::constants::{BLOCKED_POLL_INTERVAL, INACTIVE_POLL_INTERVAL, SHUTDOWN_TIMEOUT};
use crate::focus_detector::OwnWindow;
use crate::input_simulator::InputInjector;
use crate::status::{StatusEvent, StatusSender};
use crate::ClickerError;

use cadence::{Cadence, RateTracker, Step};
use wait::Signals;

/// Pull-based source of validated configuration snapshots.
pub type ConfigProvider = Box<dyn Fn() -> Result<RuntimeConfig, ValidationError> + Send>;

/// Handle to the scheduler thread and its control surface.
pub struct ClickScheduler {
    signals: Arc<Signals>,
    status: StatusSender,
    thread: Mutex<Option<(JoinHandle<()>, mpsc::Receiver<()>)>>,
}

impl ClickScheduler {
    /// Start the scheduler thread. It idles until the first `activate`.
    pub fn spawn(
        provider: ConfigProvider,
        injector: Arc<dyn InputInjector>,
        own_window: OwnWindow,
        status: StatusSender,
    ) -> Result<Self, ClickerError> {
        let signals = Arc::new(Signals::new());
        let (exit_tx, exit_rx) = mpsc::channel();

        let worker = Worker {
            provider,
            injector,
            own_window,
            signals: signals.clone(),
            status: status.clone(),
            state: SchedulerState::default(),
        };

        let handle = thread::Builder::new()
            .name("click-scheduler".to_string())
            .spawn(move || {
                worker.run();
                let _ = exit_tx.send(());
            })
            .map_err(|e| ClickerError::Thread(e.to_string()))?;

        debug!("Click scheduler started");
        Ok(Self {
            signals,
            status,
            thread: Mutex::new(Some((handle, exit_rx))),
        })
    }

    pub fn is_active(&self) -> bool {
        self.signals.is_active()
    }

    /// Start (or restart) clicking. Re-activating a running scheduler still
    /// drops its rate and deadline caches and re-announces the status.
    pub fn activate(&self, reason: &str) {
        self.status
            .send(StatusEvent::running(format!("Running ({})", reason)));
        self.signals.set_active(true);
        debug!("Clicker started | reason={}", reason);
    }

    pub fn deactivate(&self, reason: &str) {
        self.status.send(StatusEvent::stopped());
        self.signals.set_active(false);
        debug!("Clicker stopped | reason={}", reason);
    }

    pub fn toggle(&self) {
        let status = &self.status;
        let active = self.signals.toggle(|active| {
            status.send(if active {
                StatusEvent::running("Running (toggle bind)")
            } else {
                StatusEvent::stopped()
            });
        });
        debug!("Clicker toggled | active={}", active);
    }

    /// Mark the cached configuration stale and wake the loop.
    pub fn invalidate(&self) {
        self.signals.invalidate();
    }

    /// Stop the loop and wait for it to exit, up to [`SHUTDOWN_TIMEOUT`].
    /// Returns whether the thread exited in time.
    pub fn shutdown(&self) -> bool {
        self.signals.request_shutdown();

        let Some((handle, exited)) = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return true;
        };

        match exited.recv_timeout(SHUTDOWN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    error!("Click scheduler thread panicked");
                }
                debug!("Click scheduler closed");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Click scheduler did not stop within {:?}, detaching",
                    SHUTDOWN_TIMEOUT
                );
                false
            }
        }
    }
}

impl Drop for ClickScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SchedulerControl for ClickScheduler {
    fn activate(&self, reason: &str) {
        ClickScheduler::activate(self, reason);
    }

    fn deactivate(&self, reason: &str) {
        ClickScheduler::deactivate(self, reason);
    }

    fn toggle(&self) {
        ClickScheduler::toggle(self);
    }
}

/// State owned by the scheduler thread.
#[derive(Debug, Default)]
struct SchedulerState {
    config: Option<RuntimeConfig>,
    rate: RateTracker,
    cadence: Cadence,
    /// `None` until the first focus check of a run
    blocked: Option<bool>,
    running: bool,
}

impl SchedulerState {
    /// Fresh run: no config, no deadline history.
    fn start(&mut self) {
        self.running = true;
        self.config = None;
        self.rate.reset();
        self.cadence.restart();
        self.blocked = None;
    }

    fn stop(&mut self) {
        self.running = false;
        self.rate.reset();
        self.cadence.restart();
        self.blocked = None;
    }

    /// Drop rate/deadline caches but keep the spacing from the last click.
    fn reset_caches(&mut self) {
        self.rate.reset();
        self.cadence.reset();
        self.blocked = None;
    }
}

struct Worker {
    provider: ConfigProvider,
    injector: Arc<dyn InputInjector>,
    own_window: OwnWindow,
    signals: Arc<Signals>,
    status: StatusSender,
    state: SchedulerState,
}

impl Worker {
    fn run(mut self) {
        debug!("Scheduler loop entered");
        let mut rng = StdRng::from_entropy();

        while !self.signals.is_shutdown() {
            if !self.signals.wait_for_activation(INACTIVE_POLL_INTERVAL) {
                if self.state.running {
                    self.state.stop();
                }
                continue;
            }
            self.tick(&mut rng);
        }

        debug!("Scheduler loop exited");
    }

    fn tick(&mut self, rng: &mut StdRng) {
        if !self.state.running {
            self.state.start();
        }
        if self.signals.take_reset() {
            self.state.reset_caches();
        }

        let stale = self.signals.take_dirty();
        if stale || self.state.config.is_none() {
            match (self.provider)() {
                Ok(config) => {
                    debug!("Runtime config loaded: {:?}", config.rate);
                    self.state.config = Some(config);
                    self.state.reset_caches();
                }
                Err(err) => {
                    warn!("Runtime config invalid: {}", err);
                    self.status
                        .send(StatusEvent::error(format!("Config error: {}", err)));
                    self.halt();
                    return;
                }
            }
        }

        let (rate, output) = match &self.state.config {
            Some(config) => (config.rate, config.output),
            None => return,
        };

        if self.own_window.pointer_inside() {
            if self.state.blocked != Some(true) {
                info!("Clicking paused, cursor is over the app window");
                self.status
                    .send(StatusEvent::running("Running (blocked: cursor in app)"));
            }
            self.state.blocked = Some(true);
            self.state.rate.reset();
            self.state.cadence.reset();
            self.signals
                .wait_until(Instant::now() + BLOCKED_POLL_INTERVAL);
            return;
        }
        if self.state.blocked == Some(true) {
            info!("Clicking resumed");
            self.status.send(StatusEvent::running("Running"));
        }
        self.state.blocked = Some(false);

        let now = Instant::now();
        let period = match rate {
            Rate::Static {
                base_rate,
                variance,
            } => self.state.rate.period(base_rate, variance, now, rng),
            Rate::Interval { period } => period,
        };

        match self.state.cadence.next_step(now, period) {
            Step::Wait(deadline) => {
                self.signals.wait_until(deadline);
            }
            Step::Fire => match self.signals.fire_if_active(|| self.inject(output)) {
                // Deactivated or reconfigured while checking focus
                None => {}
                Some(Ok(())) => {
                    trace!("Fired {:?}", output);
                    self.state.cadence.fired(now, period);
                }
                Some(Err(err)) => {
                    error!("Input send failed, stopping clicker: {}", err);
                    self.status.send(StatusEvent::error("Input send failed"));
                    self.halt();
                }
            },
        }
    }

    fn inject(&self, output: Output) -> Result<(), ClickerError> {
        match output {
            Output::Mouse(button) => self.injector.click(button),
            Output::Keyboard { physical_code } => self.injector.key_tap(physical_code),
        }
    }

    /// Stop the current run after a failure. The error event already sent
    /// is left as the latest status.
    fn halt(&mut self) {
        self.signals.set_active(false);
        self.state.stop();
        self.state.config = None;
    }
}
