//! Control flags shared between the scheduler's control surface and its
//! loop, plus the interruptible wait built on them.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::FINE_WAIT_WINDOW;

#[derive(Debug)]
struct Flags {
    active: bool,
    shutdown: bool,
    /// Cached runtime config is stale
    dirty: bool,
    /// Rate/deadline caches must be dropped (set by activate/deactivate)
    reset: bool,
}

impl Flags {
    fn interrupts_wait(&self) -> bool {
        self.shutdown || !self.active || self.dirty || self.reset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The deadline was reached
    Elapsed,
    /// Something the loop must react to changed first
    Interrupted,
}

/// Flag block guarded by a mutex, with a condition variable to wake the loop.
///
/// Every setter only flips flags and notifies. A setter may wait for an
/// injection already running under [`Signals::fire_if_active`], never for
/// the loop itself.
#[derive(Debug)]
pub struct Signals {
    flags: Mutex<Flags>,
    wake: Condvar,
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

impl Signals {
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(Flags {
                active: false,
                shutdown: false,
                dirty: true,
                reset: false,
            }),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    pub fn set_active(&self, active: bool) {
        let mut flags = self.lock();
        flags.active = active && !flags.shutdown;
        flags.reset = true;
        self.wake.notify_all();
    }

    /// Flip the active flag. `announce` runs with the new state while the
    /// flags are still held, so status events stay ordered with the flip.
    pub fn toggle(&self, announce: impl FnOnce(bool)) -> bool {
        let mut flags = self.lock();
        let active = !flags.active && !flags.shutdown;
        flags.active = active;
        flags.reset = true;
        announce(active);
        self.wake.notify_all();
        active
    }

    pub fn invalidate(&self) {
        self.lock().dirty = true;
        self.wake.notify_all();
    }

    pub fn request_shutdown(&self) {
        let mut flags = self.lock();
        flags.shutdown = true;
        flags.active = false;
        self.wake.notify_all();
    }

    /// Clear and return the stale-config flag.
    pub fn take_dirty(&self) -> bool {
        std::mem::take(&mut self.lock().dirty)
    }

    /// Clear and return the cache-reset flag.
    pub fn take_reset(&self) -> bool {
        std::mem::take(&mut self.lock().reset)
    }

    /// Run `fire` while holding the flags, unless the loop has something to
    /// react to first. Once `set_active(false)` returns, no `fire` is running
    /// and none will start.
    pub fn fire_if_active<T>(&self, fire: impl FnOnce() -> T) -> Option<T> {
        let flags = self.lock();
        if flags.interrupts_wait() {
            return None;
        }
        Some(fire())
    }

    /// Block for at most `timeout` until the scheduler is active or shutting
    /// down. Returns whether it is active.
    pub fn wait_for_activation(&self, timeout: Duration) -> bool {
        let flags = self.lock();
        let (flags, _) = self
            .wake
            .wait_timeout_while(flags, timeout, |f| !f.active && !f.shutdown)
            .unwrap_or_else(PoisonError::into_inner);
        flags.active && !flags.shutdown
    }

    /// Sleep until `deadline`, returning early on deactivation, shutdown,
    /// invalidation or reactivation.
    ///
    /// Most of the wait is a condvar sleep; the last [`FINE_WAIT_WINDOW`]
    /// yields in a loop for accuracy.
    pub fn wait_until(&self, deadline: Instant) -> WaitOutcome {
        let mut flags = self.lock();
        loop {
            if flags.interrupts_wait() {
                return WaitOutcome::Interrupted;
            }

            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::Elapsed;
            }

            let remaining = deadline - now;
            if remaining > FINE_WAIT_WINDOW {
                flags = self
                    .wake
                    .wait_timeout(flags, remaining - FINE_WAIT_WINDOW)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|e| e.into_inner().0);
            } else {
                drop(flags);
                thread::yield_now();
                flags = self.lock();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_wait_elapses_when_undisturbed() {
        let signals = Signals::new();
        signals.set_active(true);
        signals.take_dirty();
        signals.take_reset();

        let start = Instant::now();
        let outcome = signals.wait_until(start + Duration::from_millis(30));
        assert_eq!(outcome, WaitOutcome::Elapsed);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_is_interrupted_by_invalidate() {
        let signals = Arc::new(Signals::new());
        signals.set_active(true);
        signals.take_dirty();
        signals.take_reset();

        let remote = signals.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.invalidate();
        });

        let start = Instant::now();
        let outcome = signals.wait_until(start + Duration::from_secs(5));
        assert_eq!(outcome, WaitOutcome::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(1));
        waker.join().unwrap();
    }

    #[test]
    fn test_wait_is_interrupted_by_deactivate() {
        let signals = Arc::new(Signals::new());
        signals.set_active(true);
        signals.take_dirty();
        signals.take_reset();

        let remote = signals.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.set_active(false);
        });

        let start = Instant::now();
        assert_eq!(
            signals.wait_until(start + Duration::from_secs(5)),
            WaitOutcome::Interrupted
        );
        assert!(start.elapsed() < Duration::from_secs(1));
        waker.join().unwrap();
    }

    #[test]
    fn test_toggle_flips_and_announces() {
        let signals = Signals::new();
        let mut seen = Vec::new();
        assert!(signals.toggle(|active| seen.push(active)));
        assert!(!signals.toggle(|active| seen.push(active)));
        assert_eq!(seen, vec![true, false]);
    }

    #[test]
    fn test_shutdown_blocks_activation() {
        let signals = Signals::new();
        signals.request_shutdown();
        signals.set_active(true);
        assert!(!signals.is_active());
        assert!(!signals.wait_for_activation(Duration::from_millis(5)));
    }

    #[test]
    fn test_fire_only_runs_while_active() {
        let signals = Signals::new();
        assert_eq!(signals.fire_if_active(|| 1), None);

        signals.set_active(true);
        signals.take_dirty();
        signals.take_reset();
        assert_eq!(signals.fire_if_active(|| 2), Some(2));

        // Pending reconfiguration is handled before the next fire.
        signals.invalidate();
        assert_eq!(signals.fire_if_active(|| 3), None);
        signals.take_dirty();

        signals.set_active(false);
        assert_eq!(signals.fire_if_active(|| 4), None);
    }

    #[test]
    fn test_deactivate_waits_for_running_fire() {
        let signals = Arc::new(Signals::new());
        signals.set_active(true);
        signals.take_dirty();
        signals.take_reset();

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let remote = signals.clone();
        let firing = thread::spawn(move || {
            remote.fire_if_active(|| {
                entered_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(30));
                Instant::now()
            })
        });

        entered_rx.recv().unwrap();
        signals.set_active(false);
        let deactivated = Instant::now();
        let fired = firing.join().unwrap().unwrap();
        assert!(fired <= deactivated);
        assert_eq!(signals.fire_if_active(|| ()), None);
    }

    #[test]
    fn test_take_flags_clear_them() {
        let signals = Signals::new();
        assert!(signals.take_dirty());
        assert!(!signals.take_dirty());

        signals.set_active(true);
        assert!(signals.take_reset());
        assert!(!signals.take_reset());
    }
}
