//! Counting of global keyboard and mouse activity.
//!
//! The listener context owned by the [hook::InputHook] touches nothing but a [CounterState]
//! guarded by one mutex. The control loop drains it through [InputActivity::flush] and reads idle
//! time from it.

pub mod hook;

use std::{sync::Arc, time::Instant};

use hook::{InputHook, InputKind, InputSink};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use super::storage::entities::InputCounts;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    /// The OS refused to install the hook, usually for lack of accessibility permission.
    #[error("Input hook permission denied: {0}")]
    PermissionDenied(String),
    #[error("Input hook unavailable: {0}")]
    Unavailable(String),
}

/// Read side of the input counters as seen by the presence detector and the control loop.
#[cfg_attr(test, mockall::automock)]
pub trait InputActivity: Send + Sync {
    /// Returns the counts accumulated since the previous flush and resets them.
    fn flush(&self) -> InputCounts;

    /// Seconds since the last captured event. Reading it is not an event.
    fn seconds_since_input(&self) -> f64;

    /// Last pointer position reported by the hook.
    fn pointer_position(&self) -> Option<(i32, i32)>;
}

pub(crate) struct CounterState {
    counts: InputCounts,
    last_input: Instant,
    pointer: Option<(i32, i32)>,
}

impl CounterState {
    fn new() -> Self {
        Self {
            counts: InputCounts::default(),
            last_input: Instant::now(),
            pointer: None,
        }
    }

    pub(crate) fn record(&mut self, kind: InputKind) {
        match kind {
            InputKind::Keystroke => self.counts.keystrokes += 1,
            InputKind::MouseMove { x, y } => {
                self.counts.mouse_moves += 1;
                self.pointer = Some((x, y));
            }
            InputKind::MouseClick => self.counts.mouse_clicks += 1,
            InputKind::Scroll => self.counts.scroll_events += 1,
        }
        self.last_input = Instant::now();
    }
}

pub struct InputEventCounter {
    state: Arc<Mutex<CounterState>>,
    hook: Mutex<Box<dyn InputHook>>,
    running: Mutex<bool>,
}

impl InputEventCounter {
    pub fn new(hook: Box<dyn InputHook>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CounterState::new())),
            hook: Mutex::new(hook),
            running: Mutex::new(false),
        }
    }

    /// Installs the hook. Calling it while already running is a no-op.
    pub fn start(&self) -> Result<(), InputError> {
        let mut running = self.running.lock();
        if *running {
            return Ok(());
        }
        self.hook.lock().start(self.sink())?;
        *running = true;
        info!("Input tracking started");
        Ok(())
    }

    /// Releases the hook. Safe to call repeatedly and on counters that never started.
    pub fn stop(&self) {
        let mut running = self.running.lock();
        if !*running {
            return;
        }
        self.hook.lock().stop();
        *running = false;
        info!("Input tracking stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Sink that feeds this counter. Hooks receive one on start.
    pub fn sink(&self) -> InputSink {
        InputSink {
            state: self.state.clone(),
        }
    }
}

impl InputActivity for InputEventCounter {
    fn flush(&self) -> InputCounts {
        std::mem::take(&mut self.state.lock().counts)
    }

    fn seconds_since_input(&self) -> f64 {
        self.state.lock().last_input.elapsed().as_secs_f64()
    }

    fn pointer_position(&self) -> Option<(i32, i32)> {
        self.state.lock().pointer
    }
}

impl Drop for InputEventCounter {
    fn drop(&mut self) {
        if *self.running.get_mut() {
            warn!("Input counter dropped while running, releasing hook");
            self.hook.get_mut().stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::{
        hook::{InputKind, MockInputHook},
        InputActivity, InputError, InputEventCounter,
    };
    use crate::daemon::storage::entities::InputCounts;

    fn idle_hook() -> Box<MockInputHook> {
        let mut hook = MockInputHook::new();
        hook.expect_start().returning(|_| Ok(()));
        hook.expect_stop().return_const(());
        Box::new(hook)
    }

    #[test]
    fn test_flush_resets_counts() {
        let counter = InputEventCounter::new(idle_hook());
        let sink = counter.sink();
        sink.record(InputKind::Keystroke);
        sink.record(InputKind::Keystroke);
        sink.record(InputKind::MouseClick);
        sink.record(InputKind::Scroll);
        sink.record(InputKind::MouseMove { x: 10, y: 20 });

        assert_eq!(
            counter.flush(),
            InputCounts {
                keystrokes: 2,
                mouse_moves: 1,
                mouse_clicks: 1,
                scroll_events: 1,
            }
        );
        assert!(counter.flush().is_empty());
        assert_eq!(counter.pointer_position(), Some((10, 20)));
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let counter = Arc::new(InputEventCounter::new(idle_hook()));
        let writers = (0..4)
            .map(|_| {
                let sink = counter.sink();
                thread::spawn(move || {
                    for _ in 0..5000 {
                        sink.record(InputKind::Keystroke);
                        sink.record(InputKind::Scroll);
                    }
                })
            })
            .collect::<Vec<_>>();

        let mut total = InputCounts::default();
        while writers.iter().any(|w| !w.is_finished()) {
            total += counter.flush();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        total += counter.flush();

        assert_eq!(total.keystrokes, 20_000);
        assert_eq!(total.scroll_events, 20_000);
    }

    #[test]
    fn test_reading_idle_time_is_not_input() {
        let counter = InputEventCounter::new(idle_hook());
        thread::sleep(Duration::from_millis(30));
        let first = counter.seconds_since_input();
        let second = counter.seconds_since_input();
        assert!(first >= 0.03);
        assert!(second >= first);

        counter.sink().record(InputKind::Keystroke);
        assert!(counter.seconds_since_input() < first);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut hook = MockInputHook::new();
        hook.expect_start().times(1).returning(|_| Ok(()));
        hook.expect_stop().times(1).return_const(());
        let counter = InputEventCounter::new(Box::new(hook));

        counter.start().unwrap();
        counter.start().unwrap();
        assert!(counter.is_running());
        counter.stop();
        counter.stop();
        assert!(!counter.is_running());
    }

    #[test]
    fn test_permission_denied_leaves_counter_stopped() {
        let mut hook = MockInputHook::new();
        hook.expect_start()
            .returning(|_| Err(InputError::PermissionDenied("accessibility".into())));
        hook.expect_stop().never();
        let counter = InputEventCounter::new(Box::new(hook));

        assert_eq!(
            counter.start(),
            Err(InputError::PermissionDenied("accessibility".into()))
        );
        assert!(!counter.is_running());
    }

    #[test]
    fn test_drop_releases_running_hook() {
        let mut hook = MockInputHook::new();
        hook.expect_start().returning(|_| Ok(()));
        hook.expect_stop().times(1).return_const(());
        let counter = InputEventCounter::new(Box::new(hook));
        counter.start().unwrap();
        drop(counter);
    }
}
