//! OS-level input hooks. A hook only forwards *that* something happened through an [InputSink];
//! key codes, pointer buttons and scroll deltas are dropped at the boundary.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{CounterState, InputError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Keystroke,
    MouseMove { x: i32, y: i32 },
    MouseClick,
    Scroll,
}

/// Handle given to a hook for reporting events. Cheap to clone, safe to call from the listener
/// thread.
#[derive(Clone)]
pub struct InputSink {
    pub(super) state: Arc<Mutex<CounterState>>,
}

impl InputSink {
    pub fn record(&self, kind: InputKind) {
        self.state.lock().record(kind);
    }
}

/// Capability every platform input provider implements.
#[cfg_attr(test, mockall::automock)]
pub trait InputHook: Send {
    /// Installs the hook. Events are reported through `sink` until [InputHook::stop] is called.
    fn start(&mut self, sink: InputSink) -> Result<(), InputError>;

    fn stop(&mut self);
}

/// Picks the hook compiled into this build.
pub fn platform_hook() -> Box<dyn InputHook> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "input")] {
            Box::new(rdev_hook::RdevHook::new())
        } else {
            Box::new(UnavailableHook)
        }
    }
}

/// Stand-in for builds without an input provider. Starting it always fails, which puts the tracker
/// into no-input-tracking mode.
pub struct UnavailableHook;

impl InputHook for UnavailableHook {
    fn start(&mut self, _sink: InputSink) -> Result<(), InputError> {
        Err(InputError::Unavailable(
            "built without the `input` feature".into(),
        ))
    }

    fn stop(&mut self) {}
}

#[cfg(feature = "input")]
pub mod rdev_hook {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            mpsc, Arc,
        },
        thread,
        time::Duration,
    };

    use rdev::{listen, Event, EventType};
    use tracing::{error, info};

    use super::{InputHook, InputKind, InputSink};
    use crate::daemon::input::InputError;

    /// A failing `listen` call returns almost immediately. If nothing came back within this window
    /// the hook is considered installed.
    const STARTUP_GRACE: Duration = Duration::from_millis(500);

    /// Global listener based on rdev. `rdev::listen` blocks its thread forever and can't be
    /// unregistered, so stopping only detaches the sink and the thread parks itself in the hook.
    pub struct RdevHook {
        enabled: Arc<AtomicBool>,
        started: bool,
    }

    impl RdevHook {
        pub fn new() -> Self {
            Self {
                enabled: Arc::new(AtomicBool::new(false)),
                started: false,
            }
        }
    }

    impl Default for RdevHook {
        fn default() -> Self {
            Self::new()
        }
    }

    fn classify_event(event: &EventType) -> Option<InputKind> {
        match event {
            EventType::KeyPress(_) => Some(InputKind::Keystroke),
            EventType::ButtonPress(_) => Some(InputKind::MouseClick),
            EventType::MouseMove { x, y } => Some(InputKind::MouseMove {
                x: *x as i32,
                y: *y as i32,
            }),
            EventType::Wheel { .. } => Some(InputKind::Scroll),
            _ => None,
        }
    }

    impl InputHook for RdevHook {
        fn start(&mut self, sink: InputSink) -> Result<(), InputError> {
            if self.started {
                self.enabled.store(true, Ordering::SeqCst);
                return Ok(());
            }

            let (failure_sender, failure_receiver) = mpsc::channel();
            let enabled = self.enabled.clone();
            enabled.store(true, Ordering::SeqCst);

            thread::Builder::new()
                .name("worktrace-input".into())
                .spawn(move || {
                    let listener_enabled = enabled.clone();
                    let result = listen(move |event: Event| {
                        if !listener_enabled.load(Ordering::Relaxed) {
                            return;
                        }
                        if let Some(kind) = classify_event(&event.event_type) {
                            sink.record(kind);
                        }
                    });
                    if let Err(e) = result {
                        enabled.store(false, Ordering::SeqCst);
                        let _ = failure_sender.send(format!("{e:?}"));
                    }
                })
                .map_err(|e| InputError::Unavailable(e.to_string()))?;

            match failure_receiver.recv_timeout(STARTUP_GRACE) {
                Ok(reason) => {
                    error!("Input listener refused to start {reason}");
                    Err(InputError::PermissionDenied(reason))
                }
                Err(_) => {
                    info!("Input listener installed");
                    self.started = true;
                    Ok(())
                }
            }
        }

        fn stop(&mut self) {
            self.enabled.store(false, Ordering::SeqCst);
        }
    }
}
