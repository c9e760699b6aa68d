//! Away-from-keyboard detection. [PresenceDetector] is a two state machine fed by idle time:
//! Active switches to Away once idle time reaches the threshold and back as soon as it drops below.
//! Without an input source the detector stays Active.

use std::{ffi::OsStr, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, info};

use crate::utils::{clock::Clock, time::to_epoch_seconds};

use super::input::InputActivity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Active,
    Away,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    AfkStart {
        started_at: DateTime<Utc>,
        claude_active: bool,
    },
    AfkEnd {
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        duration_s: f64,
        claude_active: bool,
    },
}

/// Answers whether some process is running. Implementations must swallow their own failures.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessProbe: Send + Sync {
    /// True if a process whose name or command line contains `name_substring` is running.
    fn is_process_running(&self, name_substring: &str) -> bool;
}

/// [ProcessProbe] backed by a sysinfo process snapshot.
pub struct SystemProcessProbe;

impl ProcessProbe for SystemProcessProbe {
    fn is_process_running(&self, name_substring: &str) -> bool {
        if name_substring.is_empty() {
            return false;
        }
        let contains = |value: &OsStr| value.to_string_lossy().contains(name_substring);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
        );
        let found = system
            .processes()
            .values()
            .any(|process| {
                contains(process.name()) || process.cmd().iter().any(|arg| contains(arg.as_os_str()))
            });
        debug!("Process matching {name_substring:?} running: {found}");
        found
    }
}

pub struct PresenceDetector {
    input: Option<Arc<dyn InputActivity>>,
    probe: Box<dyn ProcessProbe>,
    clock: Arc<dyn Clock>,
    threshold_s: f64,
    watched_process: String,
    afk_start: Option<DateTime<Utc>>,
}

impl PresenceDetector {
    pub fn new(
        input: Option<Arc<dyn InputActivity>>,
        probe: Box<dyn ProcessProbe>,
        clock: Arc<dyn Clock>,
        threshold_s: u64,
        watched_process: String,
    ) -> Self {
        Self {
            input,
            probe,
            clock,
            threshold_s: threshold_s as f64,
            watched_process,
            afk_start: None,
        }
    }

    pub fn state(&self) -> PresenceState {
        match self.afk_start {
            Some(_) => PresenceState::Away,
            None => PresenceState::Active,
        }
    }

    pub fn is_away(&self) -> bool {
        self.state() == PresenceState::Away
    }

    /// Start of the current away period, if any.
    pub fn afk_start(&self) -> Option<DateTime<Utc>> {
        self.afk_start
    }

    pub fn sample_watched_process(&self) -> bool {
        self.probe.is_process_running(&self.watched_process)
    }

    /// Evaluates idle time once and reports a transition if one happened. Never blocks beyond the
    /// process probe and never emits two events of the same kind in a row.
    pub fn check(&mut self) -> Option<PresenceEvent> {
        let idle = self.input.as_ref()?.seconds_since_input();
        let now = self.clock.time();

        match self.afk_start {
            None if idle >= self.threshold_s => {
                let started_at = now - Duration::milliseconds((idle * 1000.) as i64);
                let claude_active = self.sample_watched_process();
                self.afk_start = Some(started_at);
                info!("User went away at {started_at} (watched process running: {claude_active})");
                Some(PresenceEvent::AfkStart {
                    started_at,
                    claude_active,
                })
            }
            Some(started_at) if idle < self.threshold_s => {
                let duration_s = to_epoch_seconds(now) - to_epoch_seconds(started_at);
                let claude_active = self.sample_watched_process();
                self.afk_start = None;
                info!("User returned after {duration_s:.0}s");
                Some(PresenceEvent::AfkEnd {
                    started_at,
                    ended_at: now,
                    duration_s,
                    claude_active,
                })
            }
            _ => None,
        }
    }
}
