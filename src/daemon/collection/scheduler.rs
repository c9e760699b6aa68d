use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    daemon::{
        capture::{
            arena::{purge_expired, ScreenshotArena},
            CaptureError, ScreenCapturer,
        },
        classifier::{ClassificationResult, ContextClassifier},
        config::TrackerConfig,
        input::InputActivity,
        presence::{PresenceDetector, PresenceEvent},
        registry::{merge_project_names, ProjectRegistry},
        storage::{
            activity_store::{ActivityStore, StoreError},
            entities::{ActivityWindow, InputAggregate, Region, ScreenshotRecord},
        },
    },
    utils::{
        clock::Clock,
        time::{minute_bucket, to_epoch_seconds},
    },
};

/// Cadences and capture parameters of the control loop.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub screenshot_interval: Duration,
    pub input_flush_interval: Duration,
    pub registry_refresh: Duration,
    pub region_px: u32,
    pub quality: u8,
    pub retention_days: u32,
    /// Names tracked regardless of what the registry reports.
    pub projects: Vec<String>,
}

impl From<&TrackerConfig> for SchedulerSettings {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            tick: config.tick(),
            screenshot_interval: config.screenshot_interval(),
            input_flush_interval: config.input_aggregate_interval(),
            registry_refresh: config.registry_refresh(),
            region_px: config.screenshot_region_px,
            quality: config.screenshot_quality,
            retention_days: config.retention_days,
            projects: config.projects.clone(),
        }
    }
}

struct OpenWindow {
    id: i64,
    project: Option<Arc<str>>,
}

/// Last time each periodic action fired. An action that never fired is due immediately.
#[derive(Default)]
struct LastFired {
    screenshot: Option<Instant>,
    input_flush: Option<Instant>,
    registry: Option<Instant>,
}

fn is_due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    last.map_or(true, |last| now.duration_since(last) >= interval)
}

/// The control loop. Each tick runs, in order, the screenshot and classification action, the
/// input flush and the presence check. Nothing a periodic action does can end the loop, only the
/// shutdown token does.
pub struct CaptureScheduler {
    store: Box<dyn ActivityStore>,
    input: Arc<dyn InputActivity>,
    presence: PresenceDetector,
    classifier: ContextClassifier,
    capturer: Box<dyn ScreenCapturer>,
    arena: ScreenshotArena,
    registry: Option<Box<dyn ProjectRegistry>>,
    /// Last list the registry answered with, reused while it is unreachable.
    fetched_projects: Vec<String>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    settings: SchedulerSettings,
    open_window: Option<OpenWindow>,
    last_fired: LastFired,
}

impl CaptureScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Box<dyn ActivityStore>,
        input: Arc<dyn InputActivity>,
        presence: PresenceDetector,
        mut classifier: ContextClassifier,
        capturer: Box<dyn ScreenCapturer>,
        arena: ScreenshotArena,
        registry: Option<Box<dyn ProjectRegistry>>,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
        settings: SchedulerSettings,
    ) -> Self {
        classifier.set_project_names(settings.projects.clone());
        Self {
            store,
            input,
            presence,
            classifier,
            capturer,
            arena,
            registry,
            fetched_projects: vec![],
            clock,
            shutdown,
            settings,
            open_window: None,
            last_fired: LastFired::default(),
        }
    }

    /// Executes the control loop until the shutdown token is cancelled, then closes whatever is
    /// still open.
    pub async fn run(mut self) {
        info!(
            "Tracker running: screenshots every {:?}, input flush every {:?}",
            self.settings.screenshot_interval, self.settings.input_flush_interval
        );
        let mut tick_point = self.clock.instant();
        loop {
            tick_point += self.settings.tick;

            self.tick().instrument(info_span!("Tick")).await;

            // A slow tick delays the next one instead of queueing a burst of catch-up ticks.
            let now = self.clock.instant();
            if tick_point < now {
                tick_point = now;
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.clock.sleep_until(tick_point) => ()
            }
        }
        self.drain();
    }

    async fn tick(&mut self) {
        let now = self.clock.instant();
        let away = self.presence.is_away();

        if self.registry.is_some()
            && is_due(self.last_fired.registry, self.settings.registry_refresh, now)
        {
            self.last_fired.registry = Some(now);
            self.refresh_projects().await;
        }

        if is_due(self.last_fired.screenshot, self.settings.screenshot_interval, now) {
            self.last_fired.screenshot = Some(now);
            if away {
                debug!("Skipping screenshot while away");
            } else {
                self.capture_and_classify().await;
            }
        }

        if is_due(self.last_fired.input_flush, self.settings.input_flush_interval, now) {
            self.last_fired.input_flush = Some(now);
            self.flush_input(false);
        }

        self.check_presence();
    }

    async fn refresh_projects(&mut self) {
        let Some(registry) = &self.registry else {
            return;
        };
        match registry.project_names().await {
            Ok(fetched) => self.fetched_projects = fetched,
            Err(e) => warn!("Keeping the previous project list {e}"),
        }
        let names = merge_project_names(&self.settings.projects, self.fetched_projects.clone());
        info!("Tracking {} projects", names.len());
        self.classifier.set_project_names(names);
    }

    async fn capture_and_classify(&mut self) {
        let (x, y) = self.input.pointer_position().unwrap_or((0, 0));
        let region = Region::around(x, y, self.settings.region_px);
        let timestamp = self.clock.time();

        let destination = match self.arena.path_for(timestamp) {
            Ok(destination) => destination,
            Err(e) => {
                warn!("Failed to prepare screenshot directory {e}");
                return;
            }
        };
        let screenshot = match self
            .capturer
            .capture(region, destination.clone(), self.settings.quality)
            .await
        {
            Ok(()) => Some(destination),
            // Without any way to take screenshots the window title is all there is.
            Err(CaptureError::NoProvider) => {
                debug!("No screen capture provider, classifying by window title");
                None
            }
            Err(e) => {
                warn!("Screenshot failed, skipping this cycle {e}");
                return;
            }
        };

        let classification = self.classifier.classify(screenshot.as_deref()).await;
        debug!(
            "Classified {:?} as {:?} ({})",
            classification.window_title, classification.project, classification.method
        );

        if let Some(filepath) = screenshot {
            let record = ScreenshotRecord {
                filepath,
                project: classification.project.clone(),
                timestamp,
                region,
            };
            if let Err(e) = self.store.insert_screenshot(&record) {
                error!("Failed to store screenshot metadata {e}");
            }
        }

        let now = self.clock.time();
        self.reconcile_window(classification, now);
    }

    /// Keeps the open window while the project is unchanged, otherwise closes it and opens a new
    /// one starting at `now`.
    fn reconcile_window(&mut self, classification: ClassificationResult, now: DateTime<Utc>) {
        if let Some(open) = &self.open_window {
            if open.project == classification.project {
                return;
            }
        }

        if let Some(open) = self.open_window.take() {
            match self.store.close_window(open.id, now) {
                Ok(()) => info!("Closed window for {:?}", open.project),
                Err(StoreError::NoOpenRow(_)) => {
                    warn!("Window {} was already closed", open.id)
                }
                Err(e) => {
                    // The old window stays the open one, a new window would overlap it.
                    error!("Failed to close window {} {e}", open.id);
                    self.open_window = Some(open);
                    return;
                }
            }
        }

        let window = ActivityWindow {
            id: None,
            project: classification.project,
            window_title: classification.window_title,
            app_name: classification.app_name,
            confidence: classification.confidence,
            started_at: now,
            ended_at: None,
        };
        match self.store.open_window(&window) {
            Ok(id) => {
                info!("Opened window for {:?}", window.project);
                self.open_window = Some(OpenWindow {
                    id,
                    project: window.project,
                });
            }
            Err(e) => error!("Failed to open window {e}"),
        }
    }

    fn flush_input(&mut self, skip_empty: bool) {
        let counts = self.input.flush();
        if skip_empty && counts.is_empty() {
            return;
        }
        let aggregate = InputAggregate {
            minute_bucket: minute_bucket(self.clock.time()),
            counts,
        };
        match self.store.merge_input(&aggregate) {
            Ok(()) => debug!("Merged input {aggregate:?}"),
            Err(e) => error!("Failed to store input counts, dropping them {e}"),
        }
    }

    fn check_presence(&mut self) {
        let result = match self.presence.check() {
            None => return,
            Some(PresenceEvent::AfkStart {
                started_at,
                claude_active,
            }) => self.store.open_presence(started_at, claude_active).map(|_| ()),
            Some(PresenceEvent::AfkEnd {
                started_at,
                ended_at,
                duration_s,
                claude_active,
            }) => self
                .store
                .close_presence(started_at, ended_at, duration_s, claude_active),
        };
        if let Err(e) = result {
            error!("Failed to store presence change {e}");
        }
    }

    /// Persists everything still open. Runs once, after the loop stopped.
    fn drain(&mut self) {
        info!("Tracker shutting down");
        let now = self.clock.time();

        if let Some(open) = self.open_window.take() {
            if let Err(e) = self.store.close_window(open.id, now) {
                error!("Failed to close window {} on shutdown {e}", open.id);
            }
        }

        if let Some(started_at) = self.presence.afk_start() {
            let duration_s = to_epoch_seconds(now) - to_epoch_seconds(started_at);
            let claude_active = self.presence.sample_watched_process();
            if let Err(e) = self
                .store
                .close_presence(started_at, now, duration_s, claude_active)
            {
                error!("Failed to close away period on shutdown {e}");
            }
        }

        self.flush_input(true);

        purge_expired(
            &self.arena,
            self.store.as_mut(),
            self.settings.retention_days,
            now,
        );
        info!("Tracker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use anyhow::Result;
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use super::{CaptureScheduler, SchedulerSettings};
    use crate::{
        daemon::{
            capture::{arena::ScreenshotArena, CaptureError, MockScreenCapturer},
            classifier::ContextClassifier,
            config::TrackerConfig,
            input::{InputActivity, MockInputActivity},
            presence::{MockProcessProbe, PresenceDetector},
            registry::{MockProjectRegistry, RegistryError},
            storage::{
                activity_store::{
                    ActivityStore, MockActivityStore, SqliteActivityStore, StoreError,
                },
                entities::InputCounts,
            },
        },
        utils::{
            clock::{Clock, TestClock},
            logging::TEST_LOGGING,
            time::minute_bucket,
        },
        window_api::{ActiveWindowData, MockWindowManager},
    };

    const ALPHA_TITLE: &str = "foo — bar.ts — Project-Alpha";
    const BETA_TITLE: &str = "notes.md — Project-Beta";

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap()
    }

    fn settings() -> SchedulerSettings {
        let mut config = TrackerConfig::default();
        config.projects = vec!["Project-Alpha".into(), "Project-Beta".into()];
        SchedulerSettings::from(&config)
    }

    fn window(title: &str) -> ActiveWindowData {
        ActiveWindowData {
            window_title: title.into(),
            app_name: "Code".into(),
        }
    }

    fn steady_windows(title: &'static str) -> MockWindowManager {
        let mut windows = MockWindowManager::new();
        windows
            .expect_get_active_window_data()
            .returning(move || Ok(window(title)));
        windows
    }

    fn active_input() -> MockInputActivity {
        let mut input = MockInputActivity::new();
        input.expect_flush().returning(InputCounts::default);
        input.expect_seconds_since_input().return_const(0.);
        input.expect_pointer_position().return_const(Some((500, 500)));
        input
    }

    fn working_capturer() -> MockScreenCapturer {
        let mut capturer = MockScreenCapturer::new();
        capturer.expect_capture().returning(|_, _, _| Ok(()));
        capturer
    }

    struct Parts {
        store: Box<dyn ActivityStore>,
        input: MockInputActivity,
        windows: MockWindowManager,
        capturer: MockScreenCapturer,
        settings: SchedulerSettings,
    }

    fn scheduler(
        parts: Parts,
        screenshots: &Path,
        clock: &TestClock,
        shutdown: &CancellationToken,
    ) -> CaptureScheduler {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let input: Arc<dyn InputActivity> = Arc::new(parts.input);
        let mut probe = MockProcessProbe::new();
        probe.expect_is_process_running().return_const(false);
        let presence = PresenceDetector::new(
            Some(input.clone()),
            Box::new(probe),
            clock.clone(),
            180,
            "claude".into(),
        );
        let classifier =
            ContextClassifier::new(Box::new(parts.windows), None, Duration::from_secs(15));
        CaptureScheduler::new(
            parts.store,
            input,
            presence,
            classifier,
            Box::new(parts.capturer),
            ScreenshotArena::new(screenshots.to_path_buf()),
            None,
            clock,
            shutdown.clone(),
            parts.settings,
        )
    }

    async fn run_for(scheduler: CaptureScheduler, shutdown: &CancellationToken, after: Duration) {
        tokio::join!(
            async {
                tokio::time::sleep(after).await;
                shutdown.cancel();
            },
            scheduler.run(),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_open_window() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let db = dir.path().join("tracking.db");
        let clock = TestClock::starting_at(start());
        let shutdown = CancellationToken::new();
        let parts = Parts {
            store: Box::new(SqliteActivityStore::open(&db)?),
            input: active_input(),
            windows: steady_windows(ALPHA_TITLE),
            capturer: working_capturer(),
            settings: settings(),
        };

        let scheduler = scheduler(parts, &dir.path().join("screenshots"), &clock, &shutdown);
        run_for(scheduler, &shutdown, Duration::from_millis(65_500)).await;

        let store = SqliteActivityStore::open(&db)?;
        assert!(store.open_windows()?.is_empty());
        let windows = store.windows_overlapping(start(), start() + Duration::from_secs(3600))?;
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].project.as_deref(), Some("Project-Alpha"));
        assert_eq!(windows[0].confidence, 0.85);
        assert_eq!(windows[0].started_at, start());
        assert_eq!(
            windows[0].ended_at,
            Some(start() + Duration::from_millis(65_500))
        );

        let screenshots =
            store.screenshots_between(start(), start() + Duration::from_secs(3600))?;
        assert_eq!(screenshots.len(), 4);
        assert!(screenshots
            .iter()
            .all(|s| s.project.as_deref() == Some("Project-Alpha")));
        assert_eq!(screenshots[0].region.x, 300);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_project_change_keeps_one_window_open() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let db = dir.path().join("tracking.db");
        let clock = TestClock::starting_at(start());
        let shutdown = CancellationToken::new();

        let mut windows = MockWindowManager::new();
        let mut calls = 0;
        windows.expect_get_active_window_data().returning(move || {
            calls += 1;
            Ok(window(if calls <= 2 { ALPHA_TITLE } else { BETA_TITLE }))
        });
        let parts = Parts {
            store: Box::new(SqliteActivityStore::open(&db)?),
            input: active_input(),
            windows,
            capturer: working_capturer(),
            settings: settings(),
        };

        let scheduler = scheduler(parts, &dir.path().join("screenshots"), &clock, &shutdown);
        run_for(scheduler, &shutdown, Duration::from_millis(45_500)).await;

        let store = SqliteActivityStore::open(&db)?;
        let windows = store.windows_overlapping(start(), start() + Duration::from_secs(3600))?;
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].project.as_deref(), Some("Project-Alpha"));
        assert_eq!(windows[1].project.as_deref(), Some("Project-Beta"));
        assert_eq!(windows[0].ended_at, Some(windows[1].started_at));
        assert_eq!(windows[1].started_at, start() + Duration::from_secs(40));
        assert!(windows.iter().all(|w| !w.is_open()));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_in_same_minute_add_up() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let db = dir.path().join("tracking.db");
        let clock = TestClock::starting_at(start());
        let shutdown = CancellationToken::new();

        let mut input = MockInputActivity::new();
        let flushes = AtomicUsize::new(0);
        input.expect_flush().returning(move || {
            let keystrokes = match flushes.fetch_add(1, Ordering::SeqCst) {
                0 => 10,
                1 => 5,
                _ => 0,
            };
            InputCounts {
                keystrokes,
                ..InputCounts::default()
            }
        });
        input.expect_seconds_since_input().return_const(0.);
        input.expect_pointer_position().return_const(None);

        let mut settings = settings();
        settings.input_flush_interval = Duration::from_secs(10);
        let parts = Parts {
            store: Box::new(SqliteActivityStore::open(&db)?),
            input,
            windows: steady_windows(ALPHA_TITLE),
            capturer: working_capturer(),
            settings,
        };

        let scheduler = scheduler(parts, &dir.path().join("screenshots"), &clock, &shutdown);
        run_for(scheduler, &shutdown, Duration::from_millis(15_500)).await;

        let store = SqliteActivityStore::open(&db)?;
        let bucket = store.input_bucket(minute_bucket(start()))?.unwrap();
        assert_eq!(bucket.counts.keystrokes, 15);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failures_do_not_stop_the_loop() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = TestClock::starting_at(start());
        let shutdown = CancellationToken::new();

        let failure = || StoreError::NoOpenRow("test");
        let mut store = MockActivityStore::new();
        store
            .expect_insert_screenshot()
            .times(4)
            .returning(move |_| Err(failure()));
        store
            .expect_open_window()
            .times(4)
            .returning(move |_| Err(failure()));
        store.expect_close_window().never();
        store
            .expect_merge_input()
            .times(2)
            .returning(move |_| Err(failure()));
        store.expect_delete_screenshots_before().returning(|_| Ok(0));

        let mut windows = MockWindowManager::new();
        windows
            .expect_get_active_window_data()
            .times(4)
            .returning(|| Ok(window(ALPHA_TITLE)));
        let parts = Parts {
            store: Box::new(store),
            input: active_input(),
            windows,
            capturer: working_capturer(),
            settings: settings(),
        };

        let scheduler = scheduler(parts, &dir.path().join("screenshots"), &clock, &shutdown);
        run_for(scheduler, &shutdown, Duration::from_millis(70_500)).await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_capture_skips_classification() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = TestClock::starting_at(start());
        let shutdown = CancellationToken::new();

        let mut capturer = MockScreenCapturer::new();
        capturer
            .expect_capture()
            .times(2)
            .returning(|_, _, _| Err(CaptureError::Timeout));
        let mut windows = MockWindowManager::new();
        windows.expect_get_active_window_data().never();
        let mut store = MockActivityStore::new();
        store.expect_merge_input().returning(|_| Ok(()));
        store.expect_insert_screenshot().never();
        store.expect_open_window().never();
        store.expect_delete_screenshots_before().returning(|_| Ok(0));

        let parts = Parts {
            store: Box::new(store),
            input: active_input(),
            windows,
            capturer,
            settings: settings(),
        };

        let scheduler = scheduler(parts, &dir.path().join("screenshots"), &clock, &shutdown);
        run_for(scheduler, &shutdown, Duration::from_millis(25_500)).await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_screenshots_skipped_while_away() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let db = dir.path().join("tracking.db");
        let clock = TestClock::starting_at(start());
        let shutdown = CancellationToken::new();

        let mut input = MockInputActivity::new();
        input.expect_flush().returning(InputCounts::default);
        input.expect_seconds_since_input().return_const(500.);
        input.expect_pointer_position().return_const(None);
        let mut capturer = MockScreenCapturer::new();
        // Presence is still active when the first tick starts.
        capturer.expect_capture().times(1).returning(|_, _, _| Ok(()));

        let parts = Parts {
            store: Box::new(SqliteActivityStore::open(&db)?),
            input,
            windows: steady_windows(ALPHA_TITLE),
            capturer,
            settings: settings(),
        };

        let scheduler = scheduler(parts, &dir.path().join("screenshots"), &clock, &shutdown);
        run_for(scheduler, &shutdown, Duration::from_millis(45_500)).await;

        let store = SqliteActivityStore::open(&db)?;
        let periods = store.presence_overlapping(
            start() - Duration::from_secs(3600),
            start() + Duration::from_secs(3600),
        )?;
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].started_at, start() - Duration::from_secs(500));
        assert_eq!(
            periods[0].ended_at,
            Some(start() + Duration::from_millis(45_500))
        );
        assert!((periods[0].duration_s.unwrap() - 545.5).abs() < 0.01);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_names_reach_classifier() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let db = dir.path().join("tracking.db");
        let clock = TestClock::starting_at(start());
        let shutdown = CancellationToken::new();

        let mut registry = MockProjectRegistry::new();
        registry
            .expect_project_names()
            .times(1)
            .returning(|| Ok(vec!["Gamma".into()]));
        let parts = Parts {
            store: Box::new(SqliteActivityStore::open(&db)?),
            input: active_input(),
            windows: steady_windows("main.rs — Gamma"),
            capturer: working_capturer(),
            settings: settings(),
        };

        let mut scheduler = scheduler(parts, &dir.path().join("screenshots"), &clock, &shutdown);
        scheduler.registry = Some(Box::new(registry));
        run_for(scheduler, &shutdown, Duration::from_millis(5_500)).await;

        let store = SqliteActivityStore::open(&db)?;
        let windows = store.windows_overlapping(start(), start() + Duration::from_secs(3600))?;
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].project.as_deref(), Some("Gamma"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_capture_provider_classifies_by_title() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = TestClock::starting_at(start());
        let shutdown = CancellationToken::new();

        let mut capturer = MockScreenCapturer::new();
        capturer
            .expect_capture()
            .times(2)
            .returning(|_, _, _| Err(CaptureError::NoProvider));
        let mut windows = MockWindowManager::new();
        windows
            .expect_get_active_window_data()
            .times(2)
            .returning(|| Ok(window(ALPHA_TITLE)));
        let mut store = MockActivityStore::new();
        store.expect_insert_screenshot().never();
        store
            .expect_open_window()
            .times(1)
            .withf(|window| window.project.as_deref() == Some("Project-Alpha"))
            .returning(|_| Ok(1));
        store.expect_close_window().times(1).returning(|_, _| Ok(()));
        store.expect_merge_input().returning(|_| Ok(()));
        store.expect_delete_screenshots_before().returning(|_| Ok(0));

        let parts = Parts {
            store: Box::new(store),
            input: active_input(),
            windows,
            capturer,
            settings: settings(),
        };

        let scheduler = scheduler(parts, &dir.path().join("screenshots"), &clock, &shutdown);
        run_for(scheduler, &shutdown, Duration::from_millis(25_500)).await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_registry_keeps_last_names() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = TestClock::starting_at(start());
        let shutdown = CancellationToken::new();

        let mut registry = MockProjectRegistry::new();
        let mut calls = 0;
        registry.expect_project_names().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec!["Gamma".into()])
            } else {
                Err(RegistryError::Unavailable {
                    url: "http://127.0.0.1:9".into(),
                    reason: "connection refused".into(),
                })
            }
        });
        let parts = Parts {
            store: Box::new(MockActivityStore::new()),
            input: active_input(),
            windows: steady_windows(ALPHA_TITLE),
            capturer: working_capturer(),
            settings: settings(),
        };

        let mut scheduler = scheduler(parts, &dir.path().join("screenshots"), &clock, &shutdown);
        scheduler.registry = Some(Box::new(registry));
        scheduler.refresh_projects().await;
        scheduler.refresh_projects().await;

        let names = scheduler
            .classifier
            .project_names()
            .iter()
            .map(|name| name.to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Project-Alpha", "Project-Beta", "Gamma"]);
        Ok(())
    }
}
