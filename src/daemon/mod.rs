use std::{path::Path, path::PathBuf, sync::Arc};

use anyhow::Result;
use capture::{
    arena::{purge_expired, ScreenshotArena, SCREENSHOTS_DIR_NAME},
    CommandCapturer, ScreenCapturer,
};
use classifier::{
    vision::{AnthropicVisionClient, VisionClient},
    ContextClassifier,
};
use collection::scheduler::{CaptureScheduler, SchedulerSettings};
use config::{TrackerConfig, API_KEY_VARIABLE};
use input::{hook::platform_hook, InputActivity, InputEventCounter};
use presence::{PresenceDetector, SystemProcessProbe};
use registry::{HttpProjectRegistry, ProjectRegistry};
use storage::activity_store::{ActivityStore, SqliteActivityStore, DB_FILE_NAME};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    utils::clock::{Clock, DefaultClock},
    window_api::{GenericWindowManager, WindowManager},
};

pub mod args;
pub mod capture;
pub mod classifier;
pub mod collection;
pub mod config;
pub mod input;
pub mod presence;
pub mod registry;
pub mod shutdown;
pub mod storage;

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&dir)?;
    let dir = dir.canonicalize()?;
    std::env::set_current_dir("/")?;
    info!("Starting tracker in {dir:?}");

    let config = TrackerConfig::load(&dir)?;
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let arena = ScreenshotArena::new(dir.join(SCREENSHOTS_DIR_NAME));
    let store = prepare_store(&dir, &config, &arena, clock.as_ref())?;

    let counter = Arc::new(InputEventCounter::new(platform_hook()));
    let input_tracking = match counter.start() {
        Ok(()) => true,
        Err(e) => {
            warn!("Input tracking disabled, away detection is off {e}");
            false
        }
    };

    let shutdown_token = CancellationToken::new();
    let scheduler = create_scheduler(
        &config,
        Box::new(store),
        counter.clone(),
        input_tracking,
        Box::new(GenericWindowManager::new()?),
        Box::new(CommandCapturer::for_platform(config.capture_timeout())),
        arena,
        create_registry(&config),
        clock,
        &shutdown_token,
    );

    tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        scheduler.run(),
    );

    counter.stop();
    Ok(())
}

/// Opens the database, closes rows an unclean shutdown left open and drops expired screenshots.
fn prepare_store(
    dir: &Path,
    config: &TrackerConfig,
    arena: &ScreenshotArena,
    clock: &dyn Clock,
) -> Result<SqliteActivityStore> {
    let mut store = SqliteActivityStore::open(&dir.join(DB_FILE_NAME))?;
    match store.close_dangling() {
        Ok(recovered) if recovered.windows + recovered.presence_periods > 0 => {
            info!("Recovered rows left open by the previous run {recovered:?}")
        }
        Ok(_) => (),
        Err(e) => error!("Failed to recover rows left open by the previous run {e}"),
    }
    purge_expired(arena, &mut store, config.retention_days, clock.time());
    Ok(store)
}

fn create_vision_client(config: &TrackerConfig) -> Option<Arc<dyn VisionClient>> {
    let Ok(api_key) = std::env::var(API_KEY_VARIABLE) else {
        info!("{API_KEY_VARIABLE} is not set, vision classification disabled");
        return None;
    };
    match AnthropicVisionClient::new(
        config.vision_endpoint.clone(),
        config.classifier_model.clone(),
        api_key,
        config.classifier_timeout(),
    ) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            error!("Failed to create vision client {e}");
            None
        }
    }
}

fn create_registry(config: &TrackerConfig) -> Option<Box<dyn ProjectRegistry>> {
    let url = config.registry_url.clone()?;
    match HttpProjectRegistry::new(url) {
        Ok(registry) => Some(Box::new(registry)),
        Err(e) => {
            error!("Failed to create project registry client {e}");
            None
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn create_scheduler(
    config: &TrackerConfig,
    store: Box<dyn ActivityStore>,
    input: Arc<dyn InputActivity>,
    input_tracking: bool,
    window_manager: Box<dyn WindowManager>,
    capturer: Box<dyn ScreenCapturer>,
    arena: ScreenshotArena,
    registry: Option<Box<dyn ProjectRegistry>>,
    clock: Arc<dyn Clock>,
    shutdown_token: &CancellationToken,
) -> CaptureScheduler {
    // Idle time of a counter that never started grows without bound, which is no evidence of
    // absence.
    let presence = PresenceDetector::new(
        input_tracking.then(|| input.clone()),
        Box::new(SystemProcessProbe),
        clock.clone(),
        config.afk_threshold_s,
        config.watched_process.clone(),
    );
    let classifier = ContextClassifier::new(
        window_manager,
        create_vision_client(config),
        config.classifier_timeout(),
    );
    CaptureScheduler::new(
        store,
        input,
        presence,
        classifier,
        capturer,
        arena,
        registry,
        clock,
        shutdown_token.clone(),
        SchedulerSettings::from(config),
    )
}
