//! Inference of the project the user is working on.
//!
//! The cheapest source wins:
//!  1. an unchanged window title reuses the previous answer,
//!  2. a tracked project name found in the window title,
//!  3. a vision model looking at the latest screenshot,
//!  4. unknown.
//!
//! The previous answer is held in a single slot owned by the classifier. It is refreshed on every
//! call, unknown answers included, so a title classified as unknown stays unknown until the title
//! changes.
//!
//! One deadline covers the whole call. Both the foreground window query and the vision request
//! draw from it.

pub mod vision;

use std::{fmt::Display, path::Path, sync::Arc, time::Duration};

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use vision::{parse_verdict, VisionClient, VisionError, VisionVerdict};

use crate::window_api::{ActiveWindowData, WindowManager};

pub const CACHED_CONFIDENCE: f64 = 0.9;
pub const TITLE_MATCH_CONFIDENCE: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationMethod {
    Cached,
    TitleMatch,
    Vision,
    Unknown,
}

impl Display for ClassificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassificationMethod::Cached => write!(f, "cached"),
            ClassificationMethod::TitleMatch => write!(f, "title_match"),
            ClassificationMethod::Vision => write!(f, "vision"),
            ClassificationMethod::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub project: Option<Arc<str>>,
    pub confidence: f64,
    pub window_title: Arc<str>,
    pub app_name: Arc<str>,
    pub method: ClassificationMethod,
}

struct Memo {
    window_title: Arc<str>,
    result: ClassificationResult,
}

pub struct ContextClassifier {
    /// Queried on a blocking thread. A query that outlives its deadline keeps the lock, and the
    /// following calls see an empty window until it returns.
    windows: Arc<Mutex<Box<dyn WindowManager>>>,
    vision: Option<Arc<dyn VisionClient>>,
    project_names: Vec<Arc<str>>,
    timeout: Duration,
    memo: Option<Memo>,
}

impl ContextClassifier {
    /// `vision` is `None` when no credential is configured, which disables step 3.
    pub fn new(
        windows: Box<dyn WindowManager>,
        vision: Option<Arc<dyn VisionClient>>,
        timeout: Duration,
    ) -> Self {
        Self {
            windows: Arc::new(Mutex::new(windows)),
            vision,
            project_names: vec![],
            timeout,
            memo: None,
        }
    }

    /// Replaces the tracked project names. Blank names are dropped, duplicates keep their first
    /// position.
    pub fn set_project_names(&mut self, names: impl IntoIterator<Item = String>) {
        let mut project_names: Vec<Arc<str>> = vec![];
        for name in names {
            let name = name.trim();
            if !name.is_empty() && !project_names.iter().any(|v| &**v == name) {
                project_names.push(name.into());
            }
        }
        self.project_names = project_names;
    }

    pub fn project_names(&self) -> &[Arc<str>] {
        &self.project_names
    }

    async fn active_window(&self, deadline: Instant) -> ActiveWindowData {
        let windows = self.windows.clone();
        let query = tokio::task::spawn_blocking(move || match windows.try_lock() {
            Some(mut windows) => windows.get_active_window_data(),
            None => Err(anyhow!("Previous foreground window query is still running")),
        });
        match tokio::time::timeout_at(deadline, query).await {
            Ok(Ok(Ok(window))) => window,
            Ok(Ok(Err(e))) => {
                debug!("Foreground window unavailable {e:?}");
                ActiveWindowData::empty()
            }
            Ok(Err(e)) => {
                error!("Foreground window query panicked {e}");
                ActiveWindowData::empty()
            }
            Err(_) => {
                warn!("Foreground window query timed out");
                ActiveWindowData::empty()
            }
        }
    }

    /// Classifies the current foreground context. Never fails and never takes longer than the
    /// configured timeout.
    pub async fn classify(&mut self, screenshot: Option<&Path>) -> ClassificationResult {
        let deadline = Instant::now() + self.timeout;
        let ActiveWindowData {
            window_title,
            app_name,
        } = self.active_window(deadline).await;

        if let Some(memo) = &self.memo {
            if memo.window_title == window_title {
                return ClassificationResult {
                    project: memo.result.project.clone(),
                    confidence: CACHED_CONFIDENCE,
                    window_title,
                    app_name,
                    method: ClassificationMethod::Cached,
                };
            }
        }

        let result = match self.match_title(&window_title) {
            Some(project) => ClassificationResult {
                project: Some(project),
                confidence: TITLE_MATCH_CONFIDENCE,
                window_title: window_title.clone(),
                app_name,
                method: ClassificationMethod::TitleMatch,
            },
            None => match self
                .ask_vision(screenshot, &window_title, &app_name, deadline)
                .await
            {
                Some(verdict) => ClassificationResult {
                    project: verdict.project.map(Arc::from),
                    confidence: verdict.confidence,
                    window_title: window_title.clone(),
                    app_name,
                    method: ClassificationMethod::Vision,
                },
                None => ClassificationResult {
                    project: None,
                    confidence: 0.,
                    window_title: window_title.clone(),
                    app_name,
                    method: ClassificationMethod::Unknown,
                },
            },
        };

        self.memo = Some(Memo {
            window_title,
            result: result.clone(),
        });
        result
    }

    fn match_title(&self, window_title: &str) -> Option<Arc<str>> {
        let title = window_title.to_lowercase();
        self.project_names
            .iter()
            .find(|name| title.contains(&name.to_lowercase()))
            .cloned()
    }

    async fn ask_vision(
        &self,
        screenshot: Option<&Path>,
        window_title: &str,
        app_name: &str,
        deadline: Instant,
    ) -> Option<VisionVerdict> {
        let vision = self.vision.as_ref()?;
        let screenshot = screenshot?;

        let prompt = format!(
            "Which project is this developer working on? Options: {}. Window title: {window_title}. App: {app_name}. \
             Reply with ONLY a JSON object: {{\"project\": \"name\", \"confidence\": 0.0-1.0}}",
            self.project_names.join(", ")
        );

        let request = async {
            let image = tokio::fs::read(screenshot)
                .await
                .map_err(|e| VisionError::Transport(format!("can't read {screenshot:?}: {e}")))?;
            let reply = vision.describe(image, prompt).await?;
            parse_verdict(&reply)
        };

        match tokio::time::timeout_at(deadline, request).await {
            Ok(Ok(verdict)) => Some(verdict),
            Ok(Err(e)) => {
                warn!("Vision classification failed {e}");
                None
            }
            Err(_) => {
                warn!("{}", VisionError::Timeout);
                None
            }
        }
    }
}
