//! Access to the foreground window of the desktop session. [GenericWindowManager] is the main
//! artifact of this module and dispatches to the implementation compiled for the platform.

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use std::{path::Path, sync::Arc};

use anyhow::{anyhow, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWindowData {
    /// Title of the window. For example 'main.rs - Project-Alpha - Visual Studio Code'
    pub window_title: Arc<str>,
    /// Short application name. For example 'Code' or 'firefox'
    pub app_name: Arc<str>,
}

impl ActiveWindowData {
    pub fn empty() -> Self {
        Self {
            window_title: "".into(),
            app_name: "".into(),
        }
    }
}

/// Contract every platform-specific foreground window accessor implements.
#[cfg_attr(test, mockall::automock)]
pub trait WindowManager: Send {
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData>;
}

/// Serves as a cross-compatible WindowManager implementation.
pub struct GenericWindowManager {
    inner: Box<dyn WindowManager>,
}

impl GenericWindowManager {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                Ok(Self {
                    inner: Box::new(win::WindowsWindowManager::new()),
                })
            }
            else if #[cfg(feature = "x11")] {
                Ok(Self {
                    inner: Box::new(x11::LinuxWindowManager::new()?),
                })
            }
            else if #[cfg(target_os = "macos")] {
                Ok(Self {
                    inner: Box::new(macos::ScriptWindowManager),
                })
            }
            else {
                Ok(Self {
                    inner: Box::new(UnsupportedWindowManager),
                })
            }
        }
    }
}

impl WindowManager for GenericWindowManager {
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData> {
        self.inner.get_active_window_data()
    }
}

/// Used when no accessor was compiled in. The classifier then only sees empty titles.
pub struct UnsupportedWindowManager;

impl WindowManager for UnsupportedWindowManager {
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData> {
        Err(anyhow!(
            "No foreground window accessor for this platform, enable `win` or `x11`"
        ))
    }
}

/// Turns an executable path into an application name: `/usr/bin/firefox` becomes `firefox`,
/// `C:\...\Code.exe` becomes `Code`.
pub fn app_name_from_executable(value: &str) -> String {
    let name = value.rsplit(['/', '\\']).next().unwrap_or(value);
    Path::new(name)
        .file_stem()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string())
}
