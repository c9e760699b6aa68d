use std::{
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Result};
use tracing::instrument;

use super::{ActiveWindowData, WindowManager};

const FRONT_WINDOW_SCRIPT: &str = r#"
tell application "System Events"
    set frontApp to name of first application process whose frontmost is true
    set windowTitle to ""
    try
        set windowTitle to name of front window of (first application process whose frontmost is true)
    end try
    return frontApp & "|" & windowTitle
end tell
"#;

/// System Events can hang while an accessibility prompt is pending.
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);
const SCRIPT_POLL: Duration = Duration::from_millis(20);

/// Queries System Events through `osascript`. Requires the same accessibility permission as the
/// input hook.
pub struct ScriptWindowManager;

pub fn parse_script_output(output: &str) -> ActiveWindowData {
    let mut parts = output.trim().splitn(2, '|');
    let app_name = parts.next().unwrap_or_default();
    let window_title = parts.next().unwrap_or_default();
    ActiveWindowData {
        window_title: window_title.into(),
        app_name: app_name.into(),
    }
}

impl WindowManager for ScriptWindowManager {
    #[instrument(skip(self))]
    fn get_active_window_data(&mut self) -> Result<ActiveWindowData> {
        let mut child = Command::new("osascript")
            .args(["-e", FRONT_WINDOW_SCRIPT])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let started = Instant::now();
        while child.try_wait()?.is_none() {
            if started.elapsed() >= SCRIPT_TIMEOUT {
                child.kill()?;
                child.wait()?;
                return Err(anyhow!("osascript did not answer within {SCRIPT_TIMEOUT:?}"));
            }
            thread::sleep(SCRIPT_POLL);
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(anyhow!(
                "osascript failed {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        Ok(parse_script_output(&String::from_utf8_lossy(&output.stdout)))
    }
}
