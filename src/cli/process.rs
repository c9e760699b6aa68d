use std::{
    env,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{Context, Result};
use sysinfo::{get_current_pid, Signal, System};
use tracing::{debug, info};

use super::daemon_path::to_daemon_path;

pub fn daemon_executable() -> Result<PathBuf> {
    let cli = env::current_exe().context("Can't operate without an executable")?;
    Ok(to_daemon_path(&cli))
}

/// Terminates every running instance of the executable at `name` and waits for it to exit.
/// Returns how many were found.
pub fn kill_previous_servers(name: &Path) -> Result<usize> {
    let system = System::new_all();
    let current_id = get_current_pid().map_err(|e| anyhow::anyhow!("{e}"))?;
    let mut killed = 0;
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }

        if process
            .exe()
            .filter(|v| v.exists())
            .filter(|v| name == *v)
            .is_some()
        {
            debug!("Terminating daemon {pid}");
            // SIGTERM lets the daemon close its open rows. Windows has no such signal, so the
            // process is killed and the next start recovers them.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
            killed += 1;
        }
    }
    Ok(killed)
}

/// Stops running daemons and starts a detached one working in `dir`.
pub fn restart_server(dir: Option<&Path>) -> Result<()> {
    let daemon = daemon_executable()?;
    let killed = kill_previous_servers(&daemon)?;
    info!("Stopped {killed} previous daemons");

    let mut command = std::process::Command::new(&daemon);
    if let Some(dir) = dir {
        command.arg("--dir").arg(dir);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());

    #[allow(clippy::zombie_processes)]
    let _ = command
        .spawn()
        .with_context(|| format!("Failed to spawn {daemon:?}"))?;
    println!("Started {}", daemon.display());
    Ok(())
}
