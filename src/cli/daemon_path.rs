use std::path::{Path, PathBuf};

pub const DAEMON_BINARY_NAME: &str = "worktrace-daemon";

/// Daemon binary installed next to the cli binary at `cli_path`.
pub fn to_daemon_path(cli_path: &Path) -> PathBuf {
    let mut path = cli_path.to_path_buf();
    path.set_file_name(DAEMON_BINARY_NAME);
    #[cfg(windows)]
    {
        path.set_extension("exe");
    }
    path
}
