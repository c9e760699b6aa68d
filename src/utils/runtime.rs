use anyhow::Result;

/// The engine runs on one thread: the control loop owns every store write, so there is nothing to
/// parallelize.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
