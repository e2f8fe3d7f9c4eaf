#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Native layer error: {0}")]
    Kernel(#[from] kernel::Error),

    #[error("Worker task panicked: {0}")]
    WorkerPanicked(#[from] tokio::task::JoinError),
}
