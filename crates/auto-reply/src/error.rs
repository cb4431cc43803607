#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("dispatch queue is closed")]
    QueueClosed,

    #[error("agent invocation failed: {0:#}")]
    Agent(anyhow::Error),

    #[error(transparent)]
    Sessions(#[from] courier_sessions::Error),

    #[error(transparent)]
    Routing(#[from] courier_routing::Error),

    #[error(transparent)]
    Channels(#[from] courier_channels::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
