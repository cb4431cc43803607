#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no transport registered for any configured channel account")]
    NothingToStart,

    #[error("invalid configuration: {}", errors.join("; "))]
    InvalidConfig { errors: Vec<String> },

    #[error(transparent)]
    Routing(#[from] courier_routing::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
