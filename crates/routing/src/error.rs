#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("binding {index} has an empty agent id")]
    EmptyAgentId { index: usize },

    #[error("binding {index} targets unknown agent '{agent_id}'")]
    UnknownAgent { index: usize, agent_id: String },
}

pub type Result<T> = std::result::Result<T, Error>;
