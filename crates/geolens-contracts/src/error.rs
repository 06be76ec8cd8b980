use thiserror::Error;

pub type ContractResult<T> = Result<T, ContractError>;

/// Failure taxonomy shared by every contract.
///
/// `Transport` and `Decode` come back from the upstream call. `Rejected` and
/// `Busy` are raised before any request leaves the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("reply did not match the expected shape: {0}")]
    Decode(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("a {0} request is already in flight")]
    Busy(&'static str),
}

impl ContractError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::Rejected(_) => "rejected",
            Self::Busy(_) => "busy",
        }
    }

    /// True when the request reached the upstream service (or tried to).
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Decode(_))
    }
}
