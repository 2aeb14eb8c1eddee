use thiserror::Error;
use uc_bridge::UcErr;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Bridge(#[from] uc_bridge::Error),

    #[error("the Rust host runtime is not loaded")]
    NotLoaded,

    #[error("no hook registered for token {0}")]
    UnknownToken(u64),

    #[error("hook {0} re-entered while it was already running")]
    Reentered(u64),
}

impl Error {
    /// Native status code, when the failure came from the engine.
    pub fn code(&self) -> Option<UcErr> {
        match self {
            Error::Bridge(err) => err.code(),
            _ => None,
        }
    }
}

impl From<UcErr> for Error {
    fn from(code: UcErr) -> Self {
        Error::Bridge(code.into())
    }
}
