use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Setup error: {0}")]
    Build(#[from] strata_engine::BuildError),

    #[error("Load error: {0}")]
    Load(#[from] strata_engine::LoadError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("{failed} of {total} resources failed to load")]
    Incomplete { failed: usize, total: usize },
}
