#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Module verification failed: {0}")]
    Verification(String),

    #[error("Unexpected instruction operand types detected: {0}")]
    OperandTypes(String),

    #[error("Unsupported intrinsic: {0}")]
    UnsupportedIntrinsic(String),

    #[error("Unsupported construct: {0}")]
    Unsupported(String),

    #[error("Entry function '{0}' not found in module")]
    MissingEntryPoint(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is one of the invariant violations the interpreter
    /// cannot tolerate (as opposed to an unsupported input).
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::Verification(_) | Error::OperandTypes(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
