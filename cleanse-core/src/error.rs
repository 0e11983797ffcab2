use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReversalError {
    #[error("shape mismatch: model expects {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
    #[error("model evaluation failed: {0}")]
    ModelEvaluation(String),
}

pub type Result<T> = std::result::Result<T, ReversalError>;
