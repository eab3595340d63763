use thiserror::Error;

/// A result type for GP regression operations
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when building or using a [`GaussianProcess`](crate::GaussianProcess) model
#[derive(Error, Debug)]
pub enum GpError {
    /// When a supplied name or value is rejected at a boundary call
    #[error("{0}")]
    InvalidArgument(String),
    /// When a recognized likelihood variant has no implementation yet
    #[error("{0}")]
    NotSupported(String),
    /// When a recognized inference variant has no implementation yet
    #[error("{0}")]
    NotImplemented(String),
    /// When training data shapes do not line up
    #[error("{0}")]
    DimensionMismatch(String),
    /// When a lifecycle method is called before its prerequisites
    #[error("{0}")]
    NotReady(String),
    /// When the covariance matrix stays indefinite after jitter retries
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
    /// When an operation is invalid for the parameter's configuration
    #[error("{0}")]
    InvalidOperation(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
}
