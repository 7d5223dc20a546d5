//! Error types shared by every hyperint crate.

use thiserror::Error;

/// Error types for hyperint operations.
#[derive(Error, Debug)]
pub enum HyperintError {
    /// A tensor (or a collection of tensors) does not have the declared shape.
    ///
    /// Construct through [`HyperintError::shape_mismatch`] so identical shapes
    /// are caught at the call site.
    #[error("Shape mismatch in {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Unsupported target network type: {0}")]
    UnsupportedNetworkType(String),

    #[error("Unsupported dataset: {0}")]
    UnsupportedDataset(String),

    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    #[error("Invalid specification: {0}")]
    InvalidSpec(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wraps the failure of one evaluation task with its index.
    #[error("Evaluation of task {task} failed: {source}")]
    TaskFailed {
        task: usize,
        #[source]
        source: Box<HyperintError>,
    },
}

impl HyperintError {
    /// Create a ShapeMismatch error, panicking if shapes are identical (bug indicator).
    #[track_caller]
    pub fn shape_mismatch(what: impl Into<String>, expected: Vec<usize>, got: Vec<usize>) -> Self {
        if expected == got {
            let loc = std::panic::Location::caller();
            panic!(
                "BUG at {}:{}:{}: ShapeMismatch created with identical shapes: {:?}. \
                 This indicates a bug in the calling code - shapes match but error was raised.",
                loc.file(),
                loc.line(),
                loc.column(),
                expected
            );
        }
        HyperintError::ShapeMismatch {
            what: what.into(),
            expected,
            got,
        }
    }

    /// Attach the evaluation task index to an error.
    pub fn in_task(self, task: usize) -> Self {
        HyperintError::TaskFailed {
            task,
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) is a shape mismatch.
    pub fn is_shape_mismatch(&self) -> bool {
        match self {
            HyperintError::ShapeMismatch { .. } => true,
            HyperintError::TaskFailed { source, .. } => source.is_shape_mismatch(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, HyperintError>;
