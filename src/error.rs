/// Errors reported by the runtime.
///
/// Argument and allocation errors are detected before any task is launched.
/// `TaskFailed` is produced by an apply whose worker returned an error or panicked;
/// `ValidationMismatch` is reserved for result checks performed by benchmark harnesses.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// A logical index outside `[0, len)`
    InvalidIndex { index: usize, len: usize },
    /// A chunked layout was requested for a length that is not a multiple of the partition count
    InvalidLayout { len: usize, partitions: usize },
    /// A configuration error (zero grain, zero partitions, mismatched reduction op, ...)
    InvalidArgument(String),
    /// A partition could not provide the requested backing storage
    AllocationFailure { partition: usize, bytes: usize },
    /// A computed value differs from the expected one
    ValidationMismatch {
        index: usize,
        actual: String,
        expected: String,
    },
    /// A worker failed while processing `[begin, end)`
    TaskFailed {
        begin: usize,
        end: usize,
        message: String,
    },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl RuntimeError {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> RuntimeError {
        RuntimeError::InvalidArgument(msg.into())
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RuntimeError::InvalidIndex { index, len } => {
                write!(f, "Invalid index => index: {} len: {}", index, len)
            }
            RuntimeError::InvalidLayout { len, partitions } => write!(
                f,
                "Invalid layout => chunked layout requires len ({}) to be a multiple of the number of partitions ({})",
                len, partitions
            ),
            RuntimeError::InvalidArgument(msg) => write!(f, "Invalid argument => {}", msg),
            RuntimeError::AllocationFailure { partition, bytes } => write!(
                f,
                "Allocation failure => partition {} could not provide {} bytes",
                partition, bytes
            ),
            RuntimeError::ValidationMismatch {
                index,
                actual,
                expected,
            } => write!(
                f,
                "Validation mismatch => array[{}] was {}, expected {}",
                index, actual, expected
            ),
            RuntimeError::TaskFailed {
                begin,
                end,
                message,
            } => write!(f, "Task failed on range [{}, {}) => {}", begin, end, message),
        }
    }
}

impl std::error::Error for RuntimeError {}
