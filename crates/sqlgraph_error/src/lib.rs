use std::error::Error;
use std::fmt;

/// Error type used across all sqlgraph crates.
///
/// Every failure in the core is a caller/programmer error raised synchronously
/// to the immediate caller. Nothing is retried and nothing is swallowed.
#[derive(Debug)]
pub struct SqlGraphError {
    /// Message describing the error condition.
    msg: String,
    /// Optional underlying error.
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl SqlGraphError {
    pub fn new(msg: impl Into<String>) -> Self {
        SqlGraphError {
            msg: msg.into(),
            source: None,
        }
    }

    pub fn with_source(msg: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        SqlGraphError {
            msg: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl fmt::Display for SqlGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl Error for SqlGraphError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

pub type Result<T, E = SqlGraphError> = std::result::Result<T, E>;

pub trait ResultExt<T> {
    /// Prepend static context to the error message.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Prepend lazily computed context to the error message.
    fn context_fn<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(SqlGraphError::with_source(msg, e)),
        }
    }

    fn context_fn<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(SqlGraphError::with_source(f(), e)),
        }
    }
}

pub trait OptionExt<T> {
    /// Convert an Option into a Result, erroring with the given message on
    /// None.
    fn required(self, msg: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, msg: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(SqlGraphError::new(msg)),
        }
    }
}

/// Return early with a "not implemented" error.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)*) => {
        return Err($crate::SqlGraphError::new(format!(
            "Not implemented: {}",
            format!($($arg)*)
        )))
    };
}
