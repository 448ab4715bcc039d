use std::any::Any;
use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Decode Error - {0}")]
    Decode(String),

    #[error("Encode Error - {0}")]
    Encode(String),

    #[error("Callback Panic - {0}")]
    CallbackPanic(String),

    #[error("Callback Error - {0}")]
    Callback(String),

    #[error("Source Error - {0}")]
    Source(String),

    #[error("Sink Error - {0}")]
    Sink(String),

    #[error("Config Error - {0}")]
    Config(String),

    #[error("Client Error - {0}")]
    Client(String),

    #[error("Consumer Error - {0}")]
    Consumer(String),

    #[error("error during run of the consumer input: {0}")]
    SourceRun(Box<Error>),

    #[error("error during run of the consumer callback: {0}")]
    CallbackRun(Box<Error>),

    #[error("error while waiting for all routines to stop: {0}")]
    Shutdown(Errors),

    #[error("{0}")]
    Multiple(Errors),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

/// An ordered list of errors collected from independent units of work. It never
/// becomes an error itself while empty, see [`Errors::into_result`].
#[derive(Debug, Clone, Default)]
pub struct Errors(Vec<Error>);

impl Errors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: Error) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.0.iter()
    }

    /// Returns `Ok(())` if nothing was collected, otherwise wraps the errors with `wrap`.
    pub fn into_result(self, wrap: impl FnOnce(Errors) -> Error) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(wrap(self))
        }
    }
}

impl From<Vec<Error>> for Errors {
    fn from(errors: Vec<Error>) -> Self {
        Self(errors)
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "no errors"),
            [err] => write!(f, "{err}"),
            errs => {
                write!(f, "{} errors occurred: ", errs.len())?;
                for (i, err) in errs.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            }
        }
    }
}

/// Extracts the message of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
