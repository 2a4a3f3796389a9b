//! Common result and error types for the kiln build orchestrator.

/// The standard result type for fallible internal operations.
///
/// `Err` indicates an unexpected internal failure (a broken compiler plugin or
/// a bug in kiln), not a user-facing build error. Compile errors are reported
/// through the diagnostic sink and the build still returns `Ok`.
pub type KilnResult<T> = Result<T, InternalError>;

/// An unexpected failure during a build, optionally attributed to the
/// component (usually a compiler) it originated from.
#[derive(Debug, thiserror::Error)]
#[error("internal build error{}: {message}", origin_suffix(.origin))]
pub struct InternalError {
    /// Description of the failure.
    pub message: String,
    /// The compiler or component the failure is attributable to, if known.
    pub origin: Option<String>,
}

fn origin_suffix(origin: &Option<String>) -> String {
    match origin {
        Some(origin) => format!(" ({origin})"),
        None => String::new(),
    }
}

impl InternalError {
    /// Creates a new internal error with the given message and no origin.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin: None,
        }
    }

    /// Attributes this error to a component, keeping an existing origin.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        if self.origin.is_none() {
            self.origin = Some(origin.into());
        }
        self
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}
