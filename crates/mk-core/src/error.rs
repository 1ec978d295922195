use std::{error::Error as StdError, fmt, io};

use mk_model::ModelError;

use crate::{driver::DriverError, runner::RunnerError, store::StoreError};

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure class of a lifecycle operation.
///
/// Callers branch on this, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The machine lock was not acquired within its timeout.
    LockTimeout,
    /// The lock file could not be created or locked.
    Lock,
    /// No driver registered under the requested name.
    UnsupportedDriver,
    /// A unit with the machine name exists and is not ours.
    ConflictingResource,
    /// Create did not finish within its ceiling; the backend state is unknown.
    CreateTimeout,
    /// Backend (driver) operation failed.
    Backend,
    /// Command runner failure inside the unit.
    Runner,
    /// Post-start setup failed.
    PostStart,
    /// Host record could not be read or written.
    Persist,
    /// Registry requires the user to log in before pulling.
    RegistryAuthRequired,
    InvalidConfig,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LockTimeout => "lock_timeout",
            ErrorKind::Lock => "lock",
            ErrorKind::UnsupportedDriver => "unsupported_driver",
            ErrorKind::ConflictingResource => "conflicting_resource",
            ErrorKind::CreateTimeout => "create_timeout",
            ErrorKind::Backend => "backend",
            ErrorKind::Runner => "runner",
            ErrorKind::PostStart => "post_start",
            ErrorKind::Persist => "persist",
            ErrorKind::RegistryAuthRequired => "registry_auth_required",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::Io => "io",
        }
    }

    /// Whether running the same operation again may succeed without user intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::LockTimeout
                | ErrorKind::Lock
                | ErrorKind::CreateTimeout
                | ErrorKind::Backend
                | ErrorKind::Runner
                | ErrorKind::PostStart
                | ErrorKind::Persist
                | ErrorKind::Io
        )
    }

    /// Whether the user has to change something before a retry makes sense.
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnsupportedDriver
                | ErrorKind::ConflictingResource
                | ErrorKind::RegistryAuthRequired
                | ErrorKind::InvalidConfig
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged error with a chain of step names.
///
/// Rendered as `outer: inner: message`.
#[derive(Debug)]
pub struct CoreError {
    kind: ErrorKind,
    context: Vec<String>,
    message: String,
    source: Option<BoxError>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            context: Vec::new(),
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a lower-level error; its text becomes the message.
    pub fn with_source<E>(kind: ErrorKind, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            kind,
            context: Vec::new(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Step names, outermost first.
    #[inline]
    pub fn context_chain(&self) -> &[String] {
        &self.context
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prepends a step name.
    pub fn context(mut self, step: impl Into<String>) -> Self {
        self.context.insert(0, step.into());
        self
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    #[inline]
    pub fn requires_user_action(&self) -> bool {
        self.kind.requires_user_action()
    }

    /// Downcasts the wrapped source, if any.
    pub fn source_as<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.as_deref()?.downcast_ref::<E>()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.context {
            write!(f, "{step}: ")?;
        }
        f.write_str(&self.message)
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        // The source text is already the message; skip one level so chains don't repeat it.
        self.source
            .as_deref()
            .and_then(|e| e.source())
    }
}

impl From<io::Error> for CoreError {
    fn from(e: io::Error) -> Self {
        CoreError::with_source(ErrorKind::Io, e)
    }
}

impl From<ModelError> for CoreError {
    fn from(e: ModelError) -> Self {
        CoreError::with_source(ErrorKind::InvalidConfig, e)
    }
}

impl From<DriverError> for CoreError {
    fn from(e: DriverError) -> Self {
        let kind = match &e {
            DriverError::Config(_) => ErrorKind::InvalidConfig,
            DriverError::Runner(_) => ErrorKind::Runner,
            _ => ErrorKind::Backend,
        };
        CoreError::with_source(kind, e)
    }
}

impl From<RunnerError> for CoreError {
    fn from(e: RunnerError) -> Self {
        CoreError::with_source(ErrorKind::Runner, e)
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        CoreError::with_source(ErrorKind::Persist, e)
    }
}

/// Adds a step name to any error convertible into [`CoreError`].
pub trait ResultExt<T> {
    fn context(self, step: impl Into<String>) -> Result<T, CoreError>;

    fn with_context<F, S>(self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<CoreError>,
{
    fn context(self, step: impl Into<String>) -> Result<T, CoreError> {
        self.map_err(|e| e.into().context(step))
    }

    fn with_context<F, S>(self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_renders_outermost_first() {
        let err = CoreError::new(ErrorKind::Backend, "no space left on device")
            .context("create")
            .context("creating host");
        assert_eq!(err.to_string(), "creating host: create: no space left on device");
        assert_eq!(err.context_chain(), ["creating host", "create"]);
        assert_eq!(err.kind(), ErrorKind::Backend);
    }

    #[test]
    fn result_ext_converts_and_tags() {
        let r: Result<(), io::Error> = Err(io::Error::other("disk gone"));
        let err = r.context("boot lock").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.to_string(), "boot lock: disk gone");
        assert!(err.source_as::<io::Error>().is_some());
    }

    #[test]
    fn classification() {
        assert!(ErrorKind::LockTimeout.is_retryable());
        assert!(ErrorKind::CreateTimeout.is_retryable());
        assert!(!ErrorKind::ConflictingResource.is_retryable());
        assert!(ErrorKind::ConflictingResource.requires_user_action());
        assert!(ErrorKind::UnsupportedDriver.requires_user_action());
        assert!(ErrorKind::RegistryAuthRequired.requires_user_action());
        assert!(!ErrorKind::Backend.requires_user_action());
    }

    #[test]
    fn model_errors_are_invalid_config() {
        let err: CoreError = ModelError::NoNodes.into();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }
}
