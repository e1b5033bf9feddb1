use std::fmt;

/// Errors that can prevent a walk from even starting.
#[derive(Debug)]
pub enum ConfigError {
    /// `nopenfd` was below the minimum of 2.
    TooFewDescriptors { requested: usize },
    /// `paths` was empty.
    NoPaths,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewDescriptors { requested } => {
                write!(f, "descriptor budget {requested} is below the minimum of 2")
            }
            Self::NoPaths => write!(f, "no starting paths were given"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug)]
pub enum WalkError {
    /// Rejected before any I/O was attempted.
    Config(ConfigError),
    /// A syscall failed and recovery was not requested (or exhausted).
    Io(std::io::Error),
    /// A record or descriptor could not be reserved even after eviction.
    ResourceExhausted(&'static str),
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "invalid configuration: {e}"),
            Self::Io(e) => write!(f, "i/o error: {e}"),
            Self::ResourceExhausted(what) => write!(f, "resource exhausted: {what}"),
        }
    }
}

impl std::error::Error for WalkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::ResourceExhausted(_) => None,
        }
    }
}

impl From<ConfigError> for WalkError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<std::io::Error> for WalkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Build a [`std::io::Error`] from the last `errno`.
#[macro_export]
macro_rules! last_os_error {
    () => {
        ::std::io::Error::last_os_error()
    };
}

pub type Result<T> = std::result::Result<T, WalkError>;
