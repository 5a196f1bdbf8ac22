//! Error types for minorm operations.

use std::fmt;

/// The primary error type for all minorm operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, acquire, disconnect)
    Connection(ConnectionError),
    /// Statement preparation or execution errors
    Query(QueryError),
    /// Value coercion errors
    Type(TypeError),
    /// Entity metadata could not be resolved
    Metadata(MetadataError),
    /// A row could not be mapped onto an entity
    Mapping(MappingError),
    /// No row exists for the requested identifier
    NotFound(NotFoundError),
    /// Illegal session state transition
    Session(SessionError),
    /// One or more updates failed while closing a session
    Flush(FlushError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// The provider could not hand out a connection
    Acquire,
    /// Connection lost or already closed
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, not null, ...)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Statement could not be built from metadata
    Build,
    /// Database is busy or locked
    Busy,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

/// Entity metadata is invalid or incomplete.
#[derive(Debug, Clone)]
pub struct MetadataError {
    /// Short type name of the entity being resolved.
    pub entity: String,
    pub kind: MetadataErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataErrorKind {
    /// No field is marked as the identifier
    MissingIdentifier,
    /// More than one field is marked as the identifier
    MultipleIdentifiers,
    /// Table or column name is not a plain SQL identifier
    InvalidName,
    /// Two fields share a field name or column name
    Duplicate,
    /// The entity declares no persistent fields
    NoFields,
}

/// A result row could not be turned into an entity instance.
#[derive(Debug)]
pub struct MappingError {
    pub entity: String,
    pub field: String,
    pub column: String,
    pub reason: MappingFailure,
}

#[derive(Debug)]
pub enum MappingFailure {
    /// The row has no column with the expected name
    MissingColumn,
    /// The column value cannot be coerced to the field type
    Coercion(TypeError),
}

#[derive(Debug, Clone)]
pub struct NotFoundError {
    pub entity: String,
    pub table: String,
    /// Rendered identifier value.
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The session has been closed and cannot be used again
    Closed,
}

/// Failures collected while flushing dirty entities.
#[derive(Debug)]
pub struct FlushError {
    /// Each failed entity key (rendered) with its cause.
    pub failures: Vec<(String, Error)>,
    /// Updates that completed before (or despite) the failures.
    pub completed: usize,
    /// Entity keys whose update was never attempted.
    pub not_attempted: Vec<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Is this the not-found outcome of a lookup by identifier?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl MetadataError {
    pub fn new(entity: impl Into<String>, kind: MetadataErrorKind, message: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            kind,
            message: message.into(),
        }
    }
}

impl QueryError {
    /// A statement that could not be assembled from entity metadata.
    pub fn build(message: impl Into<String>) -> Self {
        Self {
            kind: QueryErrorKind::Build,
            sql: None,
            message: message.into(),
            source: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Metadata(e) => write!(f, "Metadata error: {}", e),
            Error::Mapping(e) => write!(f, "Mapping error: {}", e),
            Error::NotFound(e) => write!(f, "Not found: {}", e),
            Error::Session(e) => write!(f, "Session error: {}", e),
            Error::Flush(e) => write!(f, "Flush error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Flush(e) => e
                .failures
                .first()
                .map(|(_, err)| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            MappingFailure::MissingColumn => write!(
                f,
                "{}.{}: row has no column '{}'",
                self.entity, self.field, self.column
            ),
            MappingFailure::Coercion(e) => write!(
                f,
                "{}.{}: cannot read column '{}': {}",
                self.entity, self.field, self.column, e
            ),
        }
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no {} row in table '{}' with identifier {}",
            self.entity, self.table, self.id
        )
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Closed => write!(f, "session is closed"),
        }
    }
}

impl fmt::Display for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} update(s) failed, {} completed, {} not attempted",
            self.failures.len(),
            self.completed,
            self.not_attempted.len()
        )?;
        if let Some((key, err)) = self.failures.first() {
            write!(f, "; first failure {}: {}", key, err)?;
        }
        Ok(())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<MetadataError> for Error {
    fn from(err: MetadataError) -> Self {
        Error::Metadata(err)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<NotFoundError> for Error {
    fn from(err: NotFoundError) -> Self {
        Error::NotFound(err)
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Error::Session(err)
    }
}

impl From<FlushError> for Error {
    fn from(err: FlushError) -> Self {
        Error::Flush(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for minorm operations.
pub type Result<T> = std::result::Result<T, Error>;
