//! Error types for rowmirror.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for rowmirror operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
        /// Source error if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// PostgreSQL connection error
    #[error("PostgreSQL connection error: {message}")]
    SourceConnection {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The row cursor failed while a table was being read.
    #[error("Failed reading table '{table}': {message}")]
    SourceRead {
        /// Table name
        table: String,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<tokio_postgres::Error>,
    },

    /// MongoDB connection error
    #[error("MongoDB connection error: {message}")]
    SinkConnection {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<mongodb::error::Error>,
    },

    /// A row could not be turned into a document.
    #[error("Failed decoding row of '{table}': {message}")]
    RowDecode {
        /// Table name
        table: String,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A document upsert failed.
    #[error("Failed writing to collection '{collection}': {message}")]
    SinkWrite {
        /// Collection name
        collection: String,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Checkpoint load/save error
    #[error("Checkpoint store error: {message}")]
    Store {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Requested table is not part of the table list.
    #[error("Table '{table}' not found in {tables_file}")]
    TableNotFound {
        /// Requested table name
        table: String,
        /// Where the table list came from
        tables_file: String,
    },

    /// A table copy failed and the run was aborted.
    #[error("Copy of table '{table}' failed: {source}")]
    TableCopy {
        /// Table name
        table: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source.
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a PostgreSQL connection error.
    pub fn source_connection(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SourceConnection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cursor read error.
    pub fn source_read(
        table: impl Into<String>,
        message: impl Into<String>,
        source: tokio_postgres::Error,
    ) -> Self {
        Self::SourceRead {
            table: table.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a cursor read error without an underlying driver error.
    pub fn source_read_msg(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceRead {
            table: table.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a row decode error.
    pub fn row_decode(
        table: impl Into<String>,
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::RowDecode {
            table: table.into(),
            message: message.into(),
            source,
        }
    }

    /// Create a MongoDB connection error.
    pub fn sink_connection(message: impl Into<String>, source: mongodb::error::Error) -> Self {
        Self::SinkConnection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a document write error.
    pub fn sink_write(
        collection: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SinkWrite {
            collection: collection.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a document write error without an underlying driver error.
    pub fn sink_write_msg(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            collection: collection.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a checkpoint store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Create a checkpoint store error with source.
    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a table-not-found error.
    pub fn table_not_found(table: impl Into<String>, tables_file: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
            tables_file: tables_file.into(),
        }
    }

    /// Wrap a failure with the table it happened on.
    pub fn table_copy(table: impl Into<String>, source: Error) -> Self {
        Self::TableCopy {
            table: table.into(),
            source: Box::new(source),
        }
    }

    /// Create a serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error code for metrics/logging.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "CONFIG_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::SourceConnection { .. } => "SOURCE_CONNECTION_ERROR",
            Error::SourceRead { .. } => "SOURCE_READ_ERROR",
            Error::RowDecode { .. } => "ROW_DECODE_ERROR",
            Error::SinkConnection { .. } => "SINK_CONNECTION_ERROR",
            Error::SinkWrite { .. } => "SINK_WRITE_ERROR",
            Error::Store { .. } => "STORE_ERROR",
            Error::TableNotFound { .. } => "TABLE_NOT_FOUND",
            Error::TableCopy { source, .. } => source.code(),
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
        }
    }

    /// Whether the error terminates a whole run rather than one table.
    pub fn is_fatal_to_run(&self) -> bool {
        !matches!(
            self,
            Error::SourceRead { .. } | Error::RowDecode { .. } | Error::SinkWrite { .. }
        )
    }

    /// Whether the error concerns a single row, leaving the cursor usable.
    pub fn is_row_level(&self) -> bool {
        matches!(self, Error::RowDecode { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::config("test").code(), "CONFIG_ERROR");
        assert_eq!(Error::validation("test").code(), "VALIDATION_ERROR");
        assert_eq!(Error::store("test").code(), "STORE_ERROR");
        assert_eq!(
            Error::table_not_found("orders", "tables.json").code(),
            "TABLE_NOT_FOUND"
        );
    }

    #[test]
    fn test_table_copy_reports_inner_code() {
        let err = Error::table_copy("orders", Error::source_read_msg("orders", "boom"));
        assert_eq!(err.code(), "SOURCE_READ_ERROR");
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn test_fatal_to_run() {
        assert!(!Error::source_read_msg("t", "x").is_fatal_to_run());
        assert!(!Error::sink_write_msg("t", "x").is_fatal_to_run());
        assert!(Error::store("x").is_fatal_to_run());
        assert!(Error::table_not_found("t", "tables.json").is_fatal_to_run());
    }

    #[test]
    fn test_row_decode_is_row_level() {
        let err = Error::row_decode("orders", "column 'amount': numeric out of range", None);
        assert_eq!(err.code(), "ROW_DECODE_ERROR");
        assert!(err.is_row_level());
        assert!(!err.is_fatal_to_run());
        assert!(!Error::source_read_msg("orders", "reset").is_row_level());
    }
}
