//! Error types.

/// Error enumerates the failure states of the worker. The `Display`
/// rendering of each variant carries the class prefix (`json:`,
/// `security:`, `rfc1034:`, `sql:`, …) that callers see in the `error`
/// field of an ERROR reply.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a request envelope cannot be decoded, including the
    /// case of a command outside the known set.
    #[error("json: {0}")]
    Decode(#[from] serde_json::Error),

    /// Returned for authentication and authorization failures. The message
    /// never distinguishes an unknown token from a bad signature.
    #[error("security: {0}")]
    Security(String),

    /// Returned when a record in the request violates the per-type
    /// validation rules.
    #[error("rfc1034: {0}")]
    Rfc1034(String),

    /// Returned for logical storage failures: missing domains, uniqueness
    /// conflicts, ownership violations.
    #[error("sql: {0}")]
    Sql(String),

    /// Returned when the database itself fails a query or a transaction.
    #[error("sql: {0}")]
    Database(#[from] sqlx::Error),

    /// Returned when a request names the wildcard command, which is only
    /// meaningful inside permission specs.
    #[error("not implemented")]
    NotImplemented,

    /// Returned when the message bus connection or channel fails.
    #[error("transport: {0}")]
    Bus(#[from] lapin::Error),

    /// Returned when the secret store cannot be reached or answers with
    /// an unusable payload. Logged by the refresh loop, never replied.
    #[error("vault: {0}")]
    Vault(#[from] reqwest::Error),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    Io(#[from] std::io::Error),

    /// A request handler panicked; the reply carries no detail.
    #[error("internal error")]
    Internal,
}
