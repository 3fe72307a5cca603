//! Error types for the subgraph mock proxy.
//!
//! Every error carries a stable machine-readable code and maps to a single
//! HTTP status. Request-time errors bubble up to one responder that writes
//! the GraphQL error envelope `{errors: [...], data: null}`; background-task
//! errors are logged and isolated.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the proxy.
///
/// Covers request decoding, mock execution, schema loading, and upstream
/// forwarding failures. Each variant maps to a stable extension code via
/// [`Error::code`] and an HTTP status via [`Error::status`].
#[derive(Error, Debug)]
pub enum Error {
    /// The encoded target URL segment failed decoding or validation
    #[error("invalid target URL: {0}")]
    InvalidUrl(String),

    /// The request is not a well-formed proxy GraphQL request
    #[error("invalid GraphQL request: {0}")]
    InvalidRequest(String),

    /// The request body carried no query string
    #[error("GraphQL request must include a non-empty query")]
    MissingQuery,

    /// The query failed GraphQL parsing
    #[error("GraphQL parse error: {0}")]
    GraphqlParse(String),

    /// The query references operations/fields the schema does not define
    #[error("GraphQL validation error: {0}")]
    GraphqlValidation(String),

    /// No cached schema exists for the subgraph
    #[error("no schema available for subgraph '{0}'")]
    SchemaNotFound(String),

    /// The subgraph is down and mocking is disabled for it
    #[error("subgraph '{0}' is unavailable")]
    SubgraphUnavailable(String),

    /// Loading SDL from file, introspection, or the registry failed
    #[error("schema fetch failed: {0}")]
    SchemaFetch(String),

    /// The SDL was obtained but could not be compiled
    #[error("schema error: {0}")]
    Schema(String),

    /// Mock execution failed for a reason other than parse/validation
    #[error("mock generation failed: {0}")]
    MockGeneration(String),

    /// Upstream did not answer within the passthrough timeout
    #[error("upstream timed out: {0}")]
    GatewayTimeout(String),

    /// Upstream refused the connection or could not be resolved
    #[error("upstream unavailable: {0}")]
    ServiceUnavailable(String),

    /// Any other connection-class failure talking to the upstream
    #[error("bad gateway: {0}")]
    BadGateway(String),

    /// Startup or file configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation addressed a subgraph the health monitor does not know
    #[error("subgraph '{0}' is not registered")]
    NotRegistered(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable error code exposed in `extensions.code`.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::InvalidRequest(_) => "INVALID_GRAPHQL_REQUEST",
            Error::MissingQuery => "MISSING_QUERY",
            Error::GraphqlParse(_) => "GRAPHQL_PARSE_ERROR",
            Error::GraphqlValidation(_) => "GRAPHQL_VALIDATION_ERROR",
            Error::SchemaNotFound(_) => "SCHEMA_NOT_FOUND",
            Error::SubgraphUnavailable(_) => "SUBGRAPH_UNAVAILABLE",
            Error::SchemaFetch(_) => "SCHEMA_FETCH_FAILED",
            Error::Schema(_) => "SCHEMA_ERROR",
            Error::MockGeneration(_) => "MOCK_GENERATION_ERROR",
            Error::GatewayTimeout(_) => "GATEWAY_TIMEOUT",
            Error::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Error::BadGateway(_) => "BAD_GATEWAY",
            Error::Config(_) => "CONFIGURATION_ERROR",
            Error::NotRegistered(_) => "SUBGRAPH_NOT_REGISTERED",
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// HTTP status the error responder writes for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidUrl(_)
            | Error::InvalidRequest(_)
            | Error::MissingQuery
            | Error::GraphqlParse(_)
            | Error::GraphqlValidation(_) => StatusCode::BAD_REQUEST,
            Error::SchemaNotFound(_) | Error::NotRegistered(_) => StatusCode::NOT_FOUND,
            Error::SubgraphUnavailable(_) | Error::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::SchemaFetch(_) | Error::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Error::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Schema(_)
            | Error::MockGeneration(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to the GraphQL error envelope `{errors: [...], data: null}`.
    pub fn to_envelope(&self) -> GraphQLErrorResponse {
        GraphQLErrorResponse {
            errors: vec![GraphQLError {
                message: self.to_string(),
                extensions: GraphQLErrorExtensions {
                    code: self.code().to_string(),
                },
            }],
            data: serde_json::Value::Null,
        }
    }
}

/// One entry of the `errors` array in a GraphQL response.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphQLError {
    pub message: String,
    pub extensions: GraphQLErrorExtensions,
}

/// Extensions attached to a GraphQL error entry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphQLErrorExtensions {
    pub code: String,
}

/// The error response envelope written by the single error responder.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphQLErrorResponse {
    pub errors: Vec<GraphQLError>,
    pub data: serde_json::Value,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::debug!(code = self.code(), status = %status, error = %self, "request failed");
        (status, Json(self.to_envelope())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidUrl("not absolute".to_string());
        assert_eq!(err.to_string(), "invalid target URL: not absolute");

        let err = Error::SchemaNotFound("products".to_string());
        assert_eq!(
            err.to_string(),
            "no schema available for subgraph 'products'"
        );

        let err = Error::MissingQuery;
        assert_eq!(
            err.to_string(),
            "GraphQL request must include a non-empty query"
        );
    }

    #[test]
    fn test_error_codes_are_stable() {
        let cases = vec![
            (Error::InvalidUrl("x".into()), "INVALID_URL"),
            (Error::InvalidRequest("x".into()), "INVALID_GRAPHQL_REQUEST"),
            (Error::MissingQuery, "MISSING_QUERY"),
            (Error::GraphqlParse("x".into()), "GRAPHQL_PARSE_ERROR"),
            (
                Error::GraphqlValidation("x".into()),
                "GRAPHQL_VALIDATION_ERROR",
            ),
            (Error::SchemaNotFound("x".into()), "SCHEMA_NOT_FOUND"),
            (Error::SubgraphUnavailable("x".into()), "SUBGRAPH_UNAVAILABLE"),
            (Error::SchemaFetch("x".into()), "SCHEMA_FETCH_FAILED"),
            (Error::Schema("x".into()), "SCHEMA_ERROR"),
            (Error::MockGeneration("x".into()), "MOCK_GENERATION_ERROR"),
            (Error::GatewayTimeout("x".into()), "GATEWAY_TIMEOUT"),
            (Error::ServiceUnavailable("x".into()), "SERVICE_UNAVAILABLE"),
            (Error::BadGateway("x".into()), "BAD_GATEWAY"),
            (Error::Internal("x".into()), "INTERNAL_SERVER_ERROR"),
        ];

        for (err, code) in cases {
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(Error::InvalidUrl("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::SchemaNotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::SubgraphUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::GatewayTimeout("x".into()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(Error::BadGateway("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            Error::SchemaFetch("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::MockGeneration("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_envelope_shape() {
        let err = Error::SchemaNotFound("unknown".to_string());
        let envelope = err.to_envelope();

        assert!(envelope.data.is_null());
        assert_eq!(envelope.errors.len(), 1);
        assert!(envelope.errors[0].message.contains("unknown"));
        assert_eq!(envelope.errors[0].extensions.code, "SCHEMA_NOT_FOUND");
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = Error::MissingQuery.to_envelope();
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["data"], serde_json::Value::Null);
        assert_eq!(json["errors"][0]["extensions"]["code"], "MISSING_QUERY");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
