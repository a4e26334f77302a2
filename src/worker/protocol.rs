//! Wire messages of the worker protocol.
//!
//! Requests and responses travel as JSON objects correlated by an opaque `id` that is echoed
//! back verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::SqlWorkerError;
use crate::results::{QueryResult, RowObject};
use crate::types::{Params, QueryConfig};

/// Inbound message.
///
/// ```rust
/// use serde_json::json;
/// use sql_worker::prelude::*;
///
/// let request = Request::exec(7, "SELECT :x + 1 AS r").with_params(json!({":x": 5}));
/// assert_eq!(
///     serde_json::to_value(&request).unwrap(),
///     json!({"id": 7, "action": "exec", "sql": "SELECT :x + 1 AS r", "params": {":x": 5}})
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<QueryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer: Option<Vec<u8>>,
}

impl Request {
    fn with_action(id: impl Into<JsonValue>, action: &str) -> Self {
        Self {
            id: id.into(),
            action: Some(action.to_string()),
            ..Self::default()
        }
    }

    pub fn open(id: impl Into<JsonValue>, buffer: Option<Vec<u8>>) -> Self {
        Self {
            buffer,
            ..Self::with_action(id, "open")
        }
    }

    pub fn exec(id: impl Into<JsonValue>, sql: impl Into<String>) -> Self {
        Self {
            sql: Some(sql.into()),
            ..Self::with_action(id, "exec")
        }
    }

    pub fn each(id: impl Into<JsonValue>, sql: impl Into<String>) -> Self {
        Self {
            sql: Some(sql.into()),
            ..Self::with_action(id, "each")
        }
    }

    pub fn export(id: impl Into<JsonValue>) -> Self {
        Self::with_action(id, "export")
    }

    pub fn close(id: impl Into<JsonValue>) -> Self {
        Self::with_action(id, "close")
    }

    #[must_use]
    pub fn with_params(mut self, params: JsonValue) -> Self {
        self.params = Some(params);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Validate the message into a typed command.
    ///
    /// # Errors
    ///
    /// Returns `SqlWorkerError::ProtocolError` for an unknown action or a missing `sql`, and
    /// `SqlWorkerError::BindError` for parameters that are not representable.
    pub fn command(&self) -> Result<Action, SqlWorkerError> {
        let action = self.action.as_deref().unwrap_or_default();
        match action {
            "open" => Ok(Action::Open {
                buffer: self.buffer.clone(),
            }),
            "exec" | "each" => {
                let sql = self.sql.clone().ok_or_else(|| {
                    SqlWorkerError::ProtocolError(format!("{action}: Missing query string"))
                })?;
                let params = match &self.params {
                    Some(params) => Params::from_json(params)?,
                    None => None,
                };
                let config = self.config.unwrap_or_default();
                Ok(if action == "exec" {
                    Action::Exec {
                        sql,
                        params,
                        config,
                    }
                } else {
                    Action::Each {
                        sql,
                        params,
                        config,
                    }
                })
            }
            "export" => Ok(Action::Export),
            "close" => Ok(Action::Close),
            other => Err(SqlWorkerError::ProtocolError(format!(
                "Invalid action : {other}"
            ))),
        }
    }
}

/// A validated request.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Open {
        buffer: Option<Vec<u8>>,
    },
    Exec {
        sql: String,
        params: Option<Params>,
        config: QueryConfig,
    },
    Each {
        sql: String,
        params: Option<Params>,
        config: QueryConfig,
    },
    Export,
    Close,
}

impl Action {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Action::Open { .. } => "open",
            Action::Exec { .. } => "exec",
            Action::Each { .. } => "each",
            Action::Export => "export",
            Action::Close => "close",
        }
    }
}

/// Outbound message. Every request ends with exactly one terminal response; `each` precedes
/// it with one [`Response::Row`] per row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ready {
        id: JsonValue,
        ready: bool,
    },
    Results {
        id: JsonValue,
        results: Vec<QueryResult>,
    },
    Row {
        id: JsonValue,
        row: RowObject,
        finished: bool,
    },
    Finished {
        id: JsonValue,
        finished: bool,
    },
    Buffer {
        id: JsonValue,
        buffer: Vec<u8>,
    },
    Error {
        id: JsonValue,
        error: String,
    },
    Closed {
        id: JsonValue,
    },
}

impl Response {
    #[must_use]
    pub fn id(&self) -> &JsonValue {
        match self {
            Response::Ready { id, .. }
            | Response::Results { id, .. }
            | Response::Row { id, .. }
            | Response::Finished { id, .. }
            | Response::Buffer { id, .. }
            | Response::Error { id, .. }
            | Response::Closed { id } => id,
        }
    }

    /// False only for streamed rows.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::Row { .. })
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        if let Response::Error { error, .. } = self {
            Some(error)
        } else {
            None
        }
    }

    pub(crate) fn failure(id: JsonValue, err: &SqlWorkerError) -> Self {
        Response::Error {
            id,
            error: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_sql_names_the_action() {
        let err = Request::with_action(1, "each").command().unwrap_err();
        assert_eq!(err.to_string(), "each: Missing query string");
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = Request::with_action(1, "drop").command().unwrap_err();
        assert!(matches!(err, SqlWorkerError::ProtocolError(_)));
        assert_eq!(err.to_string(), "Invalid action : drop");
    }

    #[test]
    fn request_parses_from_wire() {
        let request: Request = serde_json::from_value(json!({
            "id": "a1",
            "action": "exec",
            "sql": "SELECT 1",
            "params": [1, "x"],
            "config": {"useBigInt": true}
        }))
        .unwrap();
        let Action::Exec { params, config, .. } = request.command().unwrap() else {
            panic!("expected exec");
        };
        assert!(config.use_big_int);
        assert_eq!(params, Some(Params::positional::<[crate::types::Value; 2], crate::types::Value>([1_i64.into(), "x".into()])));
    }

    #[test]
    fn responses_serialize_to_plain_shapes() {
        let shapes = [
            (
                Response::Ready {
                    id: json!(1),
                    ready: true,
                },
                json!({"id": 1, "ready": true}),
            ),
            (
                Response::Finished {
                    id: json!(2),
                    finished: true,
                },
                json!({"id": 2, "finished": true}),
            ),
            (Response::Closed { id: json!(3) }, json!({"id": 3})),
            (
                Response::Error {
                    id: json!(4),
                    error: "boom".into(),
                },
                json!({"id": 4, "error": "boom"}),
            ),
        ];
        for (response, expected) in shapes {
            assert_eq!(serde_json::to_value(&response).unwrap(), expected);
        }
    }
}
