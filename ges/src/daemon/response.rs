use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// The reply to every daemon command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok {
        #[serde(default)]
        data: serde_json::Value,
    },
    Error {
        errors: Vec<ResponseError>,
    },
}

impl Response {
    pub fn ok(data: impl Into<serde_json::Value>) -> Self {
        Self::Ok { data: data.into() }
    }

    pub fn error(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self::Error {
            errors: vec![ResponseError {
                code,
                detail: detail.into(),
            }],
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: ErrorCode,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Generic,
    SimulationRunning,
    DoesNotExist,
    InvalidCommand,
}

impl ErrorCode {
    pub fn description(self) -> &'static str {
        match self {
            Self::Generic => "Generic error",
            Self::SimulationRunning => "Simulation running",
            Self::DoesNotExist => "Specified object does not exist",
            Self::InvalidCommand => "Command not understood",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelopes() {
        let ok = serde_json::to_value(Response::ok(json!({"count": 2}))).unwrap();
        assert_eq!(ok, json!({"status": "ok", "data": {"count": 2}}));

        let error = Response::error(ErrorCode::DoesNotExist, "no machine named x");
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({
                "status": "error",
                "errors": [{"code": "DOES_NOT_EXIST", "detail": "no machine named x"}]
            })
        );
        let parsed: Response = serde_json::from_value(json!({"status": "ok"})).unwrap();
        assert_eq!(parsed, Response::ok(serde_json::Value::Null));
    }
}
