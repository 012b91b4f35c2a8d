use super::response::ErrorCode;
use crate::world::DeviceKind;
use ges_core::registry::RegistryError;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// A request sent to the daemon as one JSON datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Runs the simulation, for `time` simulated seconds or until killed.
    Run {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<f64>,
    },
    Kill,
    Spawn {
        #[serde(rename = "type")]
        kind: SpawnKind,
        #[serde(default = "one")]
        count: usize,
    },
    Pair {
        parent: String,
        child: String,
    },
    List {
        #[serde(rename = "type", default)]
        kind: DeviceKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnKind {
    Valve,
    LeakDetector,
}

fn one() -> usize {
    1
}

impl Command {
    pub fn parse(datagram: &[u8]) -> Result<Self, CommandError> {
        let command: Self =
            serde_json::from_slice(datagram).map_err(|e| CommandError::Invalid(e.to_string()))?;
        if let Self::Run { time: Some(time) } = command {
            if !time.is_finite() || time < 0.0 {
                return Err(CommandError::Invalid(format!("run time must be non-negative, got {time}")));
            }
        }
        Ok(command)
    }

    /// Whether the command changes the set of devices.
    pub fn mutates(&self) -> bool {
        matches!(self, Self::Spawn { .. } | Self::Pair { .. })
    }
}

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum CommandError {
    #[error("{0}")]
    Invalid(String),
    #[error("The simulation is running")]
    Running,
    #[error("{0}")]
    DoesNotExist(String),
    #[error("{0}")]
    Generic(String),
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Invalid(_) => ErrorCode::InvalidCommand,
            Self::Running => ErrorCode::SimulationRunning,
            Self::DoesNotExist(_) => ErrorCode::DoesNotExist,
            Self::Generic(_) => ErrorCode::Generic,
        }
    }
}

impl From<RegistryError> for CommandError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::DoesNotExist(_) => Self::DoesNotExist(error.to_string()),
            other => Self::Generic(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Command, CommandError> {
        Command::parse(text.as_bytes())
    }

    #[test]
    fn parses_every_command() {
        assert_eq!(parse(r#"{"command":"run"}"#), Ok(Command::Run { time: None }));
        assert_eq!(
            parse(r#"{"command":"run","time":600}"#),
            Ok(Command::Run { time: Some(600.0) })
        );
        assert_eq!(parse(r#"{"command":"kill"}"#), Ok(Command::Kill));
        assert_eq!(
            parse(r#"{"command":"spawn","type":"leak_detector","count":3}"#),
            Ok(Command::Spawn {
                kind: SpawnKind::LeakDetector,
                count: 3
            })
        );
        assert_eq!(
            parse(r#"{"command":"spawn","type":"valve"}"#),
            Ok(Command::Spawn {
                kind: SpawnKind::Valve,
                count: 1
            })
        );
        assert_eq!(
            parse(r#"{"command":"pair","parent":"a","child":"b"}"#),
            Ok(Command::Pair {
                parent: "a".into(),
                child: "b".into()
            })
        );
        assert_eq!(
            parse(r#"{"command":"list","type":"leak_detectors"}"#),
            Ok(Command::List {
                kind: DeviceKind::LeakDetectors
            })
        );
        assert_eq!(
            parse(r#"{"command":"list"}"#),
            Ok(Command::List {
                kind: DeviceKind::Devices
            })
        );
    }

    #[test]
    fn rejects_nonsense() {
        for text in [
            "not json",
            r#"{"command":"explode"}"#,
            r#"{"command":"spawn","type":"cow"}"#,
            r#"{"command":"run","time":-5}"#,
        ] {
            let error = parse(text).unwrap_err();
            assert_eq!(error.code(), ErrorCode::InvalidCommand, "{text}");
        }
    }

    #[test]
    fn registry_errors_map_to_codes() {
        let missing = CommandError::from(RegistryError::DoesNotExist("x".into()));
        assert_eq!(missing.code(), ErrorCode::DoesNotExist);
        assert_eq!(CommandError::from(RegistryError::SelfPairing).code(), ErrorCode::Generic);
    }
}
