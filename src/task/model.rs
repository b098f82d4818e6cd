use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A unit of submitted work.
///
/// The payload and argument bytes are opaque to the coordinator; only the
/// worker's loader and engine interpret them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: Uuid,
    /// Cache key for the loaded payload on the worker
    pub qualifier: String,
    pub entry_point: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub arguments: Vec<u8>,
    pub content_tag: String,
    pub metadata: TaskMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: i32,
    /// Declared deadline. Carried along but not enforced by the worker.
    #[serde(default)]
    pub timeout_ms: u64,
}

impl Default for TaskMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            priority: 0,
            timeout_ms: 0,
        }
    }
}

impl Task {
    pub fn new(
        qualifier: impl Into<String>,
        entry_point: impl Into<String>,
        payload: Vec<u8>,
        arguments: Vec<u8>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            qualifier: qualifier.into(),
            entry_point: entry_point.into(),
            content_tag: content_tag(&payload),
            payload,
            arguments,
            metadata: TaskMetadata::default(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.metadata.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.metadata.timeout_ms = timeout_ms;
        self
    }
}

/// SHA-256 of the payload, lowercase hex.
pub fn content_tag(payload: &[u8]) -> String {
    format!("{:x}", Sha256::digest(payload))
}

/// Outcome of executing a [`Task`]: either encoded return bytes or an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TaskResultWire", into = "TaskResultWire")]
pub struct TaskResult {
    pub task_id: Uuid,
    pub outcome: Result<Vec<u8>, String>,
}

impl TaskResult {
    pub fn success(task_id: Uuid, result: Vec<u8>) -> Self {
        Self {
            task_id,
            outcome: Ok(result),
        }
    }

    pub fn failure(task_id: Uuid, error_message: impl Into<String>) -> Self {
        Self {
            task_id,
            outcome: Err(error_message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn result(&self) -> Option<&[u8]> {
        self.outcome.as_deref().ok()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(String::as_str)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResultWire {
    task_id: Uuid,
    success: bool,
    #[serde(default, with = "base64_bytes_opt", skip_serializing_if = "Option::is_none")]
    result: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl TryFrom<TaskResultWire> for TaskResult {
    type Error = String;

    fn try_from(wire: TaskResultWire) -> Result<Self, Self::Error> {
        let outcome = match (wire.success, wire.result, wire.error_message) {
            (true, Some(bytes), None) => Ok(bytes),
            (false, None, Some(message)) => Err(message),
            (true, _, _) => {
                return Err("successful result must carry result bytes and no errorMessage".into())
            }
            (false, _, _) => {
                return Err("failed result must carry an errorMessage and no result".into())
            }
        };
        Ok(TaskResult {
            task_id: wire.task_id,
            outcome,
        })
    }
}

impl From<TaskResult> for TaskResultWire {
    fn from(result: TaskResult) -> Self {
        match result.outcome {
            Ok(bytes) => TaskResultWire {
                task_id: result.task_id,
                success: true,
                result: Some(bytes),
                error_message: None,
            },
            Err(message) => TaskResultWire {
                task_id: result.task_id,
                success: false,
                result: None,
                error_message: Some(message),
            },
        }
    }
}

mod base64_bytes {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&BASE64_STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| BASE64_STANDARD.decode(encoded.as_bytes()))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
