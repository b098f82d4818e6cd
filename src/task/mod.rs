//! Task, result, and structured value types shared by the coordinator and workers.

pub mod model;
pub mod value;

pub use model::{content_tag, Task, TaskMetadata, TaskResult};
pub use value::{decode_value, decode_values, encode_value, encode_values, Value, ValueKind};
