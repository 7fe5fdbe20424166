use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /api/execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub endpoint: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ExecuteRequest {
    /// Flatten params into query pairs. Strings are sent bare, other
    /// scalars in their JSON form; nulls are dropped.
    pub fn query(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter_map(|(key, value)| {
                let rendered = match value {
                    Value::Null => return None,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((key.clone(), rendered))
            })
            .collect()
    }
}
