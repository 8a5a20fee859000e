use serde::Serialize;
use serde_json::Value;

/// System status reported by `/rest/system/status`.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct SystemInfo {
    pub my_id: Option<String>,
    pub started_at: Option<String>,
    pub uptime_seconds: Option<f64>,
    pub goroutine_count: Option<u64>,
}

impl SystemInfo {
    pub fn from_value(value: &Value) -> Self {
        Self {
            my_id: value
                .get("myID")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            started_at: value
                .get("startTime")
                .or_else(|| value.get("startedAt"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            uptime_seconds: value.get("uptime").and_then(|v| v.as_f64()),
            goroutine_count: value.get("goroutines").and_then(|v| v.as_u64()),
        }
    }
}
