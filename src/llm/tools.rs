//! Tools the model can call

use chrono::{FixedOffset, Utc};
use serde_json::{Value, json};

/// A function exposed to the model
pub trait Tool: Send + Sync {
    /// Function name
    fn name(&self) -> &str;

    /// What the function does, for the model
    fn description(&self) -> &str;

    /// JSON schema of the arguments
    fn parameters(&self) -> Value;

    /// Run with parsed arguments, returning text for the model
    fn call(&self, args: &Value) -> String;
}

/// Registered tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(CurrentTime);
        registry
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.push(Box::new(tool));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions in chat-completions `tools` format
    #[must_use]
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters(),
                    }
                })
            })
            .collect()
    }

    /// Run `name` with JSON-encoded `arguments`
    ///
    /// Failures are reported to the model as text rather than aborting the
    /// turn.
    #[must_use]
    pub fn execute(&self, name: &str, arguments: &str) -> String {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            tracing::warn!(tool = name, "model called unknown tool");
            return format!("Error: unknown tool {name}");
        };

        let args = if arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str(arguments) {
                Ok(args) => args,
                Err(e) => return format!("Error: invalid arguments: {e}"),
            }
        };

        tracing::debug!(tool = name, %args, "executing tool");
        tool.call(&args)
    }
}

/// Current date and time, optionally at a UTC offset
pub struct CurrentTime;

impl Tool for CurrentTime {
    fn name(&self) -> &'static str {
        "get_current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current date and time. Pass utc_offset_hours for a specific time zone."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset_hours": {
                    "type": "number",
                    "description": "Offset from UTC in hours, e.g. -5 or 5.5"
                }
            }
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn call(&self, args: &Value) -> String {
        let hours = args
            .get("utc_offset_hours")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let seconds = (hours * 3600.0).round() as i32;

        let Some(offset) = FixedOffset::east_opt(seconds) else {
            return format!("Error: invalid UTC offset {hours}");
        };

        Utc::now()
            .with_timezone(&offset)
            .format("%A, %B %-d %Y, %H:%M (UTC%:z)")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions_shape() {
        let defs = ToolRegistry::builtin().definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0]["function"]["name"], "get_current_time");
        assert_eq!(defs[0]["type"], "function");
    }

    #[test]
    fn test_current_time_offsets() {
        let registry = ToolRegistry::builtin();
        assert!(registry.execute("get_current_time", "").contains("UTC+00:00"));
        assert!(
            registry
                .execute("get_current_time", r#"{"utc_offset_hours": 5.5}"#)
                .contains("UTC+05:30")
        );
        assert!(
            registry
                .execute("get_current_time", r#"{"utc_offset_hours": 99}"#)
                .starts_with("Error")
        );
    }

    #[test]
    fn test_unknown_tool_and_bad_args() {
        let registry = ToolRegistry::builtin();
        assert!(registry.execute("launch_rockets", "{}").starts_with("Error"));
        assert!(registry.execute("get_current_time", "{not json").starts_with("Error"));
    }
}
