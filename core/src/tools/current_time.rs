use crate::traits::Tool;
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{Value, json};

const MAX_OFFSET_HOURS: f64 = 14.0;

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time, optionally shifted by a UTC offset in hours"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset_hours": {
                    "type": "number",
                    "description": "Offset from UTC in hours, e.g. -5 or 5.5. Defaults to 0"
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let hours = args
            .get("utc_offset_hours")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let offset = offset_from_hours(hours)?;
        let now = Utc::now().with_timezone(&offset);

        Ok(Value::String(format!(
            "Current time (UTC{}): {}",
            offset,
            now.format("%Y-%m-%d %H:%M:%S (%A)")
        )))
    }
}

fn offset_from_hours(hours: f64) -> anyhow::Result<FixedOffset> {
    if !hours.is_finite() || hours.abs() > MAX_OFFSET_HOURS {
        anyhow::bail!("UTC offset {} is out of range", hours);
    }
    let seconds = (hours * 3600.0).round() as i32;
    FixedOffset::east_opt(seconds).ok_or_else(|| anyhow::anyhow!("Invalid UTC offset {}", hours))
}
