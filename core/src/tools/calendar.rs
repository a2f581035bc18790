use crate::tools::{
    extract_string_arg, extract_string_list_arg_opt, extract_usize_arg_opt, local_id,
};
use crate::traits::Tool;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAX_LIST_RESULTS: usize = 100;
const DEFAULT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    /// RFC 3339, UTC.
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attendees: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: String,
    pub description: String,
    pub attendees: Vec<String>,
}

/// Fields left `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPatch {
    pub summary: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub attendees: Option<Vec<String>>,
}

/// Calendar backend injected into the calendar tools at registration.
#[async_trait]
pub trait Calendar: Send + Sync {
    /// Events overlapping `[from, to)`, earliest first.
    async fn list(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        max_results: usize,
    ) -> anyhow::Result<Vec<CalendarEvent>>;

    async fn create(&self, event: NewEvent) -> anyhow::Result<CalendarEvent>;

    async fn update(&self, event_id: &str, patch: EventPatch) -> anyhow::Result<CalendarEvent>;

    async fn delete(&self, event_id: &str) -> anyhow::Result<()>;
}

fn parse_time(args: &Value, key: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
    match args.get(key).and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .with_context(|| format!("'{}' must be an RFC 3339 timestamp, got '{}'", key, raw)),
    }
}

fn required_time(args: &Value, key: &str) -> anyhow::Result<DateTime<Utc>> {
    parse_time(args, key)?.ok_or_else(|| anyhow::anyhow!("Missing '{}' parameter", key))
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn string_opt(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn check_order(start: DateTime<Utc>, end: DateTime<Utc>) -> anyhow::Result<()> {
    if end <= start {
        anyhow::bail!(
            "event must end after it starts ({} >= {})",
            format_time(start),
            format_time(end)
        );
    }
    Ok(())
}

pub struct ListEventsTool {
    calendar: Arc<dyn Calendar>,
}

impl ListEventsTool {
    pub fn new(calendar: Arc<dyn Calendar>) -> Self {
        Self { calendar }
    }
}

#[async_trait]
impl Tool for ListEventsTool {
    fn name(&self) -> &str {
        "list_events"
    }

    fn description(&self) -> &str {
        "List calendar events in a time window, by default the next 7 days"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "time_min": { "type": "string", "description": "Window start (RFC 3339), defaults to now" },
                "time_max": { "type": "string", "description": "Window end (RFC 3339), defaults to 7 days after the start" },
                "max_results": { "type": "integer", "description": "Maximum number of events, defaults to 10" }
            }
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let from = parse_time(&args, "time_min")?.unwrap_or_else(Utc::now);
        let to = parse_time(&args, "time_max")?
            .unwrap_or_else(|| from + Duration::days(DEFAULT_WINDOW_DAYS));
        let max_results = extract_usize_arg_opt(&args, "max_results", 10).clamp(1, MAX_LIST_RESULTS);

        let events = self.calendar.list(from, to, max_results).await?;
        Ok(serde_json::to_value(events)?)
    }
}

pub struct CreateEventTool {
    calendar: Arc<dyn Calendar>,
}

impl CreateEventTool {
    pub fn new(calendar: Arc<dyn Calendar>) -> Self {
        Self { calendar }
    }
}

#[async_trait]
impl Tool for CreateEventTool {
    fn name(&self) -> &str {
        "create_event"
    }

    fn description(&self) -> &str {
        "Create a calendar event"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string", "description": "Event title" },
                "start_time": { "type": "string", "description": "Start (RFC 3339)" },
                "end_time": { "type": "string", "description": "End (RFC 3339)" },
                "description": { "type": "string" },
                "location": { "type": "string" },
                "attendees": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["summary", "start_time", "end_time"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let start = required_time(&args, "start_time")?;
        let end = required_time(&args, "end_time")?;
        check_order(start, end)?;

        let event = self
            .calendar
            .create(NewEvent {
                summary: extract_string_arg(&args, "summary")?,
                start,
                end,
                location: string_opt(&args, "location").unwrap_or_default(),
                description: string_opt(&args, "description").unwrap_or_default(),
                attendees: extract_string_list_arg_opt(&args, "attendees")?,
            })
            .await?;
        tracing::info!(event_id = %event.id, "Calendar event created");

        Ok(json!({
            "success": true,
            "event_id": event.id,
            "message": "Event created successfully!"
        }))
    }
}

pub struct UpdateEventTool {
    calendar: Arc<dyn Calendar>,
}

impl UpdateEventTool {
    pub fn new(calendar: Arc<dyn Calendar>) -> Self {
        Self { calendar }
    }
}

#[async_trait]
impl Tool for UpdateEventTool {
    fn name(&self) -> &str {
        "update_event"
    }

    fn description(&self) -> &str {
        "Change fields of an existing calendar event"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "event_id": { "type": "string" },
                "summary": { "type": "string" },
                "start_time": { "type": "string", "description": "New start (RFC 3339)" },
                "end_time": { "type": "string", "description": "New end (RFC 3339)" },
                "description": { "type": "string" },
                "location": { "type": "string" },
                "attendees": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["event_id"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let event_id = extract_string_arg(&args, "event_id")?;
        let attendees = match args.get("attendees") {
            None | Some(Value::Null) => None,
            Some(_) => Some(extract_string_list_arg_opt(&args, "attendees")?),
        };
        let patch = EventPatch {
            summary: string_opt(&args, "summary"),
            start: parse_time(&args, "start_time")?,
            end: parse_time(&args, "end_time")?,
            location: string_opt(&args, "location"),
            description: string_opt(&args, "description"),
            attendees,
        };

        let event = self.calendar.update(&event_id, patch).await?;
        Ok(json!({
            "success": true,
            "event_id": event.id,
            "message": "Event updated successfully!"
        }))
    }
}

pub struct DeleteEventTool {
    calendar: Arc<dyn Calendar>,
}

impl DeleteEventTool {
    pub fn new(calendar: Arc<dyn Calendar>) -> Self {
        Self { calendar }
    }
}

#[async_trait]
impl Tool for DeleteEventTool {
    fn name(&self) -> &str {
        "delete_event"
    }

    fn description(&self) -> &str {
        "Delete a calendar event"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "event_id": { "type": "string" } },
            "required": ["event_id"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let event_id = extract_string_arg(&args, "event_id")?;
        self.calendar.delete(&event_id).await?;
        Ok(json!({
            "success": true,
            "message": "Event deleted successfully!"
        }))
    }
}

/// Calendar stored as one JSON array in a local file.
pub struct FileCalendar {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileCalendar {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn load(&self) -> anyhow::Result<Vec<CalendarEvent>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read calendar {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse calendar {}", self.path.display()))
    }

    async fn store(&self, events: &[CalendarEvent]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(events)?)
            .await
            .with_context(|| format!("Failed to write calendar {}", self.path.display()))
    }
}

fn event_bounds(event: &CalendarEvent) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = DateTime::parse_from_rfc3339(&event.start).ok()?;
    let end = DateTime::parse_from_rfc3339(&event.end).ok()?;
    Some((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

#[async_trait]
impl Calendar for FileCalendar {
    async fn list(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        max_results: usize,
    ) -> anyhow::Result<Vec<CalendarEvent>> {
        let _guard = self.lock.lock().await;
        let mut events: Vec<(DateTime<Utc>, CalendarEvent)> = self
            .load()
            .await?
            .into_iter()
            .filter_map(|e| {
                let (start, end) = event_bounds(&e)?;
                (start < to && end > from).then_some((start, e))
            })
            .collect();
        events.sort_by_key(|(start, _)| *start);
        Ok(events
            .into_iter()
            .take(max_results)
            .map(|(_, e)| e)
            .collect())
    }

    async fn create(&self, event: NewEvent) -> anyhow::Result<CalendarEvent> {
        let _guard = self.lock.lock().await;
        let mut events = self.load().await?;
        let created = CalendarEvent {
            id: local_id("evt"),
            summary: event.summary,
            start: format_time(event.start),
            end: format_time(event.end),
            location: event.location,
            description: event.description,
            attendees: event.attendees,
        };
        events.push(created.clone());
        self.store(&events).await?;
        Ok(created)
    }

    async fn update(&self, event_id: &str, patch: EventPatch) -> anyhow::Result<CalendarEvent> {
        let _guard = self.lock.lock().await;
        let mut events = self.load().await?;
        let event = events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or_else(|| anyhow::anyhow!("no event with id {}", event_id))?;

        let mut updated = event.clone();
        if let Some(summary) = patch.summary {
            updated.summary = summary;
        }
        if let Some(start) = patch.start {
            updated.start = format_time(start);
        }
        if let Some(end) = patch.end {
            updated.end = format_time(end);
        }
        if let Some(location) = patch.location {
            updated.location = location;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(attendees) = patch.attendees {
            updated.attendees = attendees;
        }
        if let Some((start, end)) = event_bounds(&updated) {
            check_order(start, end)?;
        }

        *event = updated.clone();
        self.store(&events).await?;
        Ok(updated)
    }

    async fn delete(&self, event_id: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut events = self.load().await?;
        let before = events.len();
        events.retain(|e| e.id != event_id);
        if events.len() == before {
            anyhow::bail!("no event with id {}", event_id);
        }
        self.store(&events).await
    }
}
