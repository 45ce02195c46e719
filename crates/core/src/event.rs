//! Inbound notification types.
//!
//! Every message body consumed from the event or task queue parses into
//! one closed [`Event`] enum, matched exhaustively by the loops. The
//! dispatch timer carries no payload: its identity is the queue message
//! id of the delayed self-send.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One inbound notification, tagged by `eventType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "kebab-case")]
pub enum Event {
    ObjectCreated(ObjectCreated),
    DispatchTick,
    Shutdown,
    LoadTask(LoadTask),
}

impl Event {
    /// Parse a raw queue message body.
    pub fn parse(body: &str) -> Result<Event, CoreError> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn to_body(&self) -> String {
        // Event serialization is infallible: no non-string map keys, no
        // custom Serialize impls.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// An object-creation notification from the upstream object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectCreated {
    pub url: String,
    pub size: i64,
    pub schema: String,
    pub table: String,
    pub time: DateTime<Utc>,
    /// Upstream event name; only `ObjectCreated:*` notifications are loadable.
    #[serde(default = "default_event_name")]
    pub event_name: String,
}

fn default_event_name() -> String {
    "ObjectCreated:Put".to_string()
}

impl ObjectCreated {
    /// Whether this notification announces a created object (as opposed to
    /// a removal or restore, which are acked and dropped).
    pub fn created(&self) -> bool {
        self.event_name.starts_with("ObjectCreated:")
    }

    /// Destination identifier, `schema.table`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// A cut task announced to the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTask {
    pub task_seq: i64,
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub object_urls: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub rerun: bool,
}

impl LoadTask {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_created() {
        let body = r#"{
            "eventType": "object-created",
            "url": "s3://bucket/logs/0001.gz",
            "size": 1024,
            "schema": "app",
            "table": "events",
            "time": "2025-06-14T12:00:00Z"
        }"#;
        let event = Event::parse(body).unwrap();
        match event {
            Event::ObjectCreated(obj) => {
                assert_eq!(obj.url, "s3://bucket/logs/0001.gz");
                assert_eq!(obj.size, 1024);
                assert_eq!(obj.qualified_name(), "app.events");
                assert!(obj.created());
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_non_creation_event_name() {
        let body = r#"{
            "eventType": "object-created",
            "url": "s3://bucket/logs/0001.gz",
            "size": 1024,
            "schema": "app",
            "table": "events",
            "time": "2025-06-14T12:00:00Z",
            "eventName": "ObjectRemoved:Delete"
        }"#;
        match Event::parse(body).unwrap() {
            Event::ObjectCreated(obj) => assert!(!obj.created()),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_dispatch_tick_and_shutdown() {
        assert_eq!(
            Event::parse(r#"{"eventType":"dispatch-tick"}"#).unwrap(),
            Event::DispatchTick
        );
        assert_eq!(
            Event::parse(r#"{"eventType":"shutdown"}"#).unwrap(),
            Event::Shutdown
        );
    }

    #[test]
    fn test_load_task_roundtrip() {
        let task = LoadTask {
            task_seq: 42,
            schema: "app".into(),
            table: "events".into(),
            object_urls: vec!["s3://b/1".into(), "s3://b/2".into()],
            disabled: false,
            rerun: true,
        };
        let body = Event::LoadTask(task.clone()).to_body();
        match Event::parse(&body).unwrap() {
            Event::LoadTask(parsed) => assert_eq!(parsed, task),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_body() {
        assert!(Event::parse("not json").is_err());
        assert!(Event::parse(r#"{"eventType":"no-such-kind"}"#).is_err());
    }
}
