// Copyright 2026 The Toolgate Project
// SPDX-License-Identifier: Apache-2.0

// Side-effect collaborators of the loop engine
//
// Both sinks are fire-and-forget: the loop never waits on them and their
// failures never change what the client sees.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::grammar::DiaryNote;
use crate::tools::{ToolDispatcher, ToolOutcome, ToolResult};

// ---------------------------------------------------------------------------
// Tool log
// ---------------------------------------------------------------------------

/// One dispatch outcome, as reported to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolLogEvent {
    pub tool_name: String,
    pub status: ToolOutcome,
    pub content: String,
    /// Delivery mode that produced the call ("stream" or "complete").
    pub source: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl ToolLogEvent {
    pub fn from_result(result: &ToolResult, source: &'static str) -> Self {
        Self {
            tool_name: result.name.clone(),
            status: result.outcome,
            content: result.text.clone(),
            source,
            timestamp: Utc::now(),
        }
    }
}

/// Receives every dispatch outcome. Must not block.
pub trait ToolLogSink: Send + Sync {
    fn record(&self, event: ToolLogEvent);
}

/// Writes dispatch outcomes as structured tracing events.
pub struct TracingToolLog;

impl ToolLogSink for TracingToolLog {
    fn record(&self, event: ToolLogEvent) {
        tracing::info!(
            tool = %event.tool_name,
            status = %event.status,
            source = event.source,
            timestamp = %event.timestamp.to_rfc3339(),
            content_chars = event.content.chars().count(),
            "tool call finished"
        );
    }
}

// ---------------------------------------------------------------------------
// Diary notes
// ---------------------------------------------------------------------------

#[async_trait]
pub trait NoteWriter: Send + Sync {
    async fn write(&self, note: DiaryNote) -> Result<(), String>;
}

/// Persists notes by calling a configured tool through the dispatcher.
pub struct DispatcherNoteWriter {
    dispatcher: Arc<dyn ToolDispatcher>,
    tool: String,
}

impl DispatcherNoteWriter {
    pub fn new(dispatcher: Arc<dyn ToolDispatcher>, tool: impl Into<String>) -> Self {
        Self {
            dispatcher,
            tool: tool.into(),
        }
    }
}

#[async_trait]
impl NoteWriter for DispatcherNoteWriter {
    async fn write(&self, note: DiaryNote) -> Result<(), String> {
        let mut args = BTreeMap::new();
        args.insert("maidName".to_string(), note.maid);
        args.insert("dateString".to_string(), note.date);
        args.insert("contentText".to_string(), note.content);
        self.dispatcher
            .dispatch(&self.tool, &args)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Hand each note to the writer on its own task.
pub fn spawn_note_writes(writer: &Arc<dyn NoteWriter>, notes: Vec<DiaryNote>, request_id: &str) {
    for note in notes {
        let writer = Arc::clone(writer);
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            let maid = note.maid.clone();
            if let Err(e) = writer.write(note).await {
                tracing::warn!(request_id = %request_id, maid = %maid, error = %e, "diary note write failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::DispatchError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        calls: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    }

    #[async_trait]
    impl ToolDispatcher for Capture {
        async fn dispatch(
            &self,
            name: &str,
            args: &BTreeMap<String, String>,
        ) -> Result<String, DispatchError> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), args.clone()));
            Ok("saved".into())
        }
    }

    fn note() -> DiaryNote {
        DiaryNote {
            maid: "Alice".into(),
            date: "2026.10.16".into(),
            content: "Learned a thing.".into(),
        }
    }

    #[tokio::test]
    async fn dispatcher_writer_maps_fields_to_args() {
        let capture = Arc::new(Capture::default());
        let writer = DispatcherNoteWriter::new(capture.clone(), "DailyNoteWrite");
        writer.write(note()).await.unwrap();

        let calls = capture.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (name, args) = &calls[0];
        assert_eq!(name, "DailyNoteWrite");
        assert_eq!(args["maidName"], "Alice");
        assert_eq!(args["dateString"], "2026.10.16");
        assert_eq!(args["contentText"], "Learned a thing.");
    }

    #[tokio::test]
    async fn spawned_writes_reach_the_dispatcher() {
        let capture = Arc::new(Capture::default());
        let writer: Arc<dyn NoteWriter> =
            Arc::new(DispatcherNoteWriter::new(capture.clone(), "DailyNoteWrite"));
        spawn_note_writes(&writer, vec![note(), note()], "req-1");

        for _ in 0..50 {
            if capture.calls.lock().unwrap().len() == 2 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("note writes never ran");
    }

    #[test]
    fn log_event_copies_result() {
        let result = ToolResult::from_dispatch("Echo", Ok("hi".into()));
        let event = ToolLogEvent::from_result(&result, "complete");
        assert_eq!(event.tool_name, "Echo");
        assert_eq!(event.status, ToolOutcome::Success);
        assert_eq!(event.content, "hi");
        assert_eq!(event.source, "complete");
    }
}
