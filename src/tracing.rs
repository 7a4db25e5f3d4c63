//! Event tracing for debugging window-manager negotiation.
//!
//! Provides a ring buffer of recent protocol events and state transitions.
//! Recording is switched on per toolkit (`wm trace on` or `[wm] trace`), and
//! the log can be read back through `Toolkit::trace_log`.

use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::state::StateTransition;

/// Maximum number of events to keep in the trace buffer
const DEFAULT_MAX_ENTRIES: usize = 1000;

/// A single entry in the trace log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<u32>,
    pub details: String,
}

/// Event tracer with ring buffer storage
pub struct EventTracer {
    entries: VecDeque<TraceEntry>,
    max_entries: usize,
    sequence: u64,
    start_time: Instant,
    enabled: bool,
}

impl EventTracer {
    /// Create a new, disabled event tracer with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    /// Create a new event tracer with specified capacity
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(DEFAULT_MAX_ENTRIES)),
            max_entries,
            sequence: 0,
            start_time: Instant::now(),
            enabled: false,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get the current timestamp in milliseconds since tracer start
    fn timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Trace an X11 event
    pub fn trace_x11_event(&mut self, event_type: &str, window: Option<u32>, details: &str) {
        if self.enabled {
            self.add_entry(event_type.to_string(), window, details.to_string());
        }
    }

    /// Trace a state transition
    pub fn trace_transition(&mut self, transition: &StateTransition) {
        if !self.enabled {
            return;
        }
        let (event_type, window, details) = match transition {
            StateTransition::GrabChanged { from, to, window } => (
                "grab_changed",
                *window,
                format!("{:?} -> {:?}", from, to),
            ),
            StateTransition::WmStateChanged { window, from, to } => (
                "wm_state_changed",
                Some(*window),
                format!("{:?} -> {:?}", from, to),
            ),
            StateTransition::ConfigureRequested {
                window,
                x,
                y,
                width,
                height,
                moved,
            } => (
                "configure_requested",
                Some(*window),
                format!("{}x{}+{}+{} move={}", width, height, x, y, moved),
            ),
            StateTransition::WaitTimedOut { window, waiting_for } => (
                "wait_timed_out",
                Some(*window),
                waiting_for.clone(),
            ),
            StateTransition::Reparented { window, frame } => (
                "reparented",
                Some(*window),
                match frame {
                    Some(f) => format!("frame=0x{:x}", f),
                    None => "frame=none".to_string(),
                },
            ),
            StateTransition::WindowDestroyed { window, path } => (
                "window_destroyed",
                *window,
                path.clone().unwrap_or_default(),
            ),
            StateTransition::SendCompleted { target, code } => (
                "send_completed",
                None,
                format!("target={} code={}", target, code),
            ),
        };
        self.add_entry(event_type.to_string(), window, details);
    }

    /// Add an entry to the trace buffer
    fn add_entry(&mut self, event_type: String, window: Option<u32>, details: String) {
        // Remove oldest entry if at capacity
        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }

        self.sequence += 1;
        self.entries.push_back(TraceEntry {
            sequence: self.sequence,
            timestamp_ms: self.timestamp(),
            event_type,
            window,
            details,
        });
    }

    /// Get the last N entries
    pub fn get_last(&self, n: usize) -> Vec<TraceEntry> {
        let start = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(start).cloned().collect()
    }

    /// Get all entries
    pub fn get_all(&self) -> Vec<TraceEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EventTracer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GrabPhase;

    fn enabled(capacity: usize) -> EventTracer {
        let mut tracer = EventTracer::with_capacity(capacity);
        tracer.set_enabled(true);
        tracer
    }

    #[test]
    fn test_disabled_tracer_records_nothing() {
        let mut tracer = EventTracer::new();
        tracer.trace_x11_event("ConfigureNotify", Some(1), "");
        assert!(tracer.is_empty());
    }

    #[test]
    fn test_trace_x11_event() {
        let mut tracer = enabled(10);
        tracer.trace_x11_event("ConfigureNotify", Some(12345), "300x200+0+0");

        let entries = tracer.get_all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, "ConfigureNotify");
        assert_eq!(entries[0].window, Some(12345));
    }

    #[test]
    fn test_ring_buffer_overflow() {
        let mut tracer = enabled(3);

        tracer.trace_x11_event("event1", None, "");
        tracer.trace_x11_event("event2", None, "");
        tracer.trace_x11_event("event3", None, "");
        tracer.trace_x11_event("event4", None, "");

        let entries = tracer.get_all();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].event_type, "event2");
        assert_eq!(entries[2].event_type, "event4");
        assert_eq!(entries[2].sequence, 4);
    }

    #[test]
    fn test_get_last() {
        let mut tracer = enabled(100);
        for i in 0..10 {
            tracer.trace_x11_event(&format!("event{}", i), None, "");
        }

        let last_3 = tracer.get_last(3);
        assert_eq!(last_3.len(), 3);
        assert_eq!(last_3[0].event_type, "event7");
        assert_eq!(last_3[2].event_type, "event9");
        assert_eq!(tracer.get_last(50).len(), 10);
    }

    #[test]
    fn test_transition_entry() {
        let mut tracer = enabled(10);
        tracer.trace_transition(&StateTransition::GrabChanged {
            from: GrabPhase::Ungrabbed,
            to: GrabPhase::Grabbed,
            window: Some(0x400001),
        });
        let entries = tracer.get_all();
        assert_eq!(entries[0].event_type, "grab_changed");
        assert!(entries[0].details.contains("Grabbed"));
    }
}
