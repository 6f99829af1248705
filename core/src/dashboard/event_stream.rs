// Monitor events as SSE frames

use crate::monitor::MonitorEvent;
use axum::response::sse::Event;
use tracing::warn;

/// Frame a monitor event as `event: <name>` plus one JSON `data:` line
pub fn to_sse_event(event: &MonitorEvent) -> Event {
    match event.data() {
        Ok(data) => Event::default().event(event.name()).data(data),
        Err(e) => {
            warn!(target: "dashboard", event = event.name(), error = %e, "Failed to encode monitor event");
            Event::default()
                .event("error")
                .data(serde_json::json!({ "message": e.to_string() }).to_string())
        }
    }
}
