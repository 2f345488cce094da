//! Change event to broadcast payload mapping.

use rfrelay_proto::{fields, BroadcastEvent, ChangeEvent};

/// Map a change event to the `newReading` payload.
///
/// Returns `None` when the event carries no document. Otherwise copies the
/// four reading fields verbatim; missing fields stay missing and every other
/// document field is dropped.
pub fn normalize(event: &ChangeEvent) -> Option<BroadcastEvent> {
    let document = event.document.as_ref()?;

    Some(BroadcastEvent {
        frequency: document.get(fields::FREQUENCY).cloned(),
        signal_strength: document.get(fields::SIGNAL_STRENGTH).cloned(),
        classification: document.get(fields::CLASSIFICATION).cloned(),
        timestamp: document.get(fields::TIMESTAMP).cloned(),
    })
}
