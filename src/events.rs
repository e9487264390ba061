// Engine events
//
// The windowing layer translates its own events into these and queues them;
// the loop drains the queue once per iteration before rendering.

use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// New framebuffer size in pixels. Zero in either dimension means minimized.
    Resized { width: u32, height: u32 },
    /// Key name as reported by the window layer, e.g. "Escape" or "F11".
    KeyPressed { key: String },
    CloseRequested,
}

impl EngineEvent {
    pub fn is_minimized_resize(&self) -> bool {
        matches!(self, EngineEvent::Resized { width, height } if *width == 0 || *height == 0)
    }
}

/// What the loop should do after an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResponse {
    Continue,
    Quit,
}

#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<EngineEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: EngineEvent) {
        // Only the latest size matters within one iteration
        if let EngineEvent::Resized { .. } = event {
            self.events.retain(|e| !matches!(e, EngineEvent::Resized { .. }));
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = EngineEvent> + '_ {
        self.events.drain(..)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_order_and_empties() {
        let mut queue = EventQueue::new();
        queue.push(EngineEvent::KeyPressed { key: "F11".into() });
        queue.push(EngineEvent::CloseRequested);

        let events: Vec<_> = queue.drain().collect();
        assert_eq!(
            events,
            vec![EngineEvent::KeyPressed { key: "F11".into() }, EngineEvent::CloseRequested]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn resizes_coalesce_to_latest() {
        let mut queue = EventQueue::new();
        queue.push(EngineEvent::Resized { width: 100, height: 100 });
        queue.push(EngineEvent::KeyPressed { key: "A".into() });
        queue.push(EngineEvent::Resized { width: 640, height: 480 });

        let events: Vec<_> = queue.drain().collect();
        assert_eq!(
            events,
            vec![
                EngineEvent::KeyPressed { key: "A".into() },
                EngineEvent::Resized { width: 640, height: 480 },
            ]
        );
    }

    #[test]
    fn zero_dimension_is_minimized() {
        assert!(EngineEvent::Resized { width: 0, height: 720 }.is_minimized_resize());
        assert!(EngineEvent::Resized { width: 1280, height: 0 }.is_minimized_resize());
        assert!(!EngineEvent::Resized { width: 1, height: 1 }.is_minimized_resize());
        assert!(!EngineEvent::CloseRequested.is_minimized_resize());
    }
}
