use super::buffer::EventBuffer;
use crate::domain::Event;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_items: usize,
    pub max_bytes: usize,
}

/// One delivery attempt: a contiguous, oldest-first slice of pending events.
///
/// The first `from_store` events are a prefix of the stored queue; the rest
/// were taken out of the in-memory buffer.
#[derive(Debug, Clone)]
pub struct UploadBatch {
    id: Uuid,
    events: Vec<Event>,
    from_store: usize,
    bytes: usize,
}

impl UploadBatch {
    /// Stored events first, then buffered ones. Buffered events are only
    /// considered once every stored event fits, so order holds across sources.
    pub fn assemble(stored: &[Event], buffer: &mut EventBuffer, limits: BatchLimits) -> Self {
        let max_items = limits.max_items.max(1);
        let mut events = Vec::new();
        let mut bytes = 0;

        for event in stored {
            let size = event.serialized_size();
            if events.len() >= max_items || (!events.is_empty() && bytes + size > limits.max_bytes) {
                break;
            }
            bytes += size;
            events.push(event.clone());
        }
        let from_store = events.len();

        if from_store == stored.len() {
            for (event, size) in buffer.take_front(max_items, limits.max_bytes, events.len(), bytes) {
                bytes += size;
                events.push(event);
            }
        }

        Self {
            id: Uuid::new_v4(),
            events,
            from_store,
            bytes,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn from_store(&self) -> usize {
        self.from_store
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Events that were taken out of the in-memory buffer.
    pub fn buffered(&self) -> &[Event] {
        &self.events[self.from_store..]
    }

    pub fn sequence_range(&self) -> Option<(u64, u64)> {
        Some((self.events.first()?.sequence(), self.events.last()?.sequence()))
    }
}
