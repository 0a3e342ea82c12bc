use crate::domain::Event;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
struct Buffered {
    event: Event,
    size: usize,
}

/// Insertion-ordered in-memory buffer bounded by serialized bytes and, optionally, item count.
///
/// Overflow evicts from the front: the least recently added events go first.
#[derive(Debug)]
pub struct EventBuffer {
    events: VecDeque<Buffered>,
    bytes: usize,
    byte_ceiling: usize,
    max_items: Option<usize>,
}

impl EventBuffer {
    pub fn new(byte_ceiling: usize, max_items: Option<usize>) -> Self {
        Self {
            events: VecDeque::new(),
            bytes: 0,
            byte_ceiling,
            max_items,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Append one event and return whatever had to be evicted to fit it.
    pub fn push(&mut self, event: Event) -> Vec<Event> {
        let size = event.serialized_size();
        self.bytes += size;
        self.events.push_back(Buffered { event, size });
        self.evict_overflow()
    }

    /// Put events back at the front, oldest first. They are the first evicted if over the ceiling.
    pub fn restore_front(&mut self, events: Vec<Event>) -> Vec<Event> {
        for event in events.into_iter().rev() {
            let size = event.serialized_size();
            self.bytes += size;
            self.events.push_front(Buffered { event, size });
        }
        self.evict_overflow()
    }

    /// Pop events from the front while they fit in `max_items` and `max_bytes`.
    ///
    /// `taken_items` and `taken_bytes` describe what the batch already holds. An
    /// empty batch always accepts its first event, however large, so one
    /// oversized event can never stall the queue.
    pub fn take_front(
        &mut self,
        max_items: usize,
        max_bytes: usize,
        taken_items: usize,
        taken_bytes: usize,
    ) -> Vec<(Event, usize)> {
        let mut items = taken_items;
        let mut bytes = taken_bytes;
        let mut taken = Vec::new();

        while let Some(front) = self.events.front() {
            if items >= max_items || (items > 0 && bytes + front.size > max_bytes) {
                break;
            }
            let Some(buffered) = self.events.pop_front() else {
                break;
            };
            items += 1;
            bytes += buffered.size;
            self.bytes -= buffered.size;
            taken.push((buffered.event, buffered.size));
        }

        taken
    }

    pub fn drain_all(&mut self) -> Vec<Event> {
        self.bytes = 0;
        self.events.drain(..).map(|b| b.event).collect()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.events.iter().map(|b| b.event.sequence()).collect()
    }

    fn over_ceiling(&self) -> bool {
        self.bytes > self.byte_ceiling || self.max_items.is_some_and(|max| self.events.len() > max)
    }

    fn evict_overflow(&mut self) -> Vec<Event> {
        let mut evicted = Vec::new();
        while self.over_ceiling() {
            let Some(oldest) = self.events.pop_front() else {
                break;
            };
            self.bytes -= oldest.size;
            evicted.push(oldest.event);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn event(sequence: u64) -> Event {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Event::with_timestamp("tap", json!({"i": sequence}), ts, sequence)
    }

    #[test]
    fn test_push_under_ceiling_keeps_everything() {
        let mut buffer = EventBuffer::new(10_000, None);
        for i in 0..5 {
            assert!(buffer.push(event(i)).is_empty());
        }
        assert_eq!(buffer.sequences(), vec![0, 1, 2, 3, 4]);
        assert_eq!(
            buffer.bytes(),
            (0..5).map(|i| event(i).serialized_size()).sum::<usize>()
        );
    }

    #[test]
    fn test_byte_ceiling_evicts_oldest() {
        let size = event(0).serialized_size();
        let mut buffer = EventBuffer::new(size * 3, None);

        let mut evicted = Vec::new();
        for i in 0..5 {
            evicted.extend(buffer.push(event(i)));
        }

        let evicted: Vec<u64> = evicted.iter().map(Event::sequence).collect();
        assert_eq!(evicted, vec![0, 1]);
        assert_eq!(buffer.sequences(), vec![2, 3, 4]);
        assert!(buffer.bytes() <= size * 3);
    }

    #[test]
    fn test_item_ceiling_evicts_oldest() {
        let mut buffer = EventBuffer::new(usize::MAX, Some(2));
        buffer.push(event(0));
        buffer.push(event(1));
        let evicted = buffer.push(event(2));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].sequence(), 0);
        assert_eq!(buffer.sequences(), vec![1, 2]);
    }

    #[test]
    fn test_take_front_respects_limits() {
        let size = event(0).serialized_size();
        let mut buffer = EventBuffer::new(usize::MAX, None);
        for i in 0..5 {
            buffer.push(event(i));
        }

        let taken = buffer.take_front(10, size * 2, 0, 0);
        assert_eq!(taken.iter().map(|(e, _)| e.sequence()).collect::<Vec<_>>(), vec![0, 1]);

        let taken = buffer.take_front(1, usize::MAX, 0, 0);
        assert_eq!(taken.len(), 1);
        assert_eq!(buffer.sequences(), vec![3, 4]);

        // Batch already full from another source
        assert!(buffer.take_front(5, usize::MAX, 5, 0).is_empty());
    }

    #[test]
    fn test_take_front_accepts_one_oversized_event() {
        let mut buffer = EventBuffer::new(usize::MAX, None);
        buffer.push(event(0));
        buffer.push(event(1));

        let taken = buffer.take_front(10, 1, 0, 0);
        assert_eq!(taken.len(), 1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_restore_front_preserves_order_and_evicts_restored_first() {
        let size = event(0).serialized_size();
        let mut buffer = EventBuffer::new(size * 3, None);
        buffer.push(event(3));
        buffer.push(event(4));

        let evicted = buffer.restore_front(vec![event(1), event(2)]);
        assert_eq!(evicted.iter().map(Event::sequence).collect::<Vec<_>>(), vec![1]);
        assert_eq!(buffer.sequences(), vec![2, 3, 4]);

        let drained = buffer.drain_all();
        assert_eq!(drained.len(), 3);
        assert_eq!(buffer.bytes(), 0);
    }
}
