use hermes_core::{BookDelta, LevelChange, PendingUpdate, Sequence, Timestamp};
use std::collections::{HashSet, VecDeque};

/// One buffered diff message, in arrival order
#[derive(Debug, Clone, Copy)]
struct Message {
    sequence: Sequence,
    timestamp: Timestamp,
    levels: usize,
}

/// Diffs held back until their sequence gap fills
///
/// Level changes are kept as [`PendingUpdate`]s in arrival order; the
/// message list tracks which sequences arrived (a diff may carry no levels).
/// Buffer limits count distinct sequences, so a redelivered diff does not
/// take a second slot.
#[derive(Debug, Default)]
pub(crate) struct UpdateBuffer {
    updates: Vec<PendingUpdate>,
    messages: VecDeque<Message>,
}

/// Changes of one sequence, ready to apply
pub(crate) struct ReadyUpdate {
    pub sequence: Sequence,
    pub timestamp: Timestamp,
    pub changes: Vec<LevelChange>,
}

impl UpdateBuffer {
    pub fn push(&mut self, delta: BookDelta) {
        self.messages.push_back(Message {
            sequence: delta.sequence,
            timestamp: delta.timestamp,
            levels: delta.changes.len(),
        });
        self.updates.extend(delta.into_pending());
    }

    /// Distinct buffered sequences
    pub fn len(&self) -> usize {
        self.messages
            .iter()
            .map(|m| m.sequence)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.updates.clear();
        self.messages.clear();
    }

    /// Drop the earliest-arrived message
    pub fn drop_oldest(&mut self) -> Option<Sequence> {
        let oldest = self.messages.pop_front()?;
        let mut remaining = oldest.levels;
        self.updates.retain(|u| {
            if remaining > 0 && u.sequence == oldest.sequence {
                remaining -= 1;
                false
            } else {
                true
            }
        });
        Some(oldest.sequence)
    }

    /// Discard everything at or below `sequence`
    pub fn discard_through(&mut self, sequence: Sequence) {
        self.updates.retain(|u| u.sequence > sequence);
        self.messages.retain(|m| m.sequence > sequence);
    }

    /// Remove and return the changes for `current + 1`, if buffered
    ///
    /// With `sorted`, the sequence may be anywhere in the buffer. Without it,
    /// only the earliest-arrived message is eligible, so replay stops at the
    /// first message that is out of order. Changes sharing a sequence come
    /// back in arrival order.
    pub fn take_next(&mut self, current: Sequence, sorted: bool) -> Option<ReadyUpdate> {
        self.discard_through(current);
        let next = current.checked_add(1)?;
        let eligible = if sorted {
            self.messages.iter().any(|m| m.sequence == next)
        } else {
            self.messages.front().is_some_and(|m| m.sequence == next)
        };
        if !eligible {
            return None;
        }

        let mut timestamp = None;
        self.messages.retain(|m| {
            if m.sequence == next {
                timestamp = timestamp.max(Some(m.timestamp));
                false
            } else {
                true
            }
        });
        let mut changes = Vec::new();
        self.updates.retain(|u| {
            if u.sequence == next {
                changes.push(u.change());
                false
            } else {
                true
            }
        });

        timestamp.map(|timestamp| ReadyUpdate {
            sequence: next,
            timestamp,
            changes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hermes_core::{BookKey, Pair};
    use rust_decimal_macros::dec;

    fn delta(sequence: Sequence, price: i64) -> BookDelta {
        let key = BookKey::spot("test", Pair::new("BTC", "USDT"));
        BookDelta::new(key, sequence, Utc::now()).bid(price.into(), dec!(1))
    }

    #[test]
    fn test_take_next_sorted() {
        let mut buffer = UpdateBuffer::default();
        buffer.push(delta(3, 30));
        buffer.push(delta(2, 20));

        let ready = buffer.take_next(1, true).unwrap();
        assert_eq!(ready.sequence, 2);
        assert_eq!(ready.changes[0].level.price, dec!(20));
        assert_eq!(buffer.take_next(2, true).unwrap().sequence, 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_next_unsorted_stops_at_first_gap() {
        let mut buffer = UpdateBuffer::default();
        buffer.push(delta(3, 30));
        buffer.push(delta(2, 20));

        assert!(buffer.take_next(1, false).is_none());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_same_sequence_keeps_arrival_order() {
        let mut buffer = UpdateBuffer::default();
        buffer.push(delta(2, 20));
        buffer.push(delta(2, 21));

        let ready = buffer.take_next(1, true).unwrap();
        let prices: Vec<_> = ready.changes.iter().map(|c| c.level.price).collect();
        assert_eq!(prices, vec![dec!(20), dec!(21)]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_empty_message_counts() {
        let key = BookKey::spot("test", Pair::new("BTC", "USDT"));
        let mut buffer = UpdateBuffer::default();
        buffer.push(BookDelta::new(key, 2, Utc::now()));

        assert_eq!(buffer.len(), 1);
        let ready = buffer.take_next(1, true).unwrap();
        assert!(ready.changes.is_empty());
    }

    #[test]
    fn test_drop_oldest_and_discard() {
        let mut buffer = UpdateBuffer::default();
        buffer.push(delta(5, 50));
        buffer.push(delta(3, 30));
        buffer.push(delta(7, 70));

        assert_eq!(buffer.drop_oldest(), Some(5));
        assert_eq!(buffer.len(), 2);
        buffer.discard_through(3);
        assert_eq!(buffer.len(), 1);
        assert!(buffer.take_next(5, true).is_none());
        assert_eq!(buffer.take_next(6, true).unwrap().sequence, 7);
    }

    #[test]
    fn test_redelivered_sequence_counts_once() {
        let mut buffer = UpdateBuffer::default();
        buffer.push(delta(4, 40));
        buffer.push(delta(4, 40));
        buffer.push(delta(4, 40));
        buffer.push(delta(6, 60));

        assert_eq!(buffer.len(), 2);
        let ready = buffer.take_next(3, true).unwrap();
        assert_eq!(ready.sequence, 4);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_take_next_at_max_sequence() {
        let mut buffer = UpdateBuffer::default();
        buffer.push(delta(u64::MAX, 10));

        assert!(buffer.take_next(u64::MAX, true).is_none());
        assert!(buffer.is_empty());
    }
}
