// =============================================================================
// Ring Event Buffer — O(1) append, O(log n) time-range query
// =============================================================================
//
// A fixed-capacity circular store plus a time-sorted secondary index of
// (timestamp, slot) pairs. Appends are O(1) amortised (the index insert is
// a push for in-order timestamps, a binary-search splice otherwise); range
// queries binary-search the index for the start time and scan forward.
//
// On wrap the oldest slot is overwritten and its index entry removed —
// oldest-wins eviction, no backpressure to producers.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Kinds of arena events the buffer records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Trade,
    Leaderboard,
    Tournament,
    Evolution,
}

/// One recorded event. `payload` keeps the original document for replay.
#[derive(Debug, Clone, Serialize)]
pub struct BufferedEvent {
    /// Unix milliseconds.
    pub timestamp: i64,
    pub event_type: EventType,
    /// Which arena channel delivered it.
    pub channel: String,
    pub bot_id: Option<String>,
    pub symbol: Option<String>,
    pub payload: serde_json::Value,
}

/// Filters for [`RingEventBuffer::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub start_time: i64,
    pub end_time: i64,
    pub channel: Option<String>,
    pub event_type: Option<EventType>,
    pub bot_id: Option<String>,
    pub symbol: Option<String>,
    pub limit: Option<usize>,
}

pub struct RingEventBuffer {
    capacity: usize,
    slots: Vec<Option<BufferedEvent>>,
    /// Next slot to write (wraps).
    head: usize,
    len: usize,
    /// (timestamp, slot), sorted by timestamp then insertion order.
    index: Vec<(i64, usize)>,
}

impl RingEventBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer needs a non-zero capacity");
        Self {
            capacity,
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            index: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one event, evicting the oldest slot when full.
    pub fn append(&mut self, event: BufferedEvent) {
        let slot = self.head;

        // Evict the slot's previous occupant from the index.
        if self.slots[slot].is_some() {
            if let Some(pos) = self.index.iter().position(|(_, s)| *s == slot) {
                self.index.remove(pos);
            }
        } else {
            self.len += 1;
        }

        // Sorted insert; equal timestamps keep append order because we
        // splice after the run of equals.
        let ts = event.timestamp;
        let pos = self.index.partition_point(|(t, _)| *t <= ts);
        if pos == self.index.len() {
            self.index.push((ts, slot));
        } else {
            self.index.insert(pos, (ts, slot));
        }

        self.slots[slot] = Some(event);
        self.head = (self.head + 1) % self.capacity;
    }

    /// Events with timestamp in `[start_time, end_time]`, matching every
    /// set filter, in append order for equal timestamps, up to `limit`.
    pub fn query(&self, q: &EventQuery) -> Vec<&BufferedEvent> {
        let limit = q.limit.unwrap_or(usize::MAX);
        let start = self.index.partition_point(|(t, _)| *t < q.start_time);

        let mut out = Vec::new();
        for &(ts, slot) in &self.index[start..] {
            if ts > q.end_time || out.len() >= limit {
                break;
            }
            let event = match &self.slots[slot] {
                Some(e) => e,
                None => continue,
            };

            if let Some(channel) = &q.channel {
                if &event.channel != channel {
                    continue;
                }
            }
            if let Some(event_type) = q.event_type {
                if event.event_type != event_type {
                    continue;
                }
            }
            if let Some(bot_id) = &q.bot_id {
                if event.bot_id.as_ref() != Some(bot_id) {
                    continue;
                }
            }
            if let Some(symbol) = &q.symbol {
                if event.symbol.as_ref() != Some(symbol) {
                    continue;
                }
            }
            out.push(event);
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================
