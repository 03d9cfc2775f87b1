//! Priority batching and in-flight deduplication.
//!
//! [`BatchAssembler`] is a pure state machine: it never touches the socket
//! or spawns timers. The engine feeds it requests, asks it what to do next
//! ([`FlushDecision`]), and pulls flushed groups out with
//! [`BatchAssembler::take_batch`].

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use nl_protocol::JsonRpcRequest;
use tokio::time::Instant;

/// How long a flush waits when `max_concurrent_batches` are outstanding.
pub const BATCH_DEFER_DELAY: Duration = Duration::from_millis(10);

/// Caller-assigned ordering within a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Flushes immediately and goes first.
    High,
    #[default]
    Normal,
    Low,
}

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub request: JsonRpcRequest,
    pub priority: Priority,
    pub enqueued_at: Instant,
}

impl BatchItem {
    pub fn new(request: JsonRpcRequest, priority: Priority) -> Self {
        Self {
            request,
            priority,
            enqueued_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.request.id
    }
}

/// What the engine should do after an enqueue or a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    /// Flush now.
    Now,
    /// Start the partial-batch timer; pass `generation` back to
    /// [`BatchAssembler::timer_fired`] when it elapses.
    ArmTimer { generation: u64, delay: Duration },
    /// Nothing queued, or a timer is already running.
    Wait,
}

#[derive(Debug)]
pub enum TakeBatch {
    Empty,
    /// Items are queued but the in-flight cap is reached.
    Saturated,
    Batch { batch_id: u64, items: Vec<BatchItem> },
}

pub struct BatchAssembler {
    high: VecDeque<BatchItem>,
    normal: VecDeque<BatchItem>,
    low: VecDeque<BatchItem>,
    batch_size: usize,
    batch_timeout: Duration,
    max_concurrent: usize,
    /// batch id -> calls still unanswered
    in_flight: HashMap<u64, usize>,
    next_batch_id: u64,
    timer_armed: bool,
    timer_generation: u64,
    deferred: bool,
}

impl BatchAssembler {
    pub fn new(batch_size: usize, batch_timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            low: VecDeque::new(),
            batch_size: batch_size.max(1),
            batch_timeout,
            max_concurrent: max_concurrent.max(1),
            in_flight: HashMap::new(),
            next_batch_id: 1,
            timer_armed: false,
            timer_generation: 0,
            deferred: false,
        }
    }

    pub fn enqueue(&mut self, item: BatchItem) -> FlushDecision {
        match item.priority {
            Priority::High => self.high.push_back(item),
            Priority::Normal => self.normal.push_back(item),
            Priority::Low => self.low.push_back(item),
        }
        self.check_flush_conditions()
    }

    /// Full batch or any high-priority item: flush now. Otherwise start the
    /// partial-batch timer if one is not already running.
    pub fn check_flush_conditions(&mut self) -> FlushDecision {
        let queued = self.queued_len();
        if queued == 0 {
            return FlushDecision::Wait;
        }
        if queued >= self.batch_size || !self.high.is_empty() {
            return FlushDecision::Now;
        }
        if self.timer_armed {
            return FlushDecision::Wait;
        }
        self.timer_armed = true;
        self.timer_generation += 1;
        FlushDecision::ArmTimer {
            generation: self.timer_generation,
            delay: self.batch_timeout,
        }
    }

    /// Returns `true` if the timer of this generation is still current, in
    /// which case the caller should flush.
    pub fn timer_fired(&mut self, generation: u64) -> bool {
        if self.timer_armed && generation == self.timer_generation {
            self.timer_armed = false;
            true
        } else {
            false
        }
    }

    /// Record that a deferred flush is scheduled. Returns `false` when one
    /// already is.
    pub fn mark_deferred(&mut self) -> bool {
        !std::mem::replace(&mut self.deferred, true)
    }

    pub fn deferral_fired(&mut self) {
        self.deferred = false;
    }

    /// Pull up to `batch_size` items: all high, then normal, then low.
    pub fn take_batch(&mut self) -> TakeBatch {
        if self.queued_len() == 0 {
            return TakeBatch::Empty;
        }
        if self.in_flight.len() >= self.max_concurrent {
            return TakeBatch::Saturated;
        }

        let mut items = Vec::with_capacity(self.batch_size.min(self.queued_len()));
        for queue in [&mut self.high, &mut self.normal, &mut self.low] {
            while items.len() < self.batch_size {
                match queue.pop_front() {
                    Some(item) => items.push(item),
                    None => break,
                }
            }
        }

        // Any running timer belongs to items that just left.
        self.timer_armed = false;
        self.timer_generation += 1;

        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        self.in_flight.insert(batch_id, items.len());
        TakeBatch::Batch { batch_id, items }
    }

    /// One call of `batch_id` settled. Returns `true` when that freed the
    /// batch's concurrency slot.
    pub fn complete_one(&mut self, batch_id: u64) -> bool {
        let Some(remaining) = self.in_flight.get_mut(&batch_id) else {
            return false;
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.in_flight.remove(&batch_id);
            true
        } else {
            false
        }
    }

    /// Remove a still-queued item (its call timed out before flushing).
    pub fn remove_queued(&mut self, id: &str) -> Option<BatchItem> {
        for queue in [&mut self.high, &mut self.normal, &mut self.low] {
            if let Some(pos) = queue.iter().position(|item| item.id() == id) {
                return queue.remove(pos);
            }
        }
        None
    }

    /// Drain every queued item, in priority order, and stop the timer.
    pub fn clear(&mut self) -> Vec<BatchItem> {
        self.timer_armed = false;
        self.timer_generation += 1;
        let mut drained: Vec<BatchItem> = self.high.drain(..).collect();
        drained.extend(self.normal.drain(..));
        drained.extend(self.low.drain(..));
        drained
    }

    /// Forget every outstanding batch; their calls were settled elsewhere.
    pub fn abandon_in_flight(&mut self) {
        self.in_flight.clear();
    }

    pub fn queued_len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

/// Maps a (method, params) key to the id of the call already carrying it.
#[derive(Debug, Default)]
pub struct DedupTable {
    leaders: HashMap<String, String>,
}

impl DedupTable {
    pub fn leader(&self, key: &str) -> Option<&str> {
        self.leaders.get(key).map(String::as_str)
    }

    pub fn track(&mut self, key: String, id: String) {
        self.leaders.insert(key, id);
    }

    /// Forget `key` if `id` still leads it.
    pub fn release(&mut self, key: &str, id: &str) {
        if self.leaders.get(key).is_some_and(|leader| leader == id) {
            self.leaders.remove(key);
        }
    }

    pub fn clear(&mut self) {
        self.leaders.clear();
    }

    pub fn len(&self) -> usize {
        self.leaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaders.is_empty()
    }
}
