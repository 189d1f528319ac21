//! Native call audit trail.
//!
//! Every native a script calls is appended to a ring of fixed size with the
//! calling script's alias, the qualified native name and the outcome, so a
//! misbehaving script can be attributed after the fact. Sequence numbers
//! keep increasing across evictions.

use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

const MAX_MESSAGE_LEN: usize = 256;

/// How a native call ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuditOutcome {
    Ok,
    /// Script-visible error, message clipped to a bounded length.
    Error(String),
    /// Native panic converted at the boundary.
    Fault,
}

impl AuditOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub seq: u64,
    /// Time since the trail was created.
    pub elapsed: Duration,
    /// Alias of the calling script; `?` when the caller did not resolve.
    pub script: String,
    /// Qualified native name such as `core.simple_query`.
    pub function: String,
    pub outcome: AuditOutcome,
}

struct Ring {
    next_seq: u64,
    entries: VecDeque<AuditEntry>,
}

pub struct AuditTrail {
    ring: Mutex<Ring>,
    capacity: usize,
    started: Instant,
}

impl AuditTrail {
    /// Trail holding at most `capacity` entries; zero disables recording.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                next_seq: 0,
                entries: VecDeque::new(),
            }),
            capacity,
            started: Instant::now(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, script: &str, function: &str, outcome: AuditOutcome) {
        if self.capacity == 0 {
            return;
        }
        let outcome = match outcome {
            AuditOutcome::Error(message) => AuditOutcome::Error(clip(message, MAX_MESSAGE_LEN)),
            other => other,
        };
        let elapsed = self.started.elapsed();

        let mut ring = self.ring.lock();
        let seq = ring.next_seq;
        ring.next_seq += 1;
        while ring.entries.len() >= self.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(AuditEntry {
            seq,
            elapsed,
            script: script.to_owned(),
            function: function.to_owned(),
            outcome,
        });
    }

    /// Up to `limit` most recent entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let ring = self.ring.lock();
        let start = ring.entries.len().saturating_sub(limit);
        ring.entries.range(start..).cloned().collect()
    }

    /// Entries attributed to `script`, oldest first.
    pub fn for_script(&self, script: &str) -> Vec<AuditEntry> {
        self.ring
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.script == script)
            .cloned()
            .collect()
    }

    pub fn count_for_script(&self, script: &str) -> usize {
        self.ring
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.script == script)
            .count()
    }

    /// Calls that raised or faulted.
    pub fn failure_count(&self) -> usize {
        self.ring
            .lock()
            .entries
            .iter()
            .filter(|entry| !entry.outcome.is_ok())
            .count()
    }

    /// Fault count per native, for natives that faulted at least once.
    pub fn faults_by_function(&self) -> BTreeMap<String, usize> {
        let mut faults = BTreeMap::new();
        for entry in &self.ring.lock().entries {
            if entry.outcome == AuditOutcome::Fault {
                *faults.entry(entry.function.clone()).or_insert(0) += 1;
            }
        }
        faults
    }

    /// Calls recorded since creation, including evicted ones.
    pub fn total_recorded(&self) -> u64 {
        self.ring.lock().next_seq
    }

    pub fn len(&self) -> usize {
        self.ring.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn clip(mut message: String, max_len: usize) -> String {
    if message.len() > max_len {
        let mut cut = max_len;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
        message.push_str("...");
    }
    message
}
