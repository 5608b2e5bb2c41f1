use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::{EngineEvent, LogEntry, LogLevel};
use crate::traits::LogSink;

const SUBSCRIBER_BUFFER: usize = 256;

/// Bounded in-memory log store
///
/// Keeps the newest `capacity` entries at or above the configured level and
/// fans each stored entry out to live subscribers.
#[derive(Debug)]
pub struct MemoryLogSink {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    level: AtomicU8,
    next_id: AtomicU64,
    tx: broadcast::Sender<LogEntry>,
}

impl MemoryLogSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            level: AtomicU8::new(level_to_u8(LogLevel::default())),
            next_id: AtomicU64::new(1),
            tx,
        }
    }

    /// Change the minimum stored level
    pub fn set_level(&self, level: LogLevel) {
        self.level.store(level_to_u8(level), Ordering::Relaxed);
    }

    pub fn level(&self) -> LogLevel {
        u8_to_level(self.level.load(Ordering::Relaxed))
    }

    /// Newest-first page of entries
    pub fn entries(&self, limit: usize, offset: usize) -> Vec<LogEntry> {
        let guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        guard.iter().rev().skip(offset).take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Live stream of entries stored from now on
    pub fn subscribe(&self) -> BroadcastStream<LogEntry> {
        BroadcastStream::new(self.tx.subscribe())
    }
}

impl LogSink for MemoryLogSink {
    fn emit(&self, event: EngineEvent) {
        let level = event.level();
        if level > self.level() {
            return;
        }

        let entry = LogEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            level,
            message: event.message(),
            context: serde_json::to_value(&event).ok(),
            timestamp: Utc::now(),
        };

        {
            let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.len() == self.capacity {
                guard.pop_front();
            }
            guard.push_back(entry.clone());
        }

        // No subscribers is fine
        let _ = self.tx.send(entry);
    }
}

fn level_to_u8(level: LogLevel) -> u8 {
    match level {
        LogLevel::Error => 0,
        LogLevel::Warn => 1,
        LogLevel::Info => 2,
        LogLevel::Debug => 3,
    }
}

fn u8_to_level(v: u8) -> LogLevel {
    match v {
        0 => LogLevel::Error,
        1 => LogLevel::Warn,
        2 => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}
