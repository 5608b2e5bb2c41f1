// # Log Sink Trait
//
// Receiver of structured engine events (update outcomes, scheduler
// transitions, configuration changes). The in-process implementation is
// `MemoryLogSink`; embedders can forward events elsewhere.

use crate::logs::EngineEvent;

/// Trait for log sinks
///
/// `emit` is called inline from the engine and must not block.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Sink that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn emit(&self, _event: EngineEvent) {}
}
