//! Frame bookkeeping types: slots, sequence numbers and fence values.

use std::fmt;

/// Number of frames that may be in flight on the GPU at once.
pub const FRAMES_IN_FLIGHT: usize = 3;

/// Index of a per-frame resource partition, in `[0, FRAMES_IN_FLIGHT)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FrameSlot(u32);

impl FrameSlot {
    pub const fn new(index: u32) -> Self {
        debug_assert!((index as usize) < FRAMES_IN_FLIGHT);
        Self(index)
    }

    /// Slot used by frame `sequence` with `frames_in_flight` partitions.
    pub fn for_sequence(sequence: FrameSequenceNumber, frames_in_flight: usize) -> Self {
        Self((sequence.get() % frames_in_flight.max(1) as u64) as u32)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

/// Monotonic frame counter. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FrameSequenceNumber(u64);

impl FrameSequenceNumber {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for FrameSequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Value of a monotonic timeline fence. Zero means "nothing submitted yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    pub const ZERO: FenceValue = FenceValue(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for FenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id of an upload ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TicketId(u64);

impl TicketId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cycle_with_sequence() {
        let mut seq = FrameSequenceNumber::default();
        let mut slots = Vec::new();
        for _ in 0..6 {
            slots.push(FrameSlot::for_sequence(seq, FRAMES_IN_FLIGHT).get());
            seq = seq.next();
        }
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn fence_values_order() {
        assert!(FenceValue::ZERO < FenceValue::new(1));
        assert_eq!(FenceValue::new(4).next(), FenceValue::new(5));
    }
}
