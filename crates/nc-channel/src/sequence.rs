//! Inbound sequence tracking
//!
//! The first frame of a session is accepted whatever its number; every
//! later frame must carry exactly the previous number plus one.

use crate::error::ChannelError;

/// Tracks the last accepted inbound sequence number
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequencer {
    last: Option<i32>,
}

impl Sequencer {
    /// Create a sequencer that has not seen any frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `sequence` if it continues the stream
    pub fn accept(&mut self, sequence: i32) -> Result<(), ChannelError> {
        if let Some(last) = self.last {
            let expected = last.wrapping_add(1);
            if sequence != expected {
                return Err(ChannelError::Sequence {
                    expected,
                    actual: sequence,
                });
            }
        }
        self.last = Some(sequence);
        Ok(())
    }

    /// Last accepted sequence number, if any
    pub fn last(&self) -> Option<i32> {
        self.last
    }

    /// Forget every accepted frame
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_accepted_unconditionally() {
        let mut sequencer = Sequencer::new();
        sequencer.accept(41).unwrap();
        assert_eq!(sequencer.last(), Some(41));
        sequencer.accept(42).unwrap();
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut sequencer = Sequencer::new();
        sequencer.accept(0).unwrap();
        sequencer.accept(1).unwrap();
        assert!(matches!(
            sequencer.accept(1),
            Err(ChannelError::Sequence {
                expected: 2,
                actual: 1
            })
        ));
        // A rejected frame does not advance the stream
        assert_eq!(sequencer.last(), Some(1));
    }

    #[test]
    fn test_gap_rejected() {
        let mut sequencer = Sequencer::new();
        sequencer.accept(0).unwrap();
        assert!(sequencer.accept(2).is_err());
    }

    #[test]
    fn test_wraps_at_i32_max() {
        let mut sequencer = Sequencer::new();
        sequencer.accept(i32::MAX).unwrap();
        sequencer.accept(i32::MIN).unwrap();
    }

    #[test]
    fn test_reset() {
        let mut sequencer = Sequencer::new();
        sequencer.accept(5).unwrap();
        sequencer.reset();
        assert_eq!(sequencer.last(), None);
        sequencer.accept(0).unwrap();
    }
}
