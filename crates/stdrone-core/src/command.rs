//! Joystick command channel
//!
//! The drone expects the latest 7-byte joystick command to be re-sent on a
//! fixed period while connected. There is no queue and no acknowledgment: the
//! newest command always wins.

use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Joystick command length in bytes
pub const COMMAND_LEN: usize = 7;

/// Default resend period
pub const DEFAULT_COMMAND_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid command size: expected {expected} bytes, got {actual}")]
    InvalidSize { expected: usize, actual: usize },
}

#[derive(Debug, Clone)]
pub struct CommandChannel {
    buffer: [u8; COMMAND_LEN],
    connected: bool,
    interval: Duration,
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_INTERVAL)
    }
}

impl CommandChannel {
    pub fn new(interval: Duration) -> Self {
        Self {
            buffer: [0u8; COMMAND_LEN],
            connected: false,
            interval,
        }
    }

    /// Replace the command wholesale. Rejects anything but exactly `COMMAND_LEN` bytes.
    pub fn set_command(&mut self, command: &[u8]) -> Result<(), CommandError> {
        let buffer: [u8; COMMAND_LEN] =
            command
                .try_into()
                .map_err(|_| CommandError::InvalidSize {
                    expected: COMMAND_LEN,
                    actual: command.len(),
                })?;
        self.buffer = buffer;
        Ok(())
    }

    /// Current command
    pub fn command(&self) -> [u8; COMMAND_LEN] {
        self.buffer
    }

    /// Start ticking with a zeroed command
    pub fn connect(&mut self) {
        self.buffer = [0u8; COMMAND_LEN];
        self.connected = true;
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Command to transmit on this tick, `None` while disconnected
    pub fn tick(&self) -> Option<[u8; COMMAND_LEN]> {
        if !self.connected {
            return None;
        }
        trace!(command = ?self.buffer, "Command tick");
        Some(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_sizes_rejected() {
        let mut channel = CommandChannel::default();
        channel.connect();
        channel.set_command(&[1, 2, 3, 4, 5, 6, 7]).unwrap();

        assert_eq!(
            channel.set_command(&[0; 6]),
            Err(CommandError::InvalidSize { expected: 7, actual: 6 })
        );
        assert_eq!(
            channel.set_command(&[0; 8]),
            Err(CommandError::InvalidSize { expected: 7, actual: 8 })
        );
        assert!(channel.set_command(&[]).is_err());
        assert_eq!(channel.command(), [1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_latest_command_wins() {
        let mut channel = CommandChannel::default();
        channel.connect();
        channel.set_command(&[1; 7]).unwrap();
        channel.set_command(&[2; 7]).unwrap();
        channel.set_command(&[3; 7]).unwrap();
        assert_eq!(channel.tick(), Some([3; 7]));
        assert_eq!(channel.tick(), Some([3; 7]));
    }

    #[test]
    fn test_tick_only_while_connected() {
        let mut channel = CommandChannel::new(Duration::from_millis(50));
        assert_eq!(channel.tick(), None);

        channel.set_command(&[9; 7]).unwrap();
        channel.connect();
        assert_eq!(channel.tick(), Some([0; 7]));

        channel.set_command(&[4; 7]).unwrap();
        channel.disconnect();
        assert_eq!(channel.tick(), None);
        assert_eq!(channel.interval(), Duration::from_millis(50));
    }
}
