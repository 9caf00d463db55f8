//! STDrone Core - Characteristic catalog, telemetry decoding, and session state
//!
//! This crate holds the transport-independent part of the STDrone BLE adapter:
//! - Catalog of W2ST service/characteristic identifiers and their roles
//! - Little-endian field codec and the sensor telemetry layouts
//! - Console line reassembly for the stdout/stderr characteristics
//! - Discovery progress tracking and the periodic joystick command buffer

pub mod catalog;
pub mod codec;
pub mod command;
pub mod console;
pub mod progress;
pub mod telemetry;

pub use catalog::{classify, describe, endpoint, Role};
pub use command::{CommandChannel, CommandError, COMMAND_LEN, DEFAULT_COMMAND_INTERVAL};
pub use console::{ConsoleError, ConsoleReassembler, ReassemblyState, StreamId};
pub use progress::{CompletionCallback, DiscoveryProgress, ProgressError};
pub use telemetry::{
    decode, describe_value, Arming, DecodeError, Environment, Imu, TelemetrySnapshot,
    TelemetryUpdate, Vector3,
};

use thiserror::Error;

/// Any failure raised by the core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] codec::CodecError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Console(#[from] ConsoleError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Command(#[from] CommandError),
}
