//! STDrone Link - Peripheral session and BLE transport
//!
//! Provides:
//! - `Transport` abstraction and the in-memory `RequestQueue`
//! - `PeripheralSession`, the per-drone protocol state machine
//! - `BtleLink`, which runs a session against a btleplug peripheral

pub mod btle;
pub mod session;
pub mod transport;

pub use btle::{BtleLink, LinkError, SessionCommand, SessionHandle};
pub use session::{
    DisconnectCallback, PeripheralSession, SessionConfig, SessionError, SessionStats,
    UpdateCallback,
};
pub use transport::{
    CharProps, CharacteristicHandle, DescriptorHandle, Request, RequestQueue, ServiceHandle,
    Transport, TransportError,
};
