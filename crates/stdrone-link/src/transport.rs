//! Transport abstraction for GATT requests
//!
//! The session never talks to a Bluetooth stack directly. It submits requests
//! through [`Transport`] and the host feeds the completions back through the
//! session's inbound methods. [`RequestQueue`] is the in-memory transport used
//! by the btleplug driver and by tests.

use bitflags::bitflags;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use tracing::trace;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peripheral not connected")]
    NotConnected,

    #[error("Unknown service: {0}")]
    UnknownService(Uuid),

    #[error("Unknown characteristic: {0}")]
    UnknownCharacteristic(Uuid),

    #[error("Operation timed out")]
    Timeout,

    #[error("Bluetooth stack error: {0}")]
    Stack(String),
}

bitflags! {
    /// GATT characteristic properties, same bit layout as the attribute table
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CharProps: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

const PROP_NAMES: [(CharProps, &str); 8] = [
    (CharProps::BROADCAST, "broadcast"),
    (CharProps::READ, "read"),
    (CharProps::WRITE_WITHOUT_RESPONSE, "writeWithoutResponse"),
    (CharProps::WRITE, "write"),
    (CharProps::NOTIFY, "notify"),
    (CharProps::INDICATE, "indicate"),
    (CharProps::AUTHENTICATED_SIGNED_WRITES, "authenticatedSignedWrites"),
    (CharProps::EXTENDED_PROPERTIES, "extendedProperties"),
];

impl CharProps {
    pub fn is_readable(self) -> bool {
        self.contains(CharProps::READ)
    }

    /// Notify or indicate
    pub fn can_subscribe(self) -> bool {
        self.intersects(CharProps::NOTIFY | CharProps::INDICATE)
    }
}

impl fmt::Display for CharProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = PROP_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join("+"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub service: Uuid,
    pub uuid: Uuid,
    pub properties: CharProps,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorHandle {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub uuid: Uuid,
}

/// Outbound side of a peripheral connection
///
/// Every call only submits the request. Completion is reported back through
/// the matching `PeripheralSession::on_*` method.
pub trait Transport {
    fn discover_services(&mut self);
    fn request_characteristics(&mut self, service: &ServiceHandle);
    fn request_descriptors(&mut self, characteristic: &CharacteristicHandle);
    fn read_value(&mut self, characteristic: &CharacteristicHandle);
    fn read_descriptor(&mut self, descriptor: &DescriptorHandle);
    fn set_notify(&mut self, characteristic: &CharacteristicHandle, enabled: bool);
    fn write_value(&mut self, characteristic: &CharacteristicHandle, value: &[u8], needs_ack: bool);
    fn disconnect(&mut self);
}

/// A submitted transport request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    DiscoverServices,
    Characteristics(ServiceHandle),
    Descriptors(CharacteristicHandle),
    ReadValue(CharacteristicHandle),
    ReadDescriptor(DescriptorHandle),
    SetNotify(CharacteristicHandle, bool),
    Write {
        characteristic: CharacteristicHandle,
        value: Vec<u8>,
        needs_ack: bool,
    },
    Disconnect,
}

/// Records requests in submission order
#[derive(Debug, Default)]
pub struct RequestQueue {
    requests: VecDeque<Request>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, request: Request) {
        trace!(request = ?request, "Queued transport request");
        self.requests.push_back(request);
    }

    /// Oldest outstanding request
    pub fn pop(&mut self) -> Option<Request> {
        self.requests.pop_front()
    }

    /// Take every outstanding request
    pub fn drain(&mut self) -> Vec<Request> {
        self.requests.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl Transport for RequestQueue {
    fn discover_services(&mut self) {
        self.push(Request::DiscoverServices);
    }

    fn request_characteristics(&mut self, service: &ServiceHandle) {
        self.push(Request::Characteristics(service.clone()));
    }

    fn request_descriptors(&mut self, characteristic: &CharacteristicHandle) {
        self.push(Request::Descriptors(characteristic.clone()));
    }

    fn read_value(&mut self, characteristic: &CharacteristicHandle) {
        self.push(Request::ReadValue(characteristic.clone()));
    }

    fn read_descriptor(&mut self, descriptor: &DescriptorHandle) {
        self.push(Request::ReadDescriptor(descriptor.clone()));
    }

    fn set_notify(&mut self, characteristic: &CharacteristicHandle, enabled: bool) {
        self.push(Request::SetNotify(characteristic.clone(), enabled));
    }

    fn write_value(&mut self, characteristic: &CharacteristicHandle, value: &[u8], needs_ack: bool) {
        self.push(Request::Write {
            characteristic: characteristic.clone(),
            value: value.to_vec(),
            needs_ack,
        });
    }

    fn disconnect(&mut self) {
        self.push(Request::Disconnect);
    }
}
