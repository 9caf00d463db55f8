//! Peripheral session - protocol state for one connected drone
//!
//! The session owns everything learned about one peripheral: the discovered
//! attribute table, the telemetry snapshot, the console reassemblers, the
//! discovery tracker and the joystick command channel. It is driven entirely
//! through inbound `on_*` calls and submits its own requests through a
//! [`Transport`], so it holds no locks and never blocks.

use crate::transport::{
    CharacteristicHandle, DescriptorHandle, RequestQueue, ServiceHandle, Transport, TransportError,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use stdrone_core::catalog::{canonical, gatt};
use stdrone_core::{
    classify, decode, describe, describe_value, endpoint, CommandChannel, CommandError,
    CompletionCallback, ConsoleReassembler, DiscoveryProgress, ProgressError, Role, StreamId,
    TelemetrySnapshot, DEFAULT_COMMAND_INTERVAL,
};
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Peripheral not connected")]
    NotConnected,

    #[error("No console input characteristic discovered")]
    NoConsoleInput,

    #[error("Console input is empty")]
    EmptyInput,

    #[error("Console input must be ASCII")]
    NotAscii,
}

/// Callback receiving the full snapshot after every accepted value
pub type UpdateCallback = Box<dyn FnMut(&TelemetrySnapshot) + Send>;

/// Callback fired once when the peripheral goes away
pub type DisconnectCallback = Box<dyn FnOnce() + Send>;

/// Session tunables
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub command_interval: Duration,
    /// Log every transmitted joystick command at info level
    pub verbose_commands: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_interval: DEFAULT_COMMAND_INTERVAL,
            verbose_commands: false,
        }
    }
}

/// Counters for one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub values_decoded: u64,
    pub lines_received: u64,
    pub malformed_payloads: u64,
    pub transport_failures: u64,
    pub commands_sent: u64,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct DescriptorEntry {
    handle: DescriptorHandle,
    value: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct CharacteristicEntry {
    handle: CharacteristicHandle,
    value: Option<Vec<u8>>,
    descriptors: Vec<DescriptorEntry>,
}

#[derive(Debug, Clone)]
struct ServiceEntry {
    handle: ServiceHandle,
    characteristics: Vec<CharacteristicEntry>,
}

pub struct PeripheralSession<T: Transport = RequestQueue> {
    name: String,
    transport: T,
    telemetry: TelemetrySnapshot,
    console: ConsoleReassembler,
    progress: DiscoveryProgress,
    command: CommandChannel,
    services: Vec<ServiceEntry>,
    console_input: Option<CharacteristicHandle>,
    joystick: Option<CharacteristicHandle>,
    update_callback: Option<UpdateCallback>,
    disconnect_callback: Option<DisconnectCallback>,
    subscribed: HashSet<CharacteristicHandle>,
    verbose_commands: bool,
    stats: SessionStats,
}

impl<T: Transport> PeripheralSession<T> {
    pub fn new(name: impl Into<String>, transport: T, config: SessionConfig) -> Self {
        Self {
            name: name.into(),
            transport,
            telemetry: TelemetrySnapshot::new(),
            console: ConsoleReassembler::new(),
            progress: DiscoveryProgress::new(),
            command: CommandChannel::new(config.command_interval),
            services: Vec::new(),
            console_input: None,
            joystick: None,
            update_callback: None,
            disconnect_callback: None,
            subscribed: HashSet::new(),
            verbose_commands: config.verbose_commands,
            stats: SessionStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn telemetry(&self) -> &TelemetrySnapshot {
        &self.telemetry
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn is_connected(&self) -> bool {
        self.command.is_connected()
    }

    pub fn is_discovering(&self) -> bool {
        self.progress.is_in_progress()
    }

    pub fn command_interval(&self) -> Duration {
        self.command.interval()
    }

    // ---- Discovery ----

    /// Start a full attribute discovery round
    ///
    /// `callback` fires exactly once, after every service, characteristic,
    /// descriptor and initial read has completed.
    pub fn discover_all(&mut self, callback: Option<CompletionCallback>) -> Result<(), SessionError> {
        self.progress.begin(callback)?;
        info!(peripheral = %self.name, "Discovering services");
        self.services.clear();
        self.transport.discover_services();
        Ok(())
    }

    pub fn on_services_discovered(&mut self, result: Result<Vec<ServiceHandle>, TransportError>) {
        match result {
            Ok(services) => {
                debug!(count = services.len(), "Services discovered");
                for service in services {
                    self.progress.add_progress();
                    self.transport.request_characteristics(&service);
                    self.service_entry(&service);
                }
            }
            Err(e) => self.transport_failure("service discovery", &e),
        }
        self.progress.dec_progress();
    }

    pub fn on_characteristics_discovered(
        &mut self,
        service: &ServiceHandle,
        result: Result<Vec<CharacteristicHandle>, TransportError>,
    ) {
        match result {
            Ok(characteristics) => {
                debug!(
                    service = %describe(&service.uuid),
                    count = characteristics.len(),
                    "Characteristics discovered"
                );
                for characteristic in characteristics {
                    self.progress.add_progress();
                    self.transport.request_descriptors(&characteristic);
                    if characteristic.properties.is_readable() {
                        self.progress.add_progress();
                        self.transport.read_value(&characteristic);
                    }

                    if Some(characteristic.uuid) == endpoint(Role::ConsoleIn) {
                        self.console_input = Some(characteristic.clone());
                    }
                    if Some(characteristic.uuid) == endpoint(Role::JoystickCommand) {
                        self.joystick = Some(characteristic.clone());
                    }

                    self.service_entry(service)
                        .characteristics
                        .push(CharacteristicEntry {
                            handle: characteristic,
                            value: None,
                            descriptors: Vec::new(),
                        });
                }
            }
            Err(e) => self.transport_failure("characteristic discovery", &e),
        }
        self.progress.dec_progress();
    }

    pub fn on_descriptors_discovered(
        &mut self,
        characteristic: &CharacteristicHandle,
        result: Result<Vec<DescriptorHandle>, TransportError>,
    ) {
        match result {
            Ok(descriptors) => {
                trace!(
                    characteristic = %describe(&characteristic.uuid),
                    count = descriptors.len(),
                    "Descriptors discovered"
                );
                for descriptor in descriptors {
                    self.progress.add_progress();
                    self.transport.read_descriptor(&descriptor);
                    if let Some(entry) = self.characteristic_entry(characteristic) {
                        entry.descriptors.push(DescriptorEntry {
                            handle: descriptor,
                            value: None,
                        });
                    }
                }
            }
            Err(e) => self.transport_failure("descriptor discovery", &e),
        }
        self.progress.dec_progress();
    }

    pub fn on_descriptor_value(
        &mut self,
        descriptor: &DescriptorHandle,
        result: Result<Vec<u8>, TransportError>,
    ) {
        match result {
            Ok(value) => {
                let entry = self
                    .services
                    .iter_mut()
                    .filter(|s| s.handle.uuid == descriptor.service)
                    .flat_map(|s| s.characteristics.iter_mut())
                    .filter(|c| c.handle.uuid == descriptor.characteristic)
                    .flat_map(|c| c.descriptors.iter_mut())
                    .find(|d| d.handle == *descriptor);
                if let Some(entry) = entry {
                    entry.value = Some(value);
                }
            }
            Err(e) => self.transport_failure("descriptor read", &e),
        }
        self.progress.dec_progress();
    }

    // ---- Values ----

    /// Completion of a solicited read
    pub fn on_read_value(
        &mut self,
        characteristic: &CharacteristicHandle,
        result: Result<Vec<u8>, TransportError>,
    ) {
        match result {
            Ok(value) => {
                if let Some(entry) = self.characteristic_entry(characteristic) {
                    entry.value = Some(value.clone());
                }
                self.dispatch(&characteristic.uuid, &value);
            }
            Err(e) => self.transport_failure("value read", &e),
        }
        self.progress.dec_progress();
    }

    /// Unsolicited notification or indication
    pub fn on_characteristic_value(&mut self, uuid: &Uuid, value: &[u8]) {
        let entry = self
            .services
            .iter_mut()
            .flat_map(|s| s.characteristics.iter_mut())
            .find(|c| c.handle.uuid == *uuid);
        if let Some(entry) = entry {
            entry.value = Some(value.to_vec());
        }
        self.dispatch(uuid, value);
    }

    fn dispatch(&mut self, uuid: &Uuid, value: &[u8]) {
        let role = classify(uuid);
        trace!(uuid = %uuid, role = %role, len = value.len(), "Value received");

        let accepted = match role {
            Role::ConsoleOut | Role::ConsoleErr => self.feed_console(role, value),
            role if role.is_telemetry() => match decode(role, value) {
                Ok(Some(update)) => {
                    self.telemetry.apply(update);
                    self.stats.values_decoded += 1;
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    warn!(uuid = %uuid, role = %role, error = %e, "Dropping malformed payload");
                    self.stats.malformed_payloads += 1;
                    false
                }
            },
            _ => false,
        };

        if accepted {
            self.stats.last_update = Some(Utc::now());
            if let Some(callback) = self.update_callback.as_mut() {
                callback(&self.telemetry);
            }
        }
    }

    fn feed_console(&mut self, role: Role, chunk: &[u8]) -> bool {
        let (stream, out) = match role {
            Role::ConsoleErr => (StreamId::Stderr, &mut self.telemetry.stderr_lines),
            _ => (StreamId::Stdout, &mut self.telemetry.stdout_lines),
        };
        match self.console.feed(stream, chunk, out) {
            Ok(lines) => {
                self.stats.lines_received += lines as u64;
                true
            }
            Err(e) => {
                warn!(stream = ?stream, error = %e, "Dropping console chunk");
                self.stats.malformed_payloads += 1;
                false
            }
        }
    }

    pub fn on_write_complete(
        &mut self,
        characteristic: &CharacteristicHandle,
        result: Result<(), TransportError>,
    ) {
        if let Err(e) = result {
            warn!(
                characteristic = %describe(&characteristic.uuid),
                error = %e,
                "Write failed"
            );
            self.stats.transport_failures += 1;
        }
    }

    pub fn on_notify_state(
        &mut self,
        characteristic: &CharacteristicHandle,
        result: Result<bool, TransportError>,
    ) {
        match result {
            Ok(enabled) => debug!(
                characteristic = %describe(&characteristic.uuid),
                enabled,
                "Notification state updated"
            ),
            Err(e) => self.transport_failure("notification state update", &e),
        }
    }

    // ---- Lifecycle ----

    pub fn on_connected(&mut self) {
        info!(peripheral = %self.name, "Connected");
        self.command.connect();
        self.stats.connected_at = Some(Utc::now());
    }

    pub fn on_disconnected(&mut self) {
        info!(peripheral = %self.name, "Disconnected");
        self.command.disconnect();
        self.subscribed.clear();
        if self.progress.cancel() {
            warn!(peripheral = %self.name, "Discovery abandoned by disconnect");
        }
        self.console.reset();
        if let Some(callback) = self.disconnect_callback.take() {
            callback();
        }
    }

    /// Host initiated disconnect
    pub fn disconnect(&mut self) {
        if !self.is_connected() {
            return;
        }
        self.set_notify_all(false);
        self.command.disconnect();
        self.transport.disconnect();
    }

    // ---- Host API ----

    pub fn on_update(&mut self, callback: UpdateCallback) {
        self.update_callback = Some(callback);
        self.set_notify_all(true);
    }

    pub fn on_disconnect(&mut self, callback: DisconnectCallback) {
        self.disconnect_callback = Some(callback);
    }

    /// Toggle notifications on every notify or indicate characteristic
    ///
    /// Only characteristics whose state actually changes get a request, so
    /// enabling again after more of the table is known subscribes the rest.
    pub fn set_notify_all(&mut self, enabled: bool) {
        if !self.is_connected() {
            return;
        }
        let handles = self
            .services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .filter(|c| c.handle.properties.can_subscribe());
        for entry in handles {
            if self.subscribed.contains(&entry.handle) == enabled {
                continue;
            }
            self.transport.set_notify(&entry.handle, enabled);
            if enabled {
                self.subscribed.insert(entry.handle.clone());
            } else {
                self.subscribed.remove(&entry.handle);
            }
        }
    }

    pub fn set_command(&mut self, command: &[u8]) -> Result<(), SessionError> {
        self.command.set_command(command)?;
        Ok(())
    }

    pub fn command(&self) -> [u8; stdrone_core::COMMAND_LEN] {
        self.command.command()
    }

    /// Transmit the current joystick command. Returns true if a write was submitted.
    pub fn tick(&mut self) -> bool {
        let Some(command) = self.command.tick() else {
            return false;
        };
        let Some(joystick) = &self.joystick else {
            return false;
        };
        self.transport.write_value(joystick, &command, false);
        self.stats.commands_sent += 1;
        if self.verbose_commands {
            info!(command = %hex::encode(command), "Joystick command sent");
        }
        true
    }

    /// Send a line of text to the drone console
    pub fn write_stdin(&mut self, text: &str) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        if text.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        if !text.is_ascii() {
            return Err(SessionError::NotAscii);
        }
        let handle = self
            .console_input
            .as_ref()
            .ok_or(SessionError::NoConsoleInput)?;
        debug!(len = text.len(), "Writing console input");
        self.transport.write_value(handle, text.as_bytes(), true);
        Ok(())
    }

    /// Human readable dump of the discovered attribute table
    pub fn service_tree(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for service in &self.services {
            lines.push(format!("service: {}", describe(&service.handle.uuid)));
            for characteristic in &service.characteristics {
                let handle = &characteristic.handle;
                lines.push(format!("  -> characteristic: {}", describe(&handle.uuid)));
                if handle.properties.is_readable() {
                    let value = match &characteristic.value {
                        Some(value) => describe_value(classify(&handle.uuid), value),
                        None => "(N/A)".to_string(),
                    };
                    lines.push(format!("     -> value: {value}"));
                }
                lines.push(format!("     -> property: {}", handle.properties));
                for descriptor in &characteristic.descriptors {
                    lines.push(format!("     -> descriptor: {}", describe(&descriptor.handle.uuid)));
                    let value = match &descriptor.value {
                        Some(value) => describe_descriptor(&descriptor.handle.uuid, value),
                        None => "(N/A)".to_string(),
                    };
                    lines.push(format!("        -> value: {value}"));
                }
            }
        }
        lines
    }

    fn service_entry(&mut self, service: &ServiceHandle) -> &mut ServiceEntry {
        let index = match self.services.iter().position(|s| s.handle == *service) {
            Some(index) => index,
            None => {
                self.services.push(ServiceEntry {
                    handle: service.clone(),
                    characteristics: Vec::new(),
                });
                self.services.len() - 1
            }
        };
        &mut self.services[index]
    }

    fn characteristic_entry(
        &mut self,
        characteristic: &CharacteristicHandle,
    ) -> Option<&mut CharacteristicEntry> {
        self.services
            .iter_mut()
            .filter(|s| s.handle.uuid == characteristic.service)
            .flat_map(|s| s.characteristics.iter_mut())
            .find(|c| c.handle.uuid == characteristic.uuid)
    }

    fn transport_failure(&mut self, operation: &str, error: &TransportError) {
        warn!(peripheral = %self.name, operation, error = %error, "Transport request failed");
        self.stats.transport_failures += 1;
    }
}

fn describe_descriptor(uuid: &Uuid, value: &[u8]) -> String {
    let prefix = format!("{} bytes: {}", value.len(), stdrone_core::codec::to_hex(value));
    if *uuid == gatt::CLIENT_CHARACTERISTIC_CONFIGURATION {
        if let Some(first) = value.first() {
            return format!("{prefix}: {first}");
        }
    }
    if *uuid == gatt::USER_DESCRIPTION && value.is_ascii() {
        return format!("{prefix}: '{}'", String::from_utf8_lossy(value));
    }
    prefix
}

impl<T: Transport> std::fmt::Debug for PeripheralSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralSession")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("progress", &self.progress)
            .field("services", &self.services.len())
            .field("console_input", &self.console_input.as_ref().map(|c| canonical(&c.uuid)))
            .field("joystick", &self.joystick.as_ref().map(|c| canonical(&c.uuid)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{CharProps, Request};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use stdrone_core::catalog::w2st;
    use stdrone_core::Environment;

    fn session() -> PeripheralSession {
        PeripheralSession::new("DRN1110", RequestQueue::new(), SessionConfig::default())
    }

    fn counter() -> (Arc<AtomicUsize>, CompletionCallback) {
        let fired = Arc::new(AtomicUsize::new(0));
        let clone = fired.clone();
        let callback: CompletionCallback = Box::new(move || {
            clone.fetch_add(1, Ordering::SeqCst);
        });
        (fired, callback)
    }

    fn characteristic(service: Uuid, uuid: Uuid, properties: CharProps) -> CharacteristicHandle {
        CharacteristicHandle {
            service,
            uuid,
            properties,
        }
    }

    fn env_bytes() -> Vec<u8> {
        Environment {
            tick: 7,
            pressure: 100_000,
            battery: 900,
            temperature: 215,
            rssi: -70,
        }
        .encode()
        .to_vec()
    }

    #[test]
    fn test_discovery_single_characteristic() {
        let (fired, callback) = counter();
        let mut session = session();
        session.on_connected();
        session.discover_all(Some(callback)).unwrap();
        assert_eq!(session.transport_mut().drain(), vec![Request::DiscoverServices]);

        let s1 = ServiceHandle {
            uuid: w2st::HW_SENSE_SERVICE,
        };
        session.on_services_discovered(Ok(vec![s1.clone()]));
        assert_eq!(
            session.transport_mut().drain(),
            vec![Request::Characteristics(s1.clone())]
        );

        let c_env = characteristic(
            w2st::HW_SENSE_SERVICE,
            w2st::ENV_TTBP,
            CharProps::READ | CharProps::NOTIFY,
        );
        session.on_characteristics_discovered(&s1, Ok(vec![c_env.clone()]));
        assert_eq!(
            session.transport_mut().drain(),
            vec![
                Request::Descriptors(c_env.clone()),
                Request::ReadValue(c_env.clone()),
            ]
        );

        let cccd = DescriptorHandle {
            service: w2st::HW_SENSE_SERVICE,
            characteristic: w2st::ENV_TTBP,
            uuid: gatt::CLIENT_CHARACTERISTIC_CONFIGURATION,
        };
        session.on_descriptors_discovered(&c_env, Ok(vec![cccd.clone()]));
        assert_eq!(
            session.transport_mut().drain(),
            vec![Request::ReadDescriptor(cccd.clone())]
        );

        session.on_read_value(&c_env, Ok(env_bytes()));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(session.is_discovering());

        session.on_descriptor_value(&cccd, Ok(vec![0, 0]));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!session.is_discovering());
        assert_eq!(session.telemetry().environment.pressure, 100_000);

        // notifications after completion do not re-fire discovery
        session.on_characteristic_value(&w2st::ENV_TTBP, &env_bytes());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failures_still_converge() {
        let (fired, callback) = counter();
        let mut session = session();
        session.discover_all(Some(callback)).unwrap();

        let s1 = ServiceHandle {
            uuid: w2st::HW_SENSE_SERVICE,
        };
        let s2 = ServiceHandle {
            uuid: w2st::CONSOLE_SERVICE,
        };
        session.on_services_discovered(Ok(vec![s1.clone(), s2.clone()]));
        session.on_characteristics_discovered(&s1, Err(TransportError::Timeout));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        session.on_characteristics_discovered(&s2, Ok(vec![]));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(session.stats().transport_failures, 1);
    }

    #[test]
    fn test_service_discovery_failure_completes() {
        let (fired, callback) = counter();
        let mut session = session();
        session.discover_all(Some(callback)).unwrap();
        session.on_services_discovered(Err(TransportError::NotConnected));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_discover_while_running_rejected() {
        let mut session = session();
        session.discover_all(None).unwrap();
        assert_eq!(
            session.discover_all(None),
            Err(SessionError::Progress(ProgressError::AlreadyInProgress {
                pending: 1
            }))
        );
    }

    #[test]
    fn test_unknown_uuid_ignored() {
        let updates = Arc::new(AtomicUsize::new(0));
        let clone = updates.clone();
        let mut session = session();
        session.on_update(Box::new(move |_| {
            clone.fetch_add(1, Ordering::SeqCst);
        }));

        let before = session.telemetry().clone();
        session.on_characteristic_value(&Uuid::from_u128(0x1234), &env_bytes());
        session.on_characteristic_value(&w2st::CONFIG, &[1, 2, 3]);
        assert_eq!(*session.telemetry(), before);
        assert_eq!(updates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_payload_counted() {
        let mut session = session();
        session.on_characteristic_value(&w2st::ENV_TTBP, &[1, 2, 3]);
        session.on_characteristic_value(&w2st::STD_ERR, &[0xff]);
        assert_eq!(session.stats().malformed_payloads, 2);
        assert_eq!(*session.telemetry(), TelemetrySnapshot::default());
    }

    #[test]
    fn test_update_callback_receives_snapshot() {
        let seen: Arc<Mutex<Vec<TelemetrySnapshot>>> = Arc::new(Mutex::new(Vec::new()));
        let clone = seen.clone();
        let mut session = session();
        session.on_update(Box::new(move |snapshot| {
            clone.lock().unwrap().push(snapshot.clone());
        }));

        session.on_characteristic_value(&w2st::ENV_TTBP, &env_bytes());
        session.on_characteristic_value(&w2st::STD_INOUT, b"hello\nwor");
        session.on_characteristic_value(&w2st::STD_INOUT, b"ld\n");
        session.on_characteristic_value(&w2st::STD_ERR, b"oops\n");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].environment.battery, 900);
        assert_eq!(seen[3].stdout_lines, vec!["hello", "world"]);
        assert_eq!(seen[3].stderr_lines, vec!["oops"]);
        assert_eq!(session.stats().lines_received, 3);
    }

    #[test]
    fn test_on_update_enables_notifications() {
        let mut session = session();
        session.on_connected();
        let s1 = ServiceHandle {
            uuid: w2st::HW_SENSE_SERVICE,
        };
        let notify = characteristic(w2st::HW_SENSE_SERVICE, w2st::ENV_TTBP, CharProps::NOTIFY);
        let plain = characteristic(w2st::HW_SENSE_SERVICE, w2st::MAX, CharProps::WRITE);
        session.on_characteristics_discovered(&s1, Ok(vec![notify.clone(), plain]));
        session.transport_mut().drain();

        session.on_update(Box::new(|_| {}));
        assert_eq!(
            session.transport_mut().drain(),
            vec![Request::SetNotify(notify.clone(), true)]
        );

        session.disconnect();
        assert_eq!(
            session.transport_mut().drain(),
            vec![Request::SetNotify(notify, false), Request::Disconnect]
        );
        assert!(!session.is_connected());
    }

    #[test]
    fn test_on_update_before_discovery() {
        let mut session = session();
        session.on_connected();
        session.on_update(Box::new(|_| {}));
        assert!(session.transport().is_empty());

        let s1 = ServiceHandle {
            uuid: w2st::HW_SENSE_SERVICE,
        };
        let notify = characteristic(w2st::HW_SENSE_SERVICE, w2st::ENV_TTBP, CharProps::NOTIFY);
        session.on_characteristics_discovered(&s1, Ok(vec![notify.clone()]));
        session.transport_mut().drain();

        session.on_update(Box::new(|_| {}));
        assert_eq!(
            session.transport_mut().drain(),
            vec![Request::SetNotify(notify.clone(), true)]
        );

        // already subscribed
        session.set_notify_all(true);
        assert!(session.transport().is_empty());

        let imu = characteristic(w2st::HW_SENSE_SERVICE, w2st::ACC_GYRO_MAG, CharProps::NOTIFY);
        session.on_characteristics_discovered(&s1, Ok(vec![imu.clone()]));
        session.transport_mut().drain();
        session.set_notify_all(true);
        assert_eq!(
            session.transport_mut().drain(),
            vec![Request::SetNotify(imu, true)]
        );
    }

    #[test]
    fn test_failed_reads_still_converge() {
        let (fired, callback) = counter();
        let mut session = session();
        session.discover_all(Some(callback)).unwrap();

        let s1 = ServiceHandle {
            uuid: w2st::HW_SENSE_SERVICE,
        };
        let c_env = characteristic(w2st::HW_SENSE_SERVICE, w2st::ENV_TTBP, CharProps::READ);
        let cccd = DescriptorHandle {
            service: w2st::HW_SENSE_SERVICE,
            characteristic: w2st::ENV_TTBP,
            uuid: gatt::CLIENT_CHARACTERISTIC_CONFIGURATION,
        };
        session.on_services_discovered(Ok(vec![s1.clone()]));
        session.on_characteristics_discovered(&s1, Ok(vec![c_env.clone()]));
        session.on_descriptors_discovered(&c_env, Ok(vec![cccd.clone()]));

        session.on_read_value(&c_env, Err(TransportError::Timeout));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(session.is_discovering());

        session.on_descriptor_value(&cccd, Err(TransportError::Stack("gatt error".to_string())));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!session.is_discovering());
        assert_eq!(session.stats().transport_failures, 2);
        assert_eq!(*session.telemetry(), TelemetrySnapshot::default());
    }

    #[test]
    fn test_failed_read_value_completes_round() {
        let (fired, callback) = counter();
        let mut session = session();
        session.discover_all(Some(callback)).unwrap();

        let s1 = ServiceHandle {
            uuid: w2st::HW_SENSE_SERVICE,
        };
        let arming = characteristic(w2st::HW_SENSE_SERVICE, w2st::ARMING, CharProps::READ);
        session.on_services_discovered(Ok(vec![s1.clone()]));
        session.on_characteristics_discovered(&s1, Ok(vec![arming.clone()]));
        session.on_descriptors_discovered(&arming, Ok(vec![]));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        session.on_read_value(&arming, Err(TransportError::NotConnected));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_mid_discovery() {
        let (fired, callback) = counter();
        let mut session = session();
        session.on_connected();
        session.discover_all(Some(callback)).unwrap();
        session.transport_mut().drain();

        // host gives up on an incomplete round
        session.disconnect();
        session.on_disconnected();
        assert_eq!(session.transport_mut().drain(), vec![Request::Disconnect]);
        assert!(!session.is_discovering());
        assert!(!session.is_connected());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disconnect_without_notifications() {
        let mut session = session();
        session.on_connected();
        session.disconnect();
        assert_eq!(session.transport_mut().drain(), vec![Request::Disconnect]);
    }

    #[test]
    fn test_set_command_and_tick() {
        let mut session = session();
        let s1 = ServiceHandle {
            uuid: w2st::HW_SENSE_SERVICE,
        };
        let joystick = characteristic(
            w2st::HW_SENSE_SERVICE,
            w2st::MAX,
            CharProps::WRITE_WITHOUT_RESPONSE,
        );
        session.on_characteristics_discovered(&s1, Ok(vec![joystick.clone()]));
        session.transport_mut().drain();

        // not connected yet
        assert!(!session.tick());

        session.on_connected();
        assert!(session.set_command(&[0; 6]).is_err());
        assert!(session.set_command(&[0; 8]).is_err());
        assert_eq!(session.command(), [0; 7]);

        session.set_command(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert!(session.tick());
        assert_eq!(
            session.transport_mut().drain(),
            vec![Request::Write {
                characteristic: joystick,
                value: vec![1, 2, 3, 4, 5, 6, 7],
                needs_ack: false,
            }]
        );
        assert_eq!(session.stats().commands_sent, 1);

        session.on_disconnected();
        assert!(!session.tick());
    }

    #[test]
    fn test_tick_without_joystick() {
        let mut session = session();
        session.on_connected();
        assert!(!session.tick());
        assert!(session.transport().is_empty());
    }

    #[test]
    fn test_disconnect_cancels_discovery() {
        let (fired, callback) = counter();
        let disconnected = Arc::new(AtomicUsize::new(0));
        let clone = disconnected.clone();

        let mut session = session();
        session.on_connected();
        session.on_disconnect(Box::new(move || {
            clone.fetch_add(1, Ordering::SeqCst);
        }));
        session.discover_all(Some(callback)).unwrap();
        session.on_disconnected();
        session.on_services_discovered(Ok(vec![]));

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
        assert!(!session.is_discovering());
    }

    #[test]
    fn test_write_stdin() {
        let mut session = session();
        assert_eq!(session.write_stdin("ls"), Err(SessionError::NotConnected));

        session.on_connected();
        assert_eq!(session.write_stdin("ls"), Err(SessionError::NoConsoleInput));

        let console = ServiceHandle {
            uuid: w2st::CONSOLE_SERVICE,
        };
        let inout = characteristic(
            w2st::CONSOLE_SERVICE,
            w2st::STD_INOUT,
            CharProps::NOTIFY | CharProps::WRITE,
        );
        session.on_characteristics_discovered(&console, Ok(vec![inout.clone()]));
        session.transport_mut().drain();

        assert_eq!(session.write_stdin(""), Err(SessionError::EmptyInput));
        assert_eq!(session.write_stdin("héllo"), Err(SessionError::NotAscii));
        session.write_stdin("arm\n").unwrap();
        assert_eq!(
            session.transport_mut().drain(),
            vec![Request::Write {
                characteristic: inout,
                value: b"arm\n".to_vec(),
                needs_ack: true,
            }]
        );
    }

    #[test]
    fn test_service_tree() {
        let mut session = session();
        let s1 = ServiceHandle {
            uuid: w2st::HW_SENSE_SERVICE,
        };
        let c_env = characteristic(
            w2st::HW_SENSE_SERVICE,
            w2st::ENV_TTBP,
            CharProps::READ | CharProps::NOTIFY,
        );
        let cccd = DescriptorHandle {
            service: w2st::HW_SENSE_SERVICE,
            characteristic: w2st::ENV_TTBP,
            uuid: gatt::CLIENT_CHARACTERISTIC_CONFIGURATION,
        };
        session.on_services_discovered(Ok(vec![s1.clone()]));
        session.on_characteristics_discovered(&s1, Ok(vec![c_env.clone()]));
        session.on_descriptors_discovered(&c_env, Ok(vec![cccd.clone()]));
        session.on_descriptor_value(&cccd, Ok(vec![1, 0]));

        let tree = session.service_tree();
        assert_eq!(tree[0], format!("service: {}", describe(&w2st::HW_SENSE_SERVICE)));
        assert_eq!(
            tree[1],
            "  -> characteristic: W2ST.Env(Temp,Temp,Battery,Pressure)"
        );
        assert_eq!(tree[2], "     -> value: (N/A)");
        assert_eq!(tree[3], "     -> property: read+notify");
        assert_eq!(tree[5], "        -> value: 2 bytes: 01-00: 1");

        session.on_read_value(&c_env, Ok(env_bytes()));
        let tree = session.service_tree();
        assert!(tree[2].starts_with("     -> value: 12 bytes: "));
    }
}
