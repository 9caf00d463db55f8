//! btleplug driver for a peripheral session
//!
//! `BtleLink` owns one connected peripheral and its [`PeripheralSession`]. It
//! executes the session's queued requests against btleplug and feeds every
//! completion back in. After discovery, [`BtleLink::run`] serializes
//! notifications, command ticks and host commands through a single task.

use crate::session::{PeripheralSession, SessionConfig, SessionError};
use crate::transport::{
    CharProps, CharacteristicHandle, DescriptorHandle, Request, RequestQueue, ServiceHandle,
    TransportError,
};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Descriptor, Peripheral as _, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use futures_util::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVER_TIMEOUT: Duration = Duration::from_secs(15);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Bluetooth error: {0}")]
    Btle(#[from] btleplug::Error),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("Discovery did not complete")]
    DiscoveryIncomplete,

    #[error("Session closed")]
    Closed,
}

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::NotConnected => TransportError::NotConnected,
            btleplug::Error::TimedOut(_) => TransportError::Timeout,
            other => TransportError::Stack(other.to_string()),
        }
    }
}

/// Commands accepted by a running link
#[derive(Debug)]
pub enum SessionCommand {
    SetCommand(Vec<u8>, oneshot::Sender<Result<(), SessionError>>),
    WriteStdin(String, oneshot::Sender<Result<(), SessionError>>),
    Disconnect,
}

/// Cloneable handle to a running link
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Replace the joystick command sent on every tick
    pub async fn set_command(&self, command: Vec<u8>) -> Result<(), LinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::SetCommand(command, reply_tx))
            .await
            .map_err(|_| LinkError::Closed)?;
        reply_rx.await.map_err(|_| LinkError::Closed)??;
        Ok(())
    }

    pub async fn write_stdin(&self, text: impl Into<String>) -> Result<(), LinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::WriteStdin(text.into(), reply_tx))
            .await
            .map_err(|_| LinkError::Closed)?;
        reply_rx.await.map_err(|_| LinkError::Closed)??;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.tx
            .send(SessionCommand::Disconnect)
            .await
            .map_err(|_| LinkError::Closed)
    }
}

pub struct BtleLink {
    adapter: Adapter,
    peripheral: Peripheral,
    session: PeripheralSession<RequestQueue>,
    control_rx: mpsc::Receiver<SessionCommand>,
}

impl BtleLink {
    /// Connect to a peripheral and start the session
    pub async fn connect(
        adapter: Adapter,
        peripheral: Peripheral,
        name: impl Into<String>,
        config: SessionConfig,
    ) -> Result<(Self, SessionHandle), LinkError> {
        let name = name.into();
        info!(peripheral = %name, id = %peripheral.id(), "Connecting");

        if !peripheral.is_connected().await? {
            timeout(CONNECT_TIMEOUT, peripheral.connect())
                .await
                .map_err(|_| LinkError::Timeout("connect"))??;
        }

        // BlueZ reports the connection before the remote GATT cache is populated
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        let mut session = PeripheralSession::new(name, RequestQueue::new(), config);
        session.on_connected();

        let (tx, control_rx) = mpsc::channel(32);
        let link = Self {
            adapter,
            peripheral,
            session,
            control_rx,
        };
        Ok((link, SessionHandle { tx }))
    }

    pub fn session(&self) -> &PeripheralSession<RequestQueue> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut PeripheralSession<RequestQueue> {
        &mut self.session
    }

    /// Run a full discovery round to completion
    pub async fn discover(&mut self) -> Result<(), LinkError> {
        let (done_tx, mut done_rx) = oneshot::channel();
        self.session.discover_all(Some(Box::new(move || {
            let _ = done_tx.send(());
        })))?;
        self.process_requests().await;

        // every request completes inline, so an empty queue means the round is over
        done_rx.try_recv().map_err(|_| LinkError::DiscoveryIncomplete)?;
        info!(peripheral = %self.session.name(), "Discovery complete");
        Ok(())
    }

    /// Drive the session until the peripheral disconnects or the host asks to stop
    pub async fn run(mut self) -> Result<(), LinkError> {
        let mut notifications = self.peripheral.notifications().await?;
        let mut events = self.adapter.events().await?;
        let peripheral_id = self.peripheral.id();

        let mut ticker = interval(self.session.command_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.process_requests().await;

        loop {
            tokio::select! {
                notification = notifications.next() => match notification {
                    Some(notification) => {
                        self.session.on_characteristic_value(&notification.uuid, &notification.value);
                    }
                    None => {
                        debug!("Notification stream closed");
                        self.session.on_disconnected();
                        break;
                    }
                },
                event = events.next() => match event {
                    Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                        self.session.on_disconnected();
                        break;
                    }
                    Some(_) => {}
                    None => {
                        warn!("Adapter event stream closed");
                        self.session.on_disconnected();
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.session.tick();
                }
                command = self.control_rx.recv() => match command {
                    Some(SessionCommand::SetCommand(command, reply)) => {
                        let _ = reply.send(self.session.set_command(&command));
                    }
                    Some(SessionCommand::WriteStdin(text, reply)) => {
                        let _ = reply.send(self.session.write_stdin(&text));
                    }
                    Some(SessionCommand::Disconnect) | None => {
                        self.close().await;
                        break;
                    }
                },
            }
            self.process_requests().await;
        }
        Ok(())
    }

    /// Disconnect without running the event loop
    pub async fn shutdown(mut self) {
        self.close().await;
    }

    async fn close(&mut self) {
        self.session.disconnect();
        self.process_requests().await;
        self.session.on_disconnected();
    }

    /// Execute queued requests until the session stops issuing new ones
    async fn process_requests(&mut self) {
        while let Some(request) = self.session.transport_mut().pop() {
            self.execute(request).await;
        }
    }

    async fn execute(&mut self, request: Request) {
        match request {
            Request::DiscoverServices => {
                let result = match timeout(DISCOVER_TIMEOUT, self.peripheral.discover_services()).await {
                    Ok(Ok(())) => Ok(self
                        .peripheral
                        .services()
                        .into_iter()
                        .map(|s| ServiceHandle { uuid: s.uuid })
                        .collect()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(_) => Err(TransportError::Timeout),
                };
                self.session.on_services_discovered(result);
            }
            Request::Characteristics(service) => {
                let result = self
                    .peripheral
                    .services()
                    .into_iter()
                    .find(|s| s.uuid == service.uuid)
                    .map(|s| s.characteristics.iter().map(characteristic_handle).collect())
                    .ok_or(TransportError::UnknownService(service.uuid));
                self.session.on_characteristics_discovered(&service, result);
            }
            Request::Descriptors(characteristic) => {
                let result = self.find_characteristic(&characteristic).map(|c| {
                    c.descriptors
                        .iter()
                        .map(|d| DescriptorHandle {
                            service: d.service_uuid,
                            characteristic: d.characteristic_uuid,
                            uuid: d.uuid,
                        })
                        .collect()
                });
                self.session.on_descriptors_discovered(&characteristic, result);
            }
            Request::ReadValue(characteristic) => {
                let result = match self.find_characteristic(&characteristic) {
                    Ok(c) => with_timeout(self.peripheral.read(&c)).await,
                    Err(e) => Err(e),
                };
                self.session.on_read_value(&characteristic, result);
            }
            Request::ReadDescriptor(descriptor) => {
                let target = Descriptor {
                    uuid: descriptor.uuid,
                    service_uuid: descriptor.service,
                    characteristic_uuid: descriptor.characteristic,
                };
                let result = with_timeout(self.peripheral.read_descriptor(&target)).await;
                self.session.on_descriptor_value(&descriptor, result);
            }
            Request::SetNotify(characteristic, enabled) => {
                let result = match self.find_characteristic(&characteristic) {
                    Ok(c) if enabled => with_timeout(self.peripheral.subscribe(&c)).await,
                    Ok(c) => with_timeout(self.peripheral.unsubscribe(&c)).await,
                    Err(e) => Err(e),
                };
                self.session
                    .on_notify_state(&characteristic, result.map(|()| enabled));
            }
            Request::Write {
                characteristic,
                value,
                needs_ack,
            } => {
                let write_type = if needs_ack {
                    WriteType::WithResponse
                } else {
                    WriteType::WithoutResponse
                };
                let result = match self.find_characteristic(&characteristic) {
                    Ok(c) => with_timeout(self.peripheral.write(&c, &value, write_type)).await,
                    Err(e) => Err(e),
                };
                self.session.on_write_complete(&characteristic, result);
            }
            Request::Disconnect => {
                if let Err(e) = self.peripheral.disconnect().await {
                    warn!(error = %e, "Disconnect failed");
                }
            }
        }
    }

    fn find_characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == handle.uuid && c.service_uuid == handle.service)
            .ok_or(TransportError::UnknownCharacteristic(handle.uuid))
    }
}

fn characteristic_handle(c: &Characteristic) -> CharacteristicHandle {
    CharacteristicHandle {
        service: c.service_uuid,
        uuid: c.uuid,
        properties: CharProps::from_bits_truncate(c.properties.bits()),
    }
}

async fn with_timeout<T>(
    future: impl std::future::Future<Output = btleplug::Result<T>>,
) -> Result<T, TransportError> {
    match timeout(REQUEST_TIMEOUT, future).await {
        Ok(result) => result.map_err(TransportError::from),
        Err(_) => Err(TransportError::Timeout),
    }
}
