//! Telemetry decoding for the sensor characteristics
//!
//! Each sensor characteristic carries one fixed little-endian layout, offsets
//! from the start of the payload:
//!
//! | Role | Layout |
//! |---|---|
//! | Environment | tick u16, pressure i32, battery u16, temperature i16, rssi i16 |
//! | IMU | tick u16, accel x/y/z i16, gyro x/y/z i16, mag x/y/z i16 |
//! | Arming | tick u16, enabled u8 |
//!
//! A decode either produces a complete reading or fails; the snapshot is never
//! partially updated.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::catalog::Role;
use crate::codec::{read_i16_le, read_i32_le, read_u16_le, to_hex, CodecError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{role} payload too short: expected {expected} bytes, got {actual}")]
    TooShort {
        role: Role,
        expected: usize,
        actual: usize,
    },
    #[error("Field read failed: {0}")]
    Field(#[from] CodecError),
}

/// Environment sensor reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub tick: u16,
    pub pressure: i32,
    pub battery: u16,
    pub temperature: i16,
    pub rssi: i16,
}

impl Environment {
    pub const WIRE_LEN: usize = 12;

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        require(Role::EnvironmentSensor, buf, Self::WIRE_LEN)?;
        Ok(Self {
            tick: read_u16_le(buf, 0)?,
            pressure: read_i32_le(buf, 2)?,
            battery: read_u16_le(buf, 6)?,
            temperature: read_i16_le(buf, 8)?,
            rssi: read_i16_le(buf, 10)?,
        })
    }

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..2].copy_from_slice(&self.tick.to_le_bytes());
        out[2..6].copy_from_slice(&self.pressure.to_le_bytes());
        out[6..8].copy_from_slice(&self.battery.to_le_bytes());
        out[8..10].copy_from_slice(&self.temperature.to_le_bytes());
        out[10..12].copy_from_slice(&self.rssi.to_le_bytes());
        out
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tick {}, Press {}, Batt {}, Temp {}, RSSI {}",
            self.tick, self.pressure, self.battery, self.temperature, self.rssi
        )
    }
}

/// Three-axis sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl Vector3 {
    fn read(buf: &[u8], offset: usize) -> Result<Self, CodecError> {
        Ok(Self {
            x: read_i16_le(buf, offset)?,
            y: read_i16_le(buf, offset + 2)?,
            z: read_i16_le(buf, offset + 4)?,
        })
    }

    fn write(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.x.to_le_bytes());
        out[2..4].copy_from_slice(&self.y.to_le_bytes());
        out[4..6].copy_from_slice(&self.z.to_le_bytes());
    }
}

/// Accelerometer, gyroscope and magnetometer reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Imu {
    pub tick: u16,
    pub acceleration: Vector3,
    pub gyroscope: Vector3,
    pub magnetometer: Vector3,
}

impl Imu {
    pub const WIRE_LEN: usize = 20;

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        require(Role::ImuSensor, buf, Self::WIRE_LEN)?;
        Ok(Self {
            tick: read_u16_le(buf, 0)?,
            acceleration: Vector3::read(buf, 2)?,
            gyroscope: Vector3::read(buf, 8)?,
            magnetometer: Vector3::read(buf, 14)?,
        })
    }

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..2].copy_from_slice(&self.tick.to_le_bytes());
        self.acceleration.write(&mut out[2..8]);
        self.gyroscope.write(&mut out[8..14]);
        self.magnetometer.write(&mut out[14..20]);
        out
    }
}

impl fmt::Display for Imu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (a, g, m) = (self.acceleration, self.gyroscope, self.magnetometer);
        write!(
            f,
            "Tick {}, Acc.X {}, Acc.Y {}, Acc.Z {}, Gyro.X {}, Gyro.Y {}, Gyro.Z {}, Mag.X {}, Mag.Y {}, Mag.Z {}",
            self.tick, a.x, a.y, a.z, g.x, g.y, g.z, m.x, m.y, m.z
        )
    }
}

/// Motor arming state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arming {
    pub tick: u16,
    pub enabled: bool,
}

impl Arming {
    pub const WIRE_LEN: usize = 3;

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        require(Role::ArmingFlag, buf, Self::WIRE_LEN)?;
        Ok(Self {
            tick: read_u16_le(buf, 0)?,
            enabled: buf[2] != 0,
        })
    }

    pub fn encode(&self) -> [u8; Self::WIRE_LEN] {
        let tick = self.tick.to_le_bytes();
        [tick[0], tick[1], u8::from(self.enabled)]
    }
}

impl fmt::Display for Arming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tick {}, Arming {}", self.tick, u8::from(self.enabled))
    }
}

fn require(role: Role, buf: &[u8], expected: usize) -> Result<(), DecodeError> {
    if buf.len() < expected {
        return Err(DecodeError::TooShort {
            role,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// A fully decoded reading for one telemetry role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryUpdate {
    Environment(Environment),
    Imu(Imu),
    Arming(Arming),
}

/// Decode a payload for a role. Roles without a telemetry layout yield `Ok(None)`.
pub fn decode(role: Role, buf: &[u8]) -> Result<Option<TelemetryUpdate>, DecodeError> {
    let update = match role {
        Role::EnvironmentSensor => TelemetryUpdate::Environment(Environment::decode(buf)?),
        Role::ImuSensor => TelemetryUpdate::Imu(Imu::decode(buf)?),
        Role::ArmingFlag => TelemetryUpdate::Arming(Arming::decode(buf)?),
        _ => return Ok(None),
    };
    Ok(Some(update))
}

/// Latest telemetry received from one peripheral
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub environment: Environment,
    pub imu: Imu,
    pub arming: Arming,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

impl TelemetrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the sub-struct the update targets
    pub fn apply(&mut self, update: TelemetryUpdate) {
        match update {
            TelemetryUpdate::Environment(env) => self.environment = env,
            TelemetryUpdate::Imu(imu) => self.imu = imu,
            TelemetryUpdate::Arming(arming) => self.arming = arming,
        }
    }
}

/// Diagnostic rendering of a raw characteristic value
///
/// Format: `<len> bytes: <hex>[: <decoded>]`. Console payloads are shown as
/// quoted text, malformed sensor payloads are shown as hex only.
pub fn describe_value(role: Role, buf: &[u8]) -> String {
    let prefix = format!("{} bytes: {}", buf.len(), to_hex(buf));
    if role.is_console() {
        let text = if buf.is_ascii() {
            String::from_utf8_lossy(buf).into_owned()
        } else {
            "(invalid)".to_string()
        };
        return format!("{prefix}: '{text}'");
    }
    match decode(role, buf) {
        Ok(Some(TelemetryUpdate::Environment(env))) => format!("{prefix}: {env}"),
        Ok(Some(TelemetryUpdate::Imu(imu))) => format!("{prefix}: {imu}"),
        Ok(Some(TelemetryUpdate::Arming(arming))) => format!("{prefix}: {arming}"),
        Ok(None) | Err(_) => prefix,
    }
}
