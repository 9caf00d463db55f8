//! Characteristic catalog - maps W2ST identifiers to roles and labels
//!
//! The drone exposes a fixed set of vendor services and characteristics in the
//! `xxxxxxxx-xxxx-11E1-xxxx-0002A5D5C51B` namespace. Two independent tables are
//! keyed by the same identifiers:
//! - the role table drives decode dispatch
//! - the label table is only used for diagnostics
//!
//! Both tables are compile-time constants.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Well-known W2ST identifiers
pub mod w2st {
    use uuid::Uuid;

    pub const HW_SENSE_SERVICE: Uuid = Uuid::from_u128(0x00000000_0001_11e1_9ab4_0002a5d5c51b);
    pub const CONSOLE_SERVICE: Uuid = Uuid::from_u128(0x00000000_000e_11e1_9ab4_0002a5d5c51b);
    pub const CONFIG_SERVICE: Uuid = Uuid::from_u128(0x00000000_000f_11e1_9ab4_0002a5d5c51b);

    pub const ENVIRONMENTAL: Uuid = Uuid::from_u128(0x00000000_0001_11e1_ac36_0002a5d5c51b);
    /// Temperature, battery, pressure and RSSI in one payload
    pub const ENV_TTBP: Uuid = Uuid::from_u128(0x001d0000_0001_11e1_ac36_0002a5d5c51b);
    pub const ACC_EVENT: Uuid = Uuid::from_u128(0x00000400_0001_11e1_ac36_0002a5d5c51b);
    /// Joystick command sink
    pub const MAX: Uuid = Uuid::from_u128(0x00008000_0001_11e1_ac36_0002a5d5c51b);
    pub const GG: Uuid = Uuid::from_u128(0x00020000_0001_11e1_ac36_0002a5d5c51b);
    pub const ACC_GYRO_MAG: Uuid = Uuid::from_u128(0x00e00000_0001_11e1_ac36_0002a5d5c51b);
    pub const ARMING: Uuid = Uuid::from_u128(0x20000000_0001_11e1_ac36_0002a5d5c51b);

    /// Console output notifications; writes to the same characteristic are console input
    pub const STD_INOUT: Uuid = Uuid::from_u128(0x00000001_000e_11e1_ac36_0002a5d5c51b);
    pub const STD_ERR: Uuid = Uuid::from_u128(0x00000002_000e_11e1_ac36_0002a5d5c51b);

    pub const CONFIG: Uuid = Uuid::from_u128(0x00000002_000f_11e1_ac36_0002a5d5c51b);
}

/// Standard GATT descriptor identifiers (Bluetooth base UUID)
pub mod gatt {
    use uuid::Uuid;

    const fn short(id: u16) -> Uuid {
        Uuid::from_u128(((id as u128) << 96) | 0x0000_1000_8000_0080_5f9b_34fb)
    }

    pub const EXTENDED_PROPERTIES: Uuid = short(0x2900);
    pub const USER_DESCRIPTION: Uuid = short(0x2901);
    pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = short(0x2902);
    pub const SERVER_CHARACTERISTIC_CONFIGURATION: Uuid = short(0x2903);
    pub const PRESENTATION_FORMAT: Uuid = short(0x2904);
    pub const AGGREGATE_FORMAT: Uuid = short(0x2905);
}

/// Semantic role of a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    EnvironmentSensor,
    ImuSensor,
    ArmingFlag,
    ConsoleIn,
    ConsoleOut,
    ConsoleErr,
    JoystickCommand,
    ConfigValue,
    Unknown,
}

impl Role {
    /// Roles whose payload is a fixed binary telemetry layout
    pub fn is_telemetry(self) -> bool {
        matches!(self, Role::EnvironmentSensor | Role::ImuSensor | Role::ArmingFlag)
    }

    /// Roles whose payload is console text
    pub fn is_console(self) -> bool {
        matches!(self, Role::ConsoleOut | Role::ConsoleErr)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::EnvironmentSensor => "environment",
            Role::ImuSensor => "imu",
            Role::ArmingFlag => "arming",
            Role::ConsoleIn => "stdin",
            Role::ConsoleOut => "stdout",
            Role::ConsoleErr => "stderr",
            Role::JoystickCommand => "joystick",
            Role::ConfigValue => "config",
            Role::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

const ROLES: &[(Uuid, Role)] = &[
    (w2st::ENV_TTBP, Role::EnvironmentSensor),
    (w2st::ACC_GYRO_MAG, Role::ImuSensor),
    (w2st::ARMING, Role::ArmingFlag),
    (w2st::STD_INOUT, Role::ConsoleOut),
    (w2st::STD_ERR, Role::ConsoleErr),
    (w2st::MAX, Role::JoystickCommand),
    (w2st::CONFIG, Role::ConfigValue),
];

/// Write endpoints. Console input shares the stdout characteristic.
const ENDPOINTS: &[(Role, Uuid)] = &[
    (Role::EnvironmentSensor, w2st::ENV_TTBP),
    (Role::ImuSensor, w2st::ACC_GYRO_MAG),
    (Role::ArmingFlag, w2st::ARMING),
    (Role::ConsoleIn, w2st::STD_INOUT),
    (Role::ConsoleOut, w2st::STD_INOUT),
    (Role::ConsoleErr, w2st::STD_ERR),
    (Role::JoystickCommand, w2st::MAX),
    (Role::ConfigValue, w2st::CONFIG),
];

const LABELS: &[(Uuid, &str)] = &[
    (gatt::EXTENDED_PROPERTIES, "ExtendedProperty"),
    (gatt::USER_DESCRIPTION, "UserDescription"),
    (gatt::CLIENT_CHARACTERISTIC_CONFIGURATION, "CCCD"),
    (gatt::SERVER_CHARACTERISTIC_CONFIGURATION, "SCCD"),
    (gatt::PRESENTATION_FORMAT, "CharacteristicFormat"),
    (gatt::AGGREGATE_FORMAT, "CharacteristicAggregateFormat"),
    (w2st::HW_SENSE_SERVICE, "W2ST.HWSenseService"),
    (w2st::CONSOLE_SERVICE, "W2ST.ConsoleService"),
    (w2st::CONFIG_SERVICE, "W2ST.ConfigService"),
    (w2st::ENVIRONMENTAL, "W2ST.Environmental"),
    (w2st::ACC_EVENT, "W2ST.AccEvent"),
    (w2st::MAX, "W2ST.Max"),
    (w2st::ACC_GYRO_MAG, "W2ST.AccGyroMag"),
    (w2st::ARMING, "W2ST.Arming"),
    (w2st::GG, "W2ST.GG"),
    (w2st::STD_INOUT, "W2ST.STDOUT"),
    (w2st::STD_ERR, "W2ST.STDERR"),
    (w2st::CONFIG, "W2ST.Config"),
    (w2st::ENV_TTBP, "W2ST.Env(Temp,Temp,Battery,Pressure)"),
];

/// Classify an identifier. Identifiers outside the catalog are `Role::Unknown`.
pub fn classify(id: &Uuid) -> Role {
    ROLES
        .iter()
        .find(|(uuid, _)| uuid == id)
        .map(|(_, role)| *role)
        .unwrap_or(Role::Unknown)
}

/// Human readable label, falling back to the canonical uppercase identifier
pub fn describe(id: &Uuid) -> String {
    LABELS
        .iter()
        .find(|(uuid, _)| uuid == id)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| canonical(id))
}

/// Characteristic that serves a role, if the catalog has one
pub fn endpoint(role: Role) -> Option<Uuid> {
    ENDPOINTS
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, uuid)| *uuid)
}

/// Canonical uppercase hyphenated form, as printed by the peripheral tooling
pub fn canonical(id: &Uuid) -> String {
    id.hyphenated().to_string().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known() {
        assert_eq!(classify(&w2st::ENV_TTBP), Role::EnvironmentSensor);
        assert_eq!(classify(&w2st::ACC_GYRO_MAG), Role::ImuSensor);
        assert_eq!(classify(&w2st::ARMING), Role::ArmingFlag);
        assert_eq!(classify(&w2st::STD_INOUT), Role::ConsoleOut);
        assert_eq!(classify(&w2st::STD_ERR), Role::ConsoleErr);
        assert_eq!(classify(&w2st::MAX), Role::JoystickCommand);
        assert_eq!(classify(&w2st::CONFIG), Role::ConfigValue);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify(&w2st::HW_SENSE_SERVICE), Role::Unknown);
        assert_eq!(classify(&w2st::GG), Role::Unknown);
        assert_eq!(classify(&Uuid::nil()), Role::Unknown);
    }

    #[test]
    fn test_uuid_strings() {
        assert_eq!(
            canonical(&w2st::ENV_TTBP),
            "001D0000-0001-11E1-AC36-0002A5D5C51B"
        );
        assert_eq!(
            canonical(&gatt::CLIENT_CHARACTERISTIC_CONFIGURATION),
            "00002902-0000-1000-8000-00805F9B34FB"
        );
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(&w2st::STD_ERR), "W2ST.STDERR");
        assert_eq!(describe(&gatt::CLIENT_CHARACTERISTIC_CONFIGURATION), "CCCD");

        let unknown = Uuid::from_u128(0x12345678_9abc_def0_1234_56789abcdef0);
        assert_eq!(describe(&unknown), "12345678-9ABC-DEF0-1234-56789ABCDEF0");
    }

    #[test]
    fn test_every_role_has_a_label() {
        for (uuid, _) in ROLES {
            assert_ne!(describe(uuid), canonical(uuid), "missing label for {uuid}");
        }
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(endpoint(Role::ConsoleIn), Some(w2st::STD_INOUT));
        assert_eq!(endpoint(Role::JoystickCommand), Some(w2st::MAX));
        assert_eq!(endpoint(Role::Unknown), None);
        for (uuid, role) in ROLES {
            assert_eq!(endpoint(*role), Some(*uuid));
        }
    }
}
