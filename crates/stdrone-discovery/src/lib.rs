//! STDrone Discovery - BLE scanning for target drones
//!
//! Scans the first Bluetooth adapter for advertising peripherals whose local
//! name is one of the configured drone names.

pub mod scanner;

pub use scanner::{matches_target, DroneScanner, FoundDrone, ScanError, ScanEvent, ScannerConfig};
