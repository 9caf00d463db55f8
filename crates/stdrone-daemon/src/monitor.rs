//! Telemetry output for the monitor mode
//!
//! The session hands over its full snapshot on every update. Only what changed
//! since the previous update is forwarded to the printer, so console history is
//! never copied again.

use serde::Serialize;
use stdrone_core::{Arming, Environment, Imu, TelemetrySnapshot};
use tokio::sync::mpsc;
use tracing::warn;

/// Readings and console lines that changed since the previous update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imu: Option<Imu>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arming: Option<Arming>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stdout_lines: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stderr_lines: Vec<String>,
}

impl SnapshotDelta {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Human readable lines
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(environment) = &self.environment {
            lines.push(format!("env    {environment}"));
        }
        if let Some(imu) = &self.imu {
            lines.push(format!("imu    {imu}"));
        }
        if let Some(arming) = &self.arming {
            lines.push(format!("arming {arming}"));
        }
        lines.extend(self.stdout_lines.iter().map(|line| format!("stdout {line}")));
        lines.extend(self.stderr_lines.iter().map(|line| format!("stderr {line}")));
        lines
    }
}

/// Remembers the last forwarded readings and how many console lines were seen
#[derive(Debug, Clone, Default)]
pub struct DeltaTracker {
    environment: Environment,
    imu: Imu,
    arming: Arming,
    stdout_seen: usize,
    stderr_seen: usize,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes since the previous call, `None` when nothing changed
    pub fn diff(&mut self, snapshot: &TelemetrySnapshot) -> Option<SnapshotDelta> {
        let mut delta = SnapshotDelta::default();
        if snapshot.environment != self.environment {
            self.environment = snapshot.environment;
            delta.environment = Some(snapshot.environment);
        }
        if snapshot.imu != self.imu {
            self.imu = snapshot.imu;
            delta.imu = Some(snapshot.imu);
        }
        if snapshot.arming != self.arming {
            self.arming = snapshot.arming;
            delta.arming = Some(snapshot.arming);
        }
        if let Some(new) = snapshot.stdout_lines.get(self.stdout_seen..) {
            delta.stdout_lines = new.to_vec();
        }
        self.stdout_seen = snapshot.stdout_lines.len();
        if let Some(new) = snapshot.stderr_lines.get(self.stderr_seen..) {
            delta.stderr_lines = new.to_vec();
        }
        self.stderr_seen = snapshot.stderr_lines.len();

        (!delta.is_empty()).then_some(delta)
    }
}

/// Print every delta until the session goes away
pub async fn print_updates(mut rx: mpsc::UnboundedReceiver<SnapshotDelta>, json: bool) {
    while let Some(delta) = rx.recv().await {
        if json {
            match serde_json::to_string(&delta) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to serialize update"),
            }
        } else {
            for line in delta.render() {
                println!("{line}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unchanged_snapshot_is_silent() {
        let mut tracker = DeltaTracker::new();
        assert_eq!(tracker.diff(&TelemetrySnapshot::default()), None);
    }

    #[test]
    fn test_only_new_console_lines() {
        let mut tracker = DeltaTracker::new();
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.stdout_lines.push("boot".to_string());
        let first = tracker.diff(&snapshot).unwrap();
        assert_eq!(first.stdout_lines, vec!["boot"]);

        snapshot.stdout_lines.push("ready".to_string());
        snapshot.stderr_lines.push("low battery".to_string());
        let second = tracker.diff(&snapshot).unwrap();
        assert_eq!(second.stdout_lines, vec!["ready"]);
        assert_eq!(second.render(), vec!["stdout ready", "stderr low battery"]);

        assert_eq!(tracker.diff(&snapshot), None);
    }

    #[test]
    fn test_arming_change() {
        let mut tracker = DeltaTracker::new();
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.arming = Arming {
            tick: 3,
            enabled: true,
        };

        let delta = tracker.diff(&snapshot).unwrap();
        assert_eq!(delta.arming, Some(snapshot.arming));
        assert_eq!(delta.environment, None);
        let lines = delta.render();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("arming "));
    }

    #[test]
    fn test_json_skips_unchanged() {
        let delta = SnapshotDelta {
            stderr_lines: vec!["oops".to_string()],
            ..SnapshotDelta::default()
        };
        assert_eq!(
            serde_json::to_string(&delta).unwrap(),
            r#"{"stderr_lines":["oops"]}"#
        );
    }
}
