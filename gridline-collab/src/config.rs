//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use gridline_core::{ColumnDefaults, RowHeight};

/// Engine configuration.
///
/// Override individual settings with struct-update syntax:
/// `EngineConfig { include_append_row: false, ..Default::default() }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a snapshot request stays in flight before another one may
    /// be sent for the same view.
    #[serde(with = "millis")]
    pub snapshot_timeout: Duration,
    /// Height of a group header row (px).
    pub header_height: f64,
    pub row_heights: RowHeights,
    /// Close every leaf group (or the flat grid) with an "add row" row.
    pub include_append_row: bool,
    /// Capacity of the notice channel handed to the UI.
    pub notice_capacity: usize,
    /// Capacity of the actor's command channel.
    pub command_capacity: usize,
    pub column_defaults: ColumnDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_timeout: Duration::from_secs(10),
            header_height: 40.0,
            row_heights: RowHeights::default(),
            include_append_row: true,
            notice_capacity: 64,
            command_capacity: 256,
            column_defaults: ColumnDefaults::default(),
        }
    }
}

/// Pixel height per row height class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowHeights {
    pub short: f64,
    pub medium: f64,
    pub tall: f64,
    pub extra_tall: f64,
}

impl Default for RowHeights {
    fn default() -> Self {
        Self {
            short: 32.0,
            medium: 56.0,
            tall: 84.0,
            extra_tall: 108.0,
        }
    }
}

impl RowHeights {
    pub fn px(&self, height: RowHeight) -> f64 {
        match height {
            RowHeight::Short => self.short,
            RowHeight::Medium => self.medium,
            RowHeight::Tall => self.tall,
            RowHeight::ExtraTall => self.extra_tall,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.snapshot_timeout, Duration::from_secs(10));
        assert!(config.include_append_row);
        assert_eq!(config.row_heights.px(RowHeight::Short), 32.0);
        assert_eq!(config.row_heights.px(RowHeight::ExtraTall), 108.0);
    }

    #[test]
    fn test_partial_json_overrides() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"snapshot_timeout": 250, "row_heights": {"tall": 90}}"#).unwrap();
        assert_eq!(config.snapshot_timeout, Duration::from_millis(250));
        assert_eq!(config.row_heights.tall, 90.0);
        assert_eq!(config.row_heights.short, 32.0);
        assert_eq!(config.header_height, 40.0);
    }

    #[test]
    fn test_struct_update_override() {
        let config = EngineConfig {
            include_append_row: false,
            ..Default::default()
        };
        assert!(!config.include_append_row);
        assert_eq!(config.notice_capacity, 64);
    }
}
