//! Lamp device representation

use serde::{Deserialize, Serialize};

/// A switchable device (lamp) in the dwelling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Stable identifier, immutable after creation
    pub id: String,
    /// Symbolic name, distinct from the id
    pub name: String,
    /// Current power state
    #[serde(default)]
    pub on: bool,
    /// X coordinate in the floor plan overview
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    /// Y coordinate in the floor plan overview
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    /// Switch channel identifiers assigned to this lamp
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub call_ids: Vec<String>,
}

impl Device {
    /// Create a device that is switched off and has no position
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            on: false,
            x: None,
            y: None,
            call_ids: Vec::new(),
        }
    }

    /// Set the overview position
    #[must_use]
    pub fn with_position(mut self, x: i32, y: i32) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    /// Overview position, if both coordinates are known
    #[must_use]
    pub fn position(&self) -> Option<(i32, i32)> {
        Some((self.x?, self.y?))
    }
}
