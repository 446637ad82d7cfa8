use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Supported live-streaming platforms.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Platform {
    Douyin,
    Bilibili,
    Kuaishou,
    Huya,
    Douyu,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Platforms whose room ids are plain integers.
    pub fn requires_numeric_room_id(&self) -> bool {
        matches!(self, Self::Douyin | Self::Bilibili | Self::Douyu)
    }

    /// Check that `room_id` has the shape this platform expects.
    pub fn validate_room_id(&self, room_id: &str) -> bool {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return false;
        }
        if self.requires_numeric_room_id() {
            return room_id.parse::<u64>().is_ok();
        }
        true
    }
}
