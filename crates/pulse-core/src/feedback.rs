use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EventId, RoomId};

/// Longest accepted feedback value, in characters.
pub const MAX_VALUE_CHARS: usize = 40;
/// Accepted client hash length range, in characters.
pub const CLIENT_HASH_CHARS: std::ops::RangeInclusive<usize> = 8..=128;

/// Fixed feedback topics. Closed set: anything else fails validation.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Music,
    Temp,
    Reading,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Music, Category::Temp, Category::Reading];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Music => "MUSIC",
            Self::Temp => "TEMP",
            Self::Reading => "READING",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MUSIC" => Ok(Self::Music),
            "TEMP" => Ok(Self::Temp),
            "READING" => Ok(Self::Reading),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// Room flavour owned by the room directory. The core accepts READING
/// feedback regardless; filtering by room type is up to the caller.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    #[default]
    Normal,
    Reading,
}

impl RoomType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Reading => "READING",
        }
    }
}

impl FromStr for RoomType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(Self::Normal),
            "READING" => Ok(Self::Reading),
            other => Err(format!("unknown room type: {other}")),
        }
    }
}

/// An accepted piece of feedback. Written once, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEvent {
    pub room_id: RoomId,
    pub category: Category,
    pub value: String,
    pub client_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A stored event together with the id the store assigned it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: EventId,
    pub event: FeedbackEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_known_names() {
        assert_eq!("MUSIC".parse::<Category>().unwrap(), Category::Music);
        assert_eq!("TEMP".parse::<Category>().unwrap(), Category::Temp);
        assert_eq!("READING".parse::<Category>().unwrap(), Category::Reading);
    }

    #[test]
    fn category_rejects_unknown_and_lowercase() {
        assert!("LIGHTS".parse::<Category>().is_err());
        assert!("music".parse::<Category>().is_err());
    }

    #[test]
    fn category_serde_uses_upper_names() {
        assert_eq!(serde_json::to_string(&Category::Temp).unwrap(), "\"TEMP\"");
        let parsed: Category = serde_json::from_str("\"READING\"").unwrap();
        assert_eq!(parsed, Category::Reading);
    }

    #[test]
    fn category_order_is_fixed() {
        let mut shuffled = vec![Category::Reading, Category::Music, Category::Temp];
        shuffled.sort();
        assert_eq!(shuffled, Category::ALL.to_vec());
    }

    #[test]
    fn room_type_defaults_to_normal() {
        assert_eq!(RoomType::default(), RoomType::Normal);
        assert_eq!("READING".parse::<RoomType>().unwrap(), RoomType::Reading);
        assert!("QUIET".parse::<RoomType>().is_err());
    }
}
