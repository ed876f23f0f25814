//! Member-facing shapes inspected by queries and merge logic

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::document::{Document, Fields};
use crate::error::Error;
use crate::util::timestamp_from_value;

/// Membership tier stored in a user's `membershipTier` field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipTier {
    #[default]
    Visitor,
    Regular,
    Vip,
    Vvip,
}

impl MembershipTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Visitor => "visitor",
            Self::Regular => "regular",
            Self::Vip => "vip",
            Self::Vvip => "vvip",
        }
    }

    /// Only paid premium tiers may browse other members' profiles.
    pub const fn can_search_members(self) -> bool {
        matches!(self, Self::Vip | Self::Vvip)
    }

    /// Tier of a user document; missing or unknown values count as visitor.
    pub fn of(user: &Document) -> Self {
        user.str_field("membershipTier")
            .and_then(|tier| tier.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for MembershipTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MembershipTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "visitor" => Ok(Self::Visitor),
            "regular" => Ok(Self::Regular),
            "vip" => Ok(Self::Vip),
            "vvip" => Ok(Self::Vvip),
            other => Err(Error::InvalidInput(format!(
                "unknown membership tier `{other}`"
            ))),
        }
    }
}

/// Entry of a user's `videos` array; one asset per `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoAsset {
    #[serde(rename = "type")]
    pub asset_type: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub uploaded_at: i64,
    #[serde(flatten)]
    pub extra: Fields,
}

/// Entry of an event's `participants` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub joined_at: i64,
    #[serde(flatten)]
    pub extra: Fields,
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    timestamp_from_value(&value)
        .ok_or_else(|| serde::de::Error::custom("expected Unix ms or RFC 3339 timestamp"))
}
