use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A patient known to the server, identified by phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub phone_number: String,
    pub name: String,
}

/// Descriptive slot of the day a reminder belongs to. Never used for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeType {
    Morning,
    Afternoon,
    Evening,
    BeforeBed,
}

impl TimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeType::Morning => "morning",
            TimeType::Afternoon => "afternoon",
            TimeType::Evening => "evening",
            TimeType::BeforeBed => "before_bed",
        }
    }
}

impl fmt::Display for TimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for TimeType {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "morning" => Ok(TimeType::Morning),
            "afternoon" => Ok(TimeType::Afternoon),
            "evening" => Ok(TimeType::Evening),
            "before_bed" => Ok(TimeType::BeforeBed),
            other => Err(UnknownVariant {
                kind: "time type",
                value: other.to_string(),
            }),
        }
    }
}

/// Stored state of a consumption record.
///
/// `Missed` and `Pending` are only ever written by an external reconciliation
/// process; the recorder counts them but never produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionStatus {
    Taken,
    Skipped,
    Cancelled,
    Pending,
    Missed,
}

impl ConsumptionStatus {
    pub const ALL: [ConsumptionStatus; 5] = [
        ConsumptionStatus::Taken,
        ConsumptionStatus::Skipped,
        ConsumptionStatus::Cancelled,
        ConsumptionStatus::Pending,
        ConsumptionStatus::Missed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumptionStatus::Taken => "taken",
            ConsumptionStatus::Skipped => "skipped",
            ConsumptionStatus::Cancelled => "cancelled",
            ConsumptionStatus::Pending => "pending",
            ConsumptionStatus::Missed => "missed",
        }
    }
}

impl fmt::Display for ConsumptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsumptionStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConsumptionStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "consumption status",
                value: s.to_string(),
            })
    }
}

/// What the patient did with a reminder, as sent by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionAction {
    Taken,
    Skipped,
    Cancel,
}

/// Client-side identity of a scheduled notification: server reminder id plus
/// its time type, rendered as `"{id}-{time_type}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NotificationKey {
    pub notification_id: i32,
    pub time_type: TimeType,
}

impl NotificationKey {
    pub fn new(notification_id: i32, time_type: TimeType) -> Self {
        Self {
            notification_id,
            time_type,
        }
    }
}

impl fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.notification_id, self.time_type)
    }
}

impl FromStr for NotificationKey {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || UnknownVariant {
            kind: "notification key",
            value: s.to_string(),
        };
        let (id, tt) = s.split_once('-').ok_or_else(bad)?;
        let notification_id = id.parse::<i32>().map_err(|_| bad())?;
        let time_type = tt.parse::<TimeType>().map_err(|_| bad())?;
        Ok(Self::new(notification_id, time_type))
    }
}

impl TryFrom<String> for NotificationKey {
    type Error = UnknownVariant;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NotificationKey> for String {
    fn from(value: NotificationKey) -> Self {
        value.to_string()
    }
}
