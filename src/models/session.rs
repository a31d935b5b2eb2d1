use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::{EventId, SessionId};

/// Time-of-day slot a performance is scheduled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSlot {
    Matinee,
    Afternoon,
    Evening,
}

impl TimeSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSlot::Matinee => "matinee",
            TimeSlot::Afternoon => "afternoon",
            TimeSlot::Evening => "evening",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "matinee" | "morning" => Some(TimeSlot::Matinee),
            "afternoon" => Some(TimeSlot::Afternoon),
            "evening" | "night" => Some(TimeSlot::Evening),
            _ => None,
        }
    }
}

/// One scheduled performance of an event. Read-only for the purchase core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub event_id: EventId,
    pub event_title: String,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub time: Option<NaiveTime>,
}
