use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AreaId, PatronId, Price, SeatNumber, SessionId, TimeSlot};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketCode(String);

impl TicketCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Patron-facing record of a sale.
///
/// Display fields are copied at mint time so the ticket can be shown or
/// printed without looking anything up again, and so later catalog edits
/// never change what was sold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub code: TicketCode,
    pub patron: PatronId,
    pub session_id: SessionId,
    pub area_id: AreaId,
    pub seat: SeatNumber,
    pub price: Price,
    pub purchased_at: DateTime<Utc>,
    pub event_title: String,
    pub session_date: NaiveDate,
    pub session_slot: TimeSlot,
    pub session_time: Option<NaiveTime>,
    pub area_name: String,
}
