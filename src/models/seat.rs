use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AreaId, ClaimId, PatronId, SessionId, TicketCode};

pub type SeatNumber = u32;

/// A seat only exists inside one (session, area) pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeatKey {
    pub session: SessionId,
    pub area: AreaId,
    pub seat: SeatNumber,
}

impl SeatKey {
    pub const fn new(session: SessionId, area: AreaId, seat: SeatNumber) -> Self {
        Self { session, area, seat }
    }

    pub const fn partition(&self) -> (SessionId, AreaId) {
        (self.session, self.area)
    }
}

impl fmt::Display for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.session, self.area, self.seat)
    }
}

/// Transient hold on a seat between selection and payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub key: SeatKey,
    pub patron: PatronId,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Durable fact that a seat was sold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occupancy {
    pub key: SeatKey,
    pub patron: PatronId,
    pub ticket_code: TicketCode,
    pub sold_at: DateTime<Utc>,
}
