use chrono::Utc;
use uuid::Uuid;

use crate::models::{Area, Occupancy, Session, Ticket, TicketCode};

/// Hex digits taken from a v4 uuid. Twelve digits keep the birthday bound
/// far above any realistic number of sales.
const CODE_LEN: usize = 12;

/// Issues ticket codes and turns committed occupancies into tickets.
#[derive(Debug, Clone, Default)]
pub struct TicketFactory;

impl TicketFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn issue_code(&self) -> TicketCode {
        let hex = Uuid::new_v4().simple().to_string().to_uppercase();
        TicketCode::new(&hex[..CODE_LEN])
    }

    /// Copies price and display fields out of the snapshots taken when the
    /// purchase started; the ticket never reads the catalog again.
    pub fn mint(&self, occupancy: &Occupancy, area: &Area, session: &Session) -> Ticket {
        Ticket {
            code: occupancy.ticket_code.clone(),
            patron: occupancy.patron,
            session_id: occupancy.key.session,
            area_id: occupancy.key.area,
            seat: occupancy.key.seat,
            price: area.price,
            purchased_at: Utc::now(),
            event_title: session.event_title.clone(),
            session_date: session.date,
            session_slot: session.slot,
            session_time: session.time,
            area_name: area.name.clone(),
        }
    }
}
