pub mod ids;
pub mod session;
pub mod area;
pub mod seat;
pub mod ticket;

pub use ids::{AreaId, ClaimId, EventId, PatronId, PurchaseId, SessionId};
pub use session::{Session, TimeSlot};
pub use area::{Area, Price};
pub use seat::{Claim, Occupancy, SeatKey, SeatNumber};
pub use ticket::{Ticket, TicketCode};
