//! Seat numbering of an area.
//!
//! Ordering here is presentation only; nothing in the purchase path depends on it.

use std::collections::BTreeSet;

use crate::models::{Area, SeatNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatMap {
    capacity: u32,
}

impl SeatMap {
    pub fn of(area: &Area) -> Self {
        Self { capacity: area.capacity }
    }

    pub fn contains(&self, seat: SeatNumber) -> bool {
        seat >= 1 && seat <= self.capacity
    }

    /// All seats, 1..=capacity.
    pub fn seats(&self) -> impl Iterator<Item = SeatNumber> {
        1..=self.capacity
    }

    /// Seats minus the ones reported as occupied, in display order.
    pub fn available(&self, occupied: &BTreeSet<SeatNumber>) -> Vec<SeatNumber> {
        self.seats().filter(|seat| !occupied.contains(seat)).collect()
    }
}

/// Shorthand for `SeatMap::of(area).seats()`.
pub fn seats_of(area: &Area) -> Vec<SeatNumber> {
    SeatMap::of(area).seats().collect()
}
