use async_trait::async_trait;
use chrono::{Duration, NaiveTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use super::Catalog;
use crate::error::CatalogError;
use crate::models::{Area, AreaId, EventId, PatronId, Price, Session, SessionId, TimeSlot};

/// Catalog held in process memory; also what the server runs on without a database.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    sessions: RwLock<HashMap<SessionId, Session>>,
    areas: RwLock<HashMap<AreaId, Area>>,
    patrons: RwLock<HashSet<PatronId>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A small house: five areas, a week of evening performances, patrons 1..=100.
    pub fn demo() -> Self {
        let catalog = Self::new();
        let areas = [
            (1, "Stalls A", 25, 4000),
            (2, "Stalls B", 100, 6000),
            (3, "Boxes", 30, 8000),
            (4, "Dress Circle", 50, 12000),
            (5, "Gallery", 60, 2500),
        ];
        for (id, name, capacity, cents) in areas {
            catalog.insert_area(Area {
                id: AreaId::new(id),
                name: name.to_string(),
                capacity,
                price: Price::from_cents(cents),
            });
        }

        let today = Utc::now().date_naive();
        for day in 0..7 {
            catalog.insert_session(Session {
                id: SessionId::new(day + 1),
                event_id: EventId::new(1),
                event_title: "The Cherry Orchard".to_string(),
                date: today + Duration::days(day),
                slot: TimeSlot::Evening,
                time: NaiveTime::from_hms_opt(20, 0, 0),
            });
        }

        for patron in 1..=100 {
            catalog.register_patron(PatronId::new(patron));
        }
        catalog
    }

    pub fn insert_session(&self, session: Session) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id, session);
    }

    pub fn insert_area(&self, area: Area) {
        self.areas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(area.id, area);
    }

    /// Reprices an area. Returns false if the area is unknown.
    pub fn set_area_price(&self, id: AreaId, price: Price) -> bool {
        let mut areas = self.areas.write().unwrap_or_else(PoisonError::into_inner);
        match areas.get_mut(&id) {
            Some(area) => {
                area.price = price;
                true
            }
            None => false,
        }
    }

    pub fn register_patron(&self, id: PatronId) {
        self.patrons
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn session(&self, id: SessionId) -> Result<Option<Session>, CatalogError> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(&id).cloned())
    }

    async fn area(&self, id: AreaId) -> Result<Option<Area>, CatalogError> {
        let areas = self.areas.read().unwrap_or_else(PoisonError::into_inner);
        Ok(areas.get(&id).cloned())
    }

    async fn patron_exists(&self, id: PatronId) -> Result<bool, CatalogError> {
        let patrons = self.patrons.read().unwrap_or_else(PoisonError::into_inner);
        Ok(patrons.contains(&id))
    }
}
