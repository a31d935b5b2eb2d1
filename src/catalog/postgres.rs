use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use sqlx::FromRow;

use super::Catalog;
use crate::database::Database;
use crate::error::CatalogError;
use crate::models::{Area, AreaId, EventId, PatronId, Price, Session, SessionId, TimeSlot};

#[derive(Clone)]
pub struct PgCatalog {
    db: Database,
}

#[derive(FromRow)]
struct SessionRow {
    id: i64,
    event_id: i64,
    event_title: String,
    session_date: NaiveDate,
    slot: String,
    session_time: Option<NaiveTime>,
}

#[derive(FromRow)]
struct AreaRow {
    id: i64,
    name: String,
    capacity: i32,
    price_cents: i64,
}

impl TryFrom<SessionRow> for Session {
    type Error = CatalogError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let slot = TimeSlot::parse(&row.slot).ok_or_else(|| {
            CatalogError::Corrupt(format!("session {} has unknown slot {:?}", row.id, row.slot))
        })?;
        Ok(Session {
            id: SessionId::new(row.id),
            event_id: EventId::new(row.event_id),
            event_title: row.event_title,
            date: row.session_date,
            slot,
            time: row.session_time,
        })
    }
}

impl TryFrom<AreaRow> for Area {
    type Error = CatalogError;

    fn try_from(row: AreaRow) -> Result<Self, Self::Error> {
        let capacity = u32::try_from(row.capacity).map_err(|_| {
            CatalogError::Corrupt(format!("area {} has negative capacity", row.id))
        })?;
        Ok(Area {
            id: AreaId::new(row.id),
            name: row.name,
            capacity,
            price: Price::from_cents(row.price_cents),
        })
    }
}

impl PgCatalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn session(&self, id: SessionId) -> Result<Option<Session>, CatalogError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, event_id, event_title, session_date, slot, session_time
             FROM sessions
             WHERE id = $1"
        )
        .bind(id.get())
        .fetch_optional(&self.db.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn area(&self, id: AreaId) -> Result<Option<Area>, CatalogError> {
        let row: Option<AreaRow> = sqlx::query_as(
            "SELECT id, name, capacity, price_cents FROM areas WHERE id = $1"
        )
        .bind(id.get())
        .fetch_optional(&self.db.pool)
        .await?;

        row.map(Area::try_from).transpose()
    }

    async fn patron_exists(&self, id: PatronId) -> Result<bool, CatalogError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM patrons WHERE id = $1 AND is_active = true)"
        )
        .bind(id.get())
        .fetch_one(&self.db.pool)
        .await?;
        Ok(exists)
    }
}
