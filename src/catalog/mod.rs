//! Administrative data the purchase core reads but never writes.

mod memory;
mod postgres;

pub use memory::MemoryCatalog;
pub use postgres::PgCatalog;

use async_trait::async_trait;

use crate::error::CatalogError;
use crate::models::{Area, AreaId, PatronId, Session, SessionId};

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn session(&self, id: SessionId) -> Result<Option<Session>, CatalogError>;

    async fn area(&self, id: AreaId) -> Result<Option<Area>, CatalogError>;

    async fn patron_exists(&self, id: PatronId) -> Result<bool, CatalogError>;
}
