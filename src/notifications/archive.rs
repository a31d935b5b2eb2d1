use tokio::runtime::Handle;
use tracing::{error, info};

use super::{ObserverError, SaleCompleted, SaleObserver};
use crate::database::Database;
use crate::models::Ticket;

/// Writes sold tickets to Postgres. The insert runs on its own task so a
/// slow database never holds up the other observers.
pub struct TicketArchive {
    db: Database,
}

impl TicketArchive {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn insert(db: &Database, ticket: &Ticket) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO tickets (code, patron_id, session_id, area_id, seat, price_cents,
                                 purchased_at, event_title, session_date, slot, session_time, area_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (code) DO NOTHING
            "#
        )
        .bind(ticket.code.as_str())
        .bind(ticket.patron.get())
        .bind(ticket.session_id.get())
        .bind(ticket.area_id.get())
        .bind(i32::try_from(ticket.seat).unwrap_or(i32::MAX))
        .bind(ticket.price.cents())
        .bind(ticket.purchased_at)
        .bind(&ticket.event_title)
        .bind(ticket.session_date)
        .bind(ticket.session_slot.as_str())
        .bind(ticket.session_time)
        .bind(&ticket.area_name)
        .execute(&db.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl SaleObserver for TicketArchive {
    fn name(&self) -> &str {
        "ticket-archive"
    }

    fn on_sale_completed(&self, event: &SaleCompleted) -> Result<(), ObserverError> {
        let handle = Handle::try_current()
            .map_err(|_| ObserverError::new("no async runtime to archive on"))?;
        let db = self.db.clone();
        let ticket = event.ticket.clone();

        handle.spawn(async move {
            match TicketArchive::insert(&db, &ticket).await {
                Ok(true) => info!(code = %ticket.code, "Ticket archived"),
                Ok(false) => info!(code = %ticket.code, "Ticket already archived"),
                Err(e) => error!(code = %ticket.code, "Failed to archive ticket: {:?}", e),
            }
        });
        Ok(())
    }
}
