//! Fan-out of completed sales to independent observers.
//!
//! Observers run synchronously, in registration order, after the sale is
//! committed. Whatever an observer does, the sale stands: errors and panics
//! are logged here and never reach the purchasing patron.

mod archive;
mod sale_log;

pub use archive::TicketArchive;
pub use sale_log::SaleLog;

use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::models::{PurchaseId, Ticket};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleCompleted {
    pub purchase: PurchaseId,
    pub ticket: Ticket,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ObserverError(String);

impl ObserverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub trait SaleObserver: Send + Sync {
    fn name(&self) -> &str;

    fn on_sale_completed(&self, event: &SaleCompleted) -> Result<(), ObserverError>;
}

struct FnObserver<F> {
    name: String,
    callback: F,
}

impl<F> SaleObserver for FnObserver<F>
where
    F: Fn(&SaleCompleted) -> Result<(), ObserverError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_sale_completed(&self, event: &SaleCompleted) -> Result<(), ObserverError> {
        (self.callback)(event)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct NotificationHub {
    observers: RwLock<Vec<Arc<dyn SaleObserver>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn SaleObserver>) {
        debug!("Registering sale observer {}", observer.name());
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    pub fn subscribe<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&SaleCompleted) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnObserver {
            name: name.into(),
            callback,
        }));
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn publish(&self, event: &SaleCompleted) -> PublishReport {
        // Snapshot so an observer may register another one without deadlocking.
        let observers: Vec<_> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut report = PublishReport::default();
        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_sale_completed(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        code = %event.ticket.code,
                        "Sale observer {} failed: {}", observer.name(), e
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    error!(
                        code = %event.ticket.code,
                        "Sale observer {} panicked: {}", observer.name(), panic_message(&*panic)
                    );
                }
            }
        }
        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
