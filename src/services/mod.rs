pub mod cleanup;
pub mod payment;
