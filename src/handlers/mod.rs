pub mod drs_handlers;
pub mod health_handlers;
