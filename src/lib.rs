//! GA4GH DRS resolver: turns DRS object ids into merged object metadata and
//! short-lived signed URLs for snapshot files.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
