pub mod auth;
pub mod configuration;
pub mod error;
pub mod identity;
pub mod logger;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod session;
pub mod startup;
pub mod sweeper;
pub mod telemetry;
pub mod validators;
