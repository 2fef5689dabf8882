pub mod analytics;
pub mod api;
pub mod commission;
pub mod consumers;
pub mod dispatch;
pub mod domain;
pub mod events;
pub mod infra;
pub mod models;
pub mod notifier;
pub mod routes;
pub mod schema;
pub mod storage;
