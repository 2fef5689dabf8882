pub mod app_error;
pub mod app_state;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod middleware;
pub mod outbox;
pub mod rmq;
pub mod swagger;
