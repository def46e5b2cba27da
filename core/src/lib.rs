pub mod auth;
pub mod cascade;
pub mod db;
pub mod error;
pub mod models;
pub mod routines;
pub mod schema;
pub mod service;
