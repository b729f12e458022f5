#[macro_use]
extern crate diesel;

pub mod antelope;
pub mod api_clients;
pub mod config;
pub mod db;
pub mod error;
pub mod indexer;
pub mod models;
pub mod schema;
