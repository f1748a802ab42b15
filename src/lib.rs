pub mod cases;
pub mod config;
pub mod routes;
pub mod sandbox;
pub mod web_server;
