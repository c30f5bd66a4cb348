//! API Module
//!
//! HTTP handlers and routing for the admin surface of a hosted cache.
//!
//! # Endpoints
//! - `PUT /set` - Store a key-value pair
//! - `POST /add` - Store only if the key is absent
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Remove a key
//! - `POST /trim` - Evict a percentage of removable entries
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
