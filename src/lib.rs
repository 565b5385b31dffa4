//! REST backend for users, todo lists and todos on an embedded SQLite store.
//!
//! Layers, bottom-up: [`store`] (keyed collections with transactions),
//! [`model`] (entities and partial updates), [`coordinator`] (cross-record
//! integrity and cascades), and the axum surface in [`handler`] / [`route`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod extract;
pub mod handler;
pub mod logging;
pub mod maintenance;
pub mod model;
pub mod password;
pub mod route;
pub mod schema;
pub mod store;

pub use coordinator::Coordinator;
pub use error::{AppError, StoreError};
pub use store::{Store, StoreLocation};

// Struct representing the application state
pub struct AppState {
    pub coordinator: Coordinator,
}

impl AppState {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }
}
