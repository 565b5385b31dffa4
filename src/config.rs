use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

use crate::store::StoreLocation;

/// Command-line and environment configuration. A `.env` file, when present, is
/// loaded into the environment before parsing.
#[derive(Debug, Clone, Parser)]
#[command(name = "todo-graph-api", version, about = "REST backend for users, todo lists and todos")]
pub struct Config {
    /// SQLite database file
    #[arg(long, env = "TODO_DATABASE_PATH", default_value = "data/todoapp.db")]
    pub database_path: PathBuf,

    /// Keep everything in memory; nothing is written to disk
    #[arg(long, env = "TODO_IN_MEMORY")]
    pub in_memory: bool,

    /// Address the HTTP server listens on
    #[arg(long, env = "TODO_BIND_ADDR", default_value = "127.0.0.1:5000")]
    pub bind_addr: SocketAddr,

    /// Origin allowed by CORS
    #[arg(long, env = "TODO_CORS_ORIGIN", default_value = "http://localhost:3000")]
    pub cors_origin: String,

    /// Log filter directives
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,

    /// Remove stale lock files next to the database and exit
    #[arg(long, conflicts_with = "reset_data")]
    pub force_unlock: bool,

    /// Back up the data directory into `backup/`, empty it, and exit
    #[arg(long)]
    pub reset_data: bool,
}

impl Config {
    pub fn store_location(&self) -> StoreLocation {
        if self.in_memory {
            StoreLocation::Memory
        } else {
            StoreLocation::File(self.database_path.clone())
        }
    }

    /// Directory holding the database file.
    pub fn data_dir(&self) -> PathBuf {
        match self.database_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// `backup/` next to the data directory.
    pub fn backup_dir(&self) -> PathBuf {
        let data_dir = self.data_dir();
        match data_dir.parent() {
            Some(parent) => parent.join("backup"),
            None => PathBuf::from("backup"),
        }
    }
}
