pub mod cache;
pub mod collection;
pub mod config;
pub mod content;
pub mod db;
pub mod http;
pub mod model;
pub mod outbox;
pub mod settings;
pub mod sweeper;
pub mod theme;
