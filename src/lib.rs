pub mod album_store;
pub mod availability;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod history;
pub mod lastfm;
pub mod model;
pub mod persist;
pub mod spotify;
pub mod stats;
