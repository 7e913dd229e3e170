pub mod adapters;
pub mod config;
pub mod error;
pub mod sweeper;
pub mod web;
