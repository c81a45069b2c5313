pub mod app;
pub mod calendar;
pub mod cli;
pub mod config;
pub mod journaling;
pub mod model;
pub mod repository;
pub mod storage;
pub mod ui;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
