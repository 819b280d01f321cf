//! USD rate scraper
//!
//! Renders the minfin.com.ua bank USD rates page in headless Chrome, parses
//! the rates table into typed records and appends them to a Redis stream
//! for downstream consumers. Failed runs leave screenshots behind.

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod model;
pub mod queue;
pub mod runner;
pub mod scraping;
