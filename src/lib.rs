//! Weather blend service: fetches hourly readings from two providers,
//! merges them into one feature table, trains a regressor per target and
//! scores it on a held-out day.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod dev_mode;
pub mod export;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod time_key;
pub mod training;
pub mod verify;
