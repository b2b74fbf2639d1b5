//! Reading Alerts
//!
//! Turns out-of-range readings into graded, human readable alerts and
//! keeps per-parameter alert bookkeeping.

mod manager;

pub use manager::{AlertConfig, AlertManager, AlertState, ReadingAlert, Severity};
