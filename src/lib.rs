//! Payment alerts for subscribed Bitcoin Cash addresses.
//!
//! A feed supervisor keeps one streaming subscription open for the current
//! address set, reconnecting with a rebuilt query whenever an address is
//! added. Each decoded transaction is dispatched in order: per-address
//! totals become push notifications and, for open listener pages, spoken
//! announcements.

pub mod address_set;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod feed_core;
pub mod notifier;
pub mod persistence;
pub mod rates;
pub mod server;
pub mod speech;
