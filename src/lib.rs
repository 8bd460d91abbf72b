//! Group chat relay over a publish/subscribe broker.
//!
//! A relay worker owns the group registry, applies administrative commands
//! arriving on `commands`, and re-publishes chat messages from `hub` onto
//! per-group `group.<name>` topics. Each client drains its private
//! `username.<name>` inbox and shows only messages of the group it has open.

pub mod domain;
pub mod application;
pub mod infrastructure;
