//! Courier: unified SMS/MMS and email messaging service.
//!
//! Inbound provider webhooks and outbound sends converge on one canonical
//! message shape, grouped into conversations by participant set.

pub mod api;
pub mod cache;
pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod simulator;
pub mod store;

#[cfg(test)]
mod testing;
