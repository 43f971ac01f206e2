//! Inbox capsules: consolidates related email into capsules (properties,
//! deals, tasks, meetings) and tracks the follow-ups they carry.

pub mod capsules;
pub mod clustering;
pub mod db;
pub mod entity;
pub mod error;
pub mod followups;
pub mod google_api;
pub mod intelligence;
pub mod mail;
mod migrations;
pub mod pipeline;
pub mod processor;
pub mod retry;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;
