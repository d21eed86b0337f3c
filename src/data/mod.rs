//! Local persistence: store layout, the `players` table and the event tables.

pub mod events;
pub mod players;
pub mod store;
