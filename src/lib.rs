pub mod audio;
pub mod chat;
pub mod cli;
pub mod controller;
pub mod error;
pub mod export;
pub mod gateway;
pub mod metadata;
pub mod persistence;
pub mod server;
pub mod state;
pub mod storage;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
