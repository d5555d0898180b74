#![allow(async_fn_in_trait)]

pub mod collaborators;
pub mod command;
pub mod config;
pub mod error;
pub mod framer;
pub mod handshake;
pub mod pos;
pub mod proto;
pub mod reader;
pub mod sender;
pub mod signals;
pub mod slots;
pub mod stats;

#[cfg(test)]
pub(crate) mod testutil;
