//! JSON-RPC access to the Solana node

pub mod client;
pub mod methods;

pub use client::*;
pub use methods::*;
