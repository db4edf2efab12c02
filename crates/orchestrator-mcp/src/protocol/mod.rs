//! JSON-RPC 2.0 framing over stdio.

pub mod stdio;
pub mod types;
