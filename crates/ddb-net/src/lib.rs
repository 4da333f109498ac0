//! Cluster transport: one request per connection.
//!
//! A sender opens a TCP connection, writes one length-prefixed frame,
//! optionally reads one framed response, and closes. The server accepts
//! connections for the lifetime of the node and spawns one worker per
//! accepted socket. There is no pipelining and no connection reuse.

mod client;
mod server;
mod wire;

pub use client::{NetClient, Peer};
pub use server::{Bound, Inbound, Server};
pub use wire::{read_frame, write_frame};
