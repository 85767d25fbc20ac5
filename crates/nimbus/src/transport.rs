//! The message channel between the orchestrator and the tool executor:
//! newline-delimited JSON-RPC 2.0 over a child process's stdin/stdout.
//! `client` spawns and drives the executor; `server` is the loop the
//! executor runs against its own standard streams.
pub mod client;
pub mod protocol;
pub mod server;
