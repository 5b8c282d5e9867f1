//! Line-oriented TCP chat server with accounts and persisted history.
//!
//! Clients send newline-delimited text. Lines starting with `/` are session
//! commands (`/register`, `/login`, `/list`); every other line is stored and
//! answered with a computed reply. New connections first receive the full
//! stored history. Each module focuses on one responsibility:
//!
//! - [`cli`] parses the command line for server and client modes.
//! - [`server`] accepts TCP connections and runs one task per connection.
//! - [`connection`] is the per-connection engine: history replay, read loop,
//!   dispatch and replies.
//! - [`command`] parses and executes session commands.
//! - [`reply`] computes replies to payload lines.
//! - [`session`] holds the identity bound to a connection.
//! - [`password`] hashes and verifies passwords.
//! - [`store`] defines the storage traits and the SQLite adapter.
//! - [`client`] is a small interactive terminal client.

pub mod cli;
pub mod client;
pub mod command;
pub mod connection;
pub mod password;
pub mod reply;
pub mod server;
pub mod session;
pub mod store;
