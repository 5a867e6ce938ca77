//! Tokenization of IRC messages.
//!
//! This crate parses and builds the RFC 1459 / RFC 2812 wire format: lines of
//! at most 512 bytes, an optional `:`-prefixed source, a verb, and up to 15
//! parameters of which the last may be a `:`-introduced trailing parameter.
//!
//! It also carries the small lexical helpers the server needs around the wire
//! format: `+/-` mode query parsing, the mode stacker that coalesces applied
//! changes back into bounded MODE lines, separator-based token streams, and
//! the port-range parser used for listener configuration.

#![warn(clippy::all, rust_2018_idioms)]

pub use buffers::{Buffer, MessageBuffer};
pub use command::{Access, Command};
pub use message::{Message, MESSAGE_LENGTH, PARAMS_LENGTH};

mod buffers;
mod command;
mod message;
pub mod mode;
pub mod rpl;
pub mod split;
