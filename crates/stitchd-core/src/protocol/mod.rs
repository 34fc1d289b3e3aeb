//! # Wire Protocol
//!
//! Big-endian, positional framing for one request batch per connection and
//! the single response that answers it. Field order and widths are a strict
//! contract with existing clients: nothing here may be reordered or resized.
//!
//! - [`request`] - request batch framing.
//! - [`response`] - success and failure response framing.
//! - [`codec`] - `tokio_util` codecs for servers and clients.

pub mod codec;
pub mod request;
pub mod response;
mod wire;

#[cfg(test)]
mod tests;

pub use codec::{ClientCodec, ServerCodec};
pub use request::{decode_request_batch, encode_request_batch};
pub use response::{decode_response, encode_response};
