//! KRPC messages ([BEP-5]) as this node speaks them.
//!
//! Only the subset of bencode that KRPC actually uses is accepted: one outer
//! dictionary, at most one inner dictionary under `a` or `r`, and at most one
//! list (the `values` of a `get_peers` reply). Everything else is rejected
//! while scanning, before any field is trusted.
//!
//! # Decoding
//!
//! ```
//! use mldht::krpc::{decode, Method};
//!
//! let mut msg = b"d1:ad2:id20:".to_vec();
//! msg.extend_from_slice(&[0x42; 20]);
//! msg.extend_from_slice(b"e1:q4:ping1:t1:\x88e");
//!
//! let krpc = decode(&msg).unwrap();
//! assert_eq!(krpc.method, Method::Ping);
//! assert_eq!(krpc.nid.as_bytes(), &[0x42; 20]);
//! assert_eq!(krpc.tok, b"\x88");
//! ```
//!
//! # Method inference
//!
//! The method is never read from a single field. The scanner starts from the
//! set of every [`Method`] and intersects it with what each key and value
//! allows: `a` rules out replies, `nodes` leaves only the `find_node` and
//! `get_peers` replies, `q = get_peers` leaves only that query, and so on. A
//! contradiction (an `r` after an `a`, a `target` in a reply) fails the decode
//! with a specific [`DecodeError`].
//!
//! # Transaction ids
//!
//! Replies are only accepted to transactions we could have sent. Every query
//! we send ends its `t` with a per-method tag byte (see [`TokenPolicy`]);
//! `get_peers` prefixes the tag with the two bytes of a pursuit token, which
//! [`Krpc::pursuit_token`] reads back.
//!
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html

mod decode;
mod encode;
mod error;
mod method;

pub use decode::{decode, Decoder, Krpc, TokenPolicy};
pub use encode::{Encoder, Outgoing};
pub use error::{DecodeError, ErrorClass};
pub use method::{Method, MethodMask};

#[cfg(test)]
mod tests;
