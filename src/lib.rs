//! Server side of the bridged UDP socket API for embedded devices: the device-side library
//!  opens UDP sockets, sends datagrams and reads received data through a set of named remote
//!  calls, and this crate implements the component those calls are bound to.
//!
//! ## Design goals
//!
//! * Multiplex an arbitrary number of independently-lived UDP sockets into a single table of
//!   numeric connection handles, each socket with its own background receive task
//!   * a handle of `0` means "no connection" and is what a caller gets when opening fails
//!   * handles are never reused while the process runs
//! * Reproduce the embedded UDP-class API's consumption model: `read` drains buffered data in
//!   caller-chosen chunk sizes, possibly consuming a received datagram across several calls,
//!   while preserving datagram boundaries through a length-prefixed framing header
//! * Sending is connectionless and immediate - every `write` names its destination and goes
//!   straight to the socket, bypassing all buffering
//! * No guarantee beyond raw UDP: no retries, no resequencing, no congestion control. The
//!   bridge adds bookkeeping and framing on top of unreliable datagram delivery, nothing else.
//!
//! ## Framing
//!
//! Every received datagram is queued as one framed record (all numbers big-endian):
//!
//! ```ascii
//! 0: source IPv4 address (4 bytes)
//! 4: source port (u16)
//! 6: payload length (u16)
//! 8: payload (exactly 'payload length' bytes)
//! ```
//!
//! A `read` call for fewer bytes than the head record holds returns a prefix of the framed
//!  bytes and leaves the rest of the record at the head of the queue - the device-side parser
//!  consumes header and payload from the same byte stream and relies on this exact split.
//!
//! ## Operations
//!
//! | method                 | inputs                        | result                        |
//! |------------------------|-------------------------------|-------------------------------|
//! | `udp/connect`          | host, port                    | connection id (0 on failure)  |
//! | `udp/connectMulticast` | group address, port           | connection id (0 on failure)  |
//! | `udp/close`            | connection id                 | "closed" / "not found"        |
//! | `udp/write`            | id, dest host, dest port, data| bytes written (0 on failure)  |
//! | `udp/read`             | id, max bytes                 | framed bytes (possibly empty) |
//!
//! How calls arrive at the process boundary is the transport's concern; this crate exposes the
//!  operations as [`bridge::UdpBridgeApi`] and the method names as constants next to it.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod packet_frame;
pub mod packet_queue;
pub mod registry;
mod safe_converter;
