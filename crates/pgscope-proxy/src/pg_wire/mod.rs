//! PostgreSQL wire protocol observer
//!
//! Passive reconstruction of message-level events from the proxied byte
//! streams. Nothing here ever touches the forwarded bytes.
//!
//! ## Module Structure
//!
//! - `constants` - Message type bytes, startup request codes, named OIDs
//! - `packet` - Packet framing: validation and TCP chunk reassembly
//! - `message` - Typed messages, per-type decoders, and the packet splitter
//! - `observer` - Per-connection correlation of requests with outcomes
//!
//! ## Data flow
//!
//! 1. A forwarding task tees each chunk into its direction's `WireObserver`
//! 2. The `PacketAssembler` buffers chunks until they form a valid packet
//! 3. `Packet::messages()` splits the packet into the messages of interest
//! 4. The shared `QueryCorrelator` pairs Parse/Bind with their outcome and
//!    publishes one `Query` record per retired entry

pub mod constants;
pub mod message;
pub mod observer;
pub mod packet;

pub use observer::{QueryCorrelator, WireObserver};
pub use packet::Origin;
