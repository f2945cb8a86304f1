//! Wire protocol for request/response document synchronization.
//!
//! Each request and response carries a batch of independent frames. A frame
//! is one y-sync message, base64 encoded so it can travel in any text
//! payload.
//!
//! ## Message Format
//!
//! Messages are encoded using lib0 variable-length integers:
//!
//! ```text
//! Message = varUint(message_type) • message_payload
//!
//! message_type:
//!   0 = Sync protocol message   (payload: varUint(2 = update) • varUint8Array(update))
//!   1 = Presence message        (payload: varUint8Array(awareness update))
//!   2 = Auth message            (reserved)
//!   3 = Presence query          (reserved)
//! ```

pub mod codec;
pub mod message;

pub use codec::{decode, encode_frame, encode_presence, encode_sync};
pub use message::{Message, SyncMessage};
