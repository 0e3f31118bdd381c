//! Client-server protocol.
//!
//! One persistent, half-duplex stream per session:
//!
//! ```text
//! client                          server
//!   HANDSHAKE + version   ---->
//!                         <----   accepted + version + vocabulary
//!   DIRS                  ---->
//!                         <----   directory list
//!   COUNT                 ---->
//!                         <----   i32 file count
//!   SYNC                  ---->
//!                         <----   true + path + hash      (per record)
//!   i32 yes(1) | no(0)    ---->
//!                         <----   i64 length + raw bytes  (only on no)
//!                         <----   false                   (end of records)
//!   EXIT                  ---->   server closes
//! ```

pub mod message;
pub mod wire;

pub use message::{
    negotiate_version, read_directories, BinaryAnswer, FileOffer, Handshake, HandshakeReply,
    MessageKind, UnknownMessage, VersionNegotiationResult, Vocabulary, HANDSHAKE,
    PROTOCOL_VERSION, PROTOCOL_VERSION_MAX, PROTOCOL_VERSION_MIN, UNKNOWN_MESSAGE,
};
pub use wire::{read_bool, read_string, read_string_list, send};
