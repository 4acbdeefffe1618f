//! Network layer: framing, the text protocol, and both session endpoints.

pub mod codec;
pub mod protocol;
pub mod server_actor;
pub mod session;

pub use codec::{read_frame, write_frame, CodecError, DEFAULT_MAX_FRAME_BYTES};
pub use protocol::{Command, CommandError, InfoField, Message, ProtocolError};
pub use server_actor::{DispatchServer, SessionSummary};
pub use session::{ClientSession, MirrorSnapshot, SessionEvent};
