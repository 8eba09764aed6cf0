//! PLTP reference implementation: reliable, checksummed message delivery
//! between a Base and a Sensor over an unreliable byte stream.
//! Host-supplied I/O: the session drives a [`Transport`], a [`Clock`] and a
//! [`Watchdog`]; it never opens sockets or files itself.

pub mod config;
pub mod error;
pub mod file;
pub mod integrity;
pub mod protocol;
pub mod session;
pub mod sim;
pub mod transport;
pub mod wire;

mod delivery;
mod messaging;

pub use config::SessionConfig;
pub use error::{Fault, PltpError};
pub use file::{FileSource, MemoryFile};
pub use messaging::FileTransfer;
pub use protocol::{FileInfo, Message, MessageType, Role, MAX_BODY_LEN};
pub use session::{ConnectionState, Session, SessionStats};
pub use transport::{Clock, NoWatchdog, SystemClock, Transport, Watchdog};
pub use wire::{decode_header, encode_header, FrameHeader, HeaderError, HEADER_LEN};
