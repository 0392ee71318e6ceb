pub mod event;
pub mod pdu;
pub mod session;

pub use event::{Event, Prefix};
pub use pdu::Version;
pub use session::{dial, Client, Session};
