//! Client for the RPKI-to-Router (RTR) protocol, RFC 6810 and RFC 8210.
//!
//! Connects to a validating RPKI cache, subscribes to its validated ROA
//! payload, and drives a callback with every prefix announcement and
//! withdrawal for the lifetime of the session. Built for surveys and
//! monitoring, not for inclusion in a real router.

pub mod error;
pub mod rtr;

pub use error::RtrError;
pub use rtr::event::{Event, Prefix};
pub use rtr::pdu::Version;
pub use rtr::session::{dial, Client, Session};
