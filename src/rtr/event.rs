//! Callback payload types.

use std::net::IpAddr;

/// A ROA prefix announcement or withdrawal received from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    /// True for an announcement, false for a withdrawal.
    pub announcement: bool,
    pub address: IpAddr,
    /// Prefix length in bits.
    pub length: u8,
    /// Maximum prefix length permitted under the ROA.
    pub max_length: u8,
    /// Origin AS number.
    pub asn: u32,
}

/// An event from the cache, delivered to the session callback.
///
/// `new_prefix` is `None` for non-prefix events (serial notify, cache
/// response, end of data, cache reset, router key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub description: String,
    pub new_prefix: Option<Prefix>,
}

impl Event {
    pub(crate) fn info(description: String) -> Self {
        Event {
            description,
            new_prefix: None,
        }
    }

    pub(crate) fn prefix(prefix: Prefix) -> Self {
        Event {
            description: "Prefix".to_string(),
            new_prefix: Some(prefix),
        }
    }
}
