//! RTR wire model.
//!
//! PDU header and payload layouts per RFC 6810 (version 0) and RFC 8210
//! (version 1). The two versions share every layout except End of Data,
//! which grows from 12 to 24 octets in version 1.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::RtrError;
use crate::rtr::event::Prefix;

/// Size of the common PDU header.
pub const HEADER_LEN: usize = 8;
/// Ceiling on the total length field of any PDU.
pub const MAX_PDU_LEN: u32 = 65536;
/// Total length of a Reset Query.
pub const RESET_QUERY_LEN: usize = 8;
/// Total length of a Serial Query.
pub const SERIAL_QUERY_LEN: usize = 12;

/// RTR protocol version, fixed at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V0,
    V1,
}

impl Version {
    pub fn as_u8(self) -> u8 {
        match self {
            Version::V0 => 0,
            Version::V1 => 1,
        }
    }
}

impl TryFrom<u8> for Version {
    type Error = RtrError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Version::V0),
            1 => Ok(Version::V1),
            other => Err(RtrError::UnsupportedVersion(other)),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// PDU type codes from the IANA rpki-rtr registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PduType {
    SerialNotify = 0,
    SerialQuery = 1,
    ResetQuery = 2,
    CacheResponse = 3,
    Ipv4Prefix = 4,
    Ipv6Prefix = 6,
    EndOfData = 7,
    CacheReset = 8,
    RouterKey = 9,
    ErrorReport = 10,
}

impl TryFrom<u8> for PduType {
    type Error = RtrError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PduType::SerialNotify),
            1 => Ok(PduType::SerialQuery),
            2 => Ok(PduType::ResetQuery),
            3 => Ok(PduType::CacheResponse),
            4 => Ok(PduType::Ipv4Prefix),
            6 => Ok(PduType::Ipv6Prefix),
            7 => Ok(PduType::EndOfData),
            8 => Ok(PduType::CacheReset),
            9 => Ok(PduType::RouterKey),
            10 => Ok(PduType::ErrorReport),
            other => Err(RtrError::UnknownPduType(other)),
        }
    }
}

impl PduType {
    /// Expected total PDU length (header included) for this type under the
    /// given protocol version, or `None` for variable-length types.
    pub fn expected_len(self, version: Version) -> Option<u32> {
        match self {
            PduType::SerialNotify => Some(12),
            PduType::SerialQuery => Some(12),
            PduType::ResetQuery => Some(8),
            PduType::CacheResponse => Some(8),
            PduType::Ipv4Prefix => Some(20),
            PduType::Ipv6Prefix => Some(32),
            PduType::EndOfData => Some(match version {
                Version::V0 => 12,
                Version::V1 => 24,
            }),
            PduType::CacheReset => Some(8),
            PduType::RouterKey | PduType::ErrorReport => None,
        }
    }
}

/// The common 8-octet PDU header.
///
/// Octets 2-3 carry a session id for most types; Error Report reuses them
/// as the error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub pdu_type: u8,
    pub session: u16,
    pub length: u32,
}

impl Header {
    pub fn parse(raw: [u8; HEADER_LEN]) -> Self {
        Header {
            version: raw[0],
            pdu_type: raw[1],
            session: u16::from_be_bytes([raw[2], raw[3]]),
            length: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }
}

/// Outbound Reset Query, asking the cache for its full current dataset.
#[derive(Debug, Clone, Copy)]
pub struct ResetQuery {
    pub version: Version,
}

impl ResetQuery {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESET_QUERY_LEN);
        buf.put_u8(self.version.as_u8());
        buf.put_u8(PduType::ResetQuery as u8);
        buf.put_u16(0);
        buf.put_u32(RESET_QUERY_LEN as u32);
        buf.freeze()
    }
}

/// Outbound Serial Query, asking for changes since `serial`.
#[derive(Debug, Clone, Copy)]
pub struct SerialQuery {
    pub version: Version,
    pub session_id: u16,
    pub serial: u32,
}

impl SerialQuery {
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SERIAL_QUERY_LEN);
        buf.put_u8(self.version.as_u8());
        buf.put_u8(PduType::SerialQuery as u8);
        buf.put_u16(self.session_id);
        buf.put_u32(SERIAL_QUERY_LEN as u32);
        buf.put_u32(self.serial);
        buf.freeze()
    }
}

/// Timer values carried by a version-1 End of Data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EodTimers {
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
}

/// A decoded inbound PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    SerialNotify { session_id: u16, serial: u32 },
    CacheResponse { session_id: u16 },
    Prefix(Prefix),
    EndOfData {
        session_id: u16,
        serial: u32,
        timers: Option<EodTimers>,
    },
    CacheReset,
    RouterKey,
    ErrorReport { code: u16, text: String },
}

/// Decode an inbound PDU from its header and payload.
///
/// The payload must be exactly `header.length - 8` octets, as produced by
/// the frame reader. Fixed-size types are validated against the per-type,
/// per-version length table before any field is touched.
pub fn decode(version: Version, header: &Header, payload: &[u8]) -> Result<Pdu, RtrError> {
    let pdu_type = PduType::try_from(header.pdu_type)?;

    if let Some(expected) = pdu_type.expected_len(version) {
        if header.length != expected {
            return Err(RtrError::LengthMismatch {
                pdu_type: header.pdu_type,
                expected,
                got: header.length,
            });
        }
    }

    match pdu_type {
        PduType::SerialNotify => {
            let mut buf = payload;
            Ok(Pdu::SerialNotify {
                session_id: header.session,
                serial: buf.get_u32(),
            })
        }
        PduType::CacheResponse => Ok(Pdu::CacheResponse {
            session_id: header.session,
        }),
        PduType::Ipv4Prefix => {
            let mut buf = payload;
            let flags = buf.get_u8();
            let length = buf.get_u8();
            let max_length = buf.get_u8();
            buf.advance(1); // reserved, must be ignored
            let mut addr = [0u8; 4];
            buf.copy_to_slice(&mut addr);
            let asn = buf.get_u32();
            check_prefix_bounds(length, max_length, 32)?;
            Ok(Pdu::Prefix(Prefix {
                announcement: flags & 0x1 == 1,
                address: IpAddr::V4(Ipv4Addr::from(addr)),
                length,
                max_length,
                asn,
            }))
        }
        PduType::Ipv6Prefix => {
            let mut buf = payload;
            let flags = buf.get_u8();
            let length = buf.get_u8();
            let max_length = buf.get_u8();
            buf.advance(1);
            let mut addr = [0u8; 16];
            buf.copy_to_slice(&mut addr);
            let asn = buf.get_u32();
            check_prefix_bounds(length, max_length, 128)?;
            Ok(Pdu::Prefix(Prefix {
                announcement: flags & 0x1 == 1,
                address: IpAddr::V6(Ipv6Addr::from(addr)),
                length,
                max_length,
                asn,
            }))
        }
        PduType::EndOfData => {
            let mut buf = payload;
            let serial = buf.get_u32();
            let timers = match version {
                Version::V0 => None,
                Version::V1 => Some(EodTimers {
                    refresh: buf.get_u32(),
                    retry: buf.get_u32(),
                    expire: buf.get_u32(),
                }),
            };
            Ok(Pdu::EndOfData {
                session_id: header.session,
                serial,
                timers,
            })
        }
        PduType::CacheReset => Ok(Pdu::CacheReset),
        PduType::RouterKey => {
            if version == Version::V0 {
                return Err(RtrError::RouterKeyVersion);
            }
            Ok(Pdu::RouterKey)
        }
        PduType::ErrorReport => decode_error_report(header, payload),
        PduType::SerialQuery | PduType::ResetQuery => {
            Err(RtrError::UnexpectedPduType(header.pdu_type))
        }
    }
}

/// Error Report payload: erroneous_pdu_len(4), erroneous_pdu, text_len(4),
/// text. Both nested lengths are validated before slicing.
fn decode_error_report(header: &Header, payload: &[u8]) -> Result<Pdu, RtrError> {
    if payload.len() < 4 {
        return Err(RtrError::MalformedErrorReport);
    }
    let pdu_len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let text_len_at = 4usize
        .checked_add(pdu_len)
        .ok_or(RtrError::MalformedErrorReport)?;
    let text_at = text_len_at
        .checked_add(4)
        .ok_or(RtrError::MalformedErrorReport)?;
    if payload.len() < text_at {
        return Err(RtrError::MalformedErrorReport);
    }
    let text_len = u32::from_be_bytes([
        payload[text_len_at],
        payload[text_len_at + 1],
        payload[text_len_at + 2],
        payload[text_len_at + 3],
    ]) as usize;
    let end = text_at
        .checked_add(text_len)
        .ok_or(RtrError::MalformedErrorReport)?;
    if payload.len() < end {
        return Err(RtrError::MalformedErrorReport);
    }
    let text = String::from_utf8_lossy(&payload[text_at..end]).into_owned();
    Ok(Pdu::ErrorReport {
        code: header.session,
        text,
    })
}

fn check_prefix_bounds(length: u8, max_length: u8, width: u8) -> Result<(), RtrError> {
    if length > max_length || max_length > width {
        return Err(RtrError::InvalidPrefix { length, max_length });
    }
    Ok(())
}
