//! Runtime decoders for typed terminals.
//!
//! These produce the values of `Variable` productions: fixed-width integers
//! in either byte order, IEEE reals, and network addresses. Failures are
//! [`DecodeError`]s; the driver converts them into parse errors at the field
//! boundary.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::DecodeError;

/// Byte order for multi-byte decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    /// Most significant byte first.
    #[default]
    Big,
    /// Least significant byte first.
    Little,
    /// Network order; an alias for big-endian.
    Network,
    /// The host's native order.
    Host,
}

impl ByteOrder {
    /// Resolves aliases to a concrete order.
    pub fn resolved(self) -> ByteOrder {
        match self {
            ByteOrder::Network => ByteOrder::Big,
            ByteOrder::Host => {
                if cfg!(target_endian = "little") {
                    ByteOrder::Little
                } else {
                    ByteOrder::Big
                }
            }
            other => other,
        }
    }
}

fn take<'a>(data: &'a [u8], width: usize) -> Result<&'a [u8], DecodeError> {
    if !(1..=8).contains(&width) {
        return Err(DecodeError::InvalidArgument(format!(
            "unsupported integer width {width}"
        )));
    }

    data.get(..width).ok_or(DecodeError::OutOfRange {
        need: width,
        have: data.len(),
    })
}

/// Decodes an unsigned integer of `width` bytes.
pub fn uint(data: &[u8], width: usize, order: ByteOrder) -> Result<u64, DecodeError> {
    let bytes = take(data, width)?;
    let mut v: u64 = 0;

    match order.resolved() {
        ByteOrder::Big => {
            for b in bytes {
                v = (v << 8) | u64::from(*b);
            }
        }
        _ => {
            for b in bytes.iter().rev() {
                v = (v << 8) | u64::from(*b);
            }
        }
    }

    Ok(v)
}

/// Decodes a signed integer of `width` bytes (two's complement).
pub fn sint(data: &[u8], width: usize, order: ByteOrder) -> Result<i64, DecodeError> {
    let raw = uint(data, width, order)?;
    let shift = 64 - width as u32 * 8;
    // Sign-extend by shifting up and arithmetically back down.
    Ok(((raw << shift) as i64) >> shift)
}

/// Decodes a 32-bit IEEE real.
pub fn real32(data: &[u8], order: ByteOrder) -> Result<f64, DecodeError> {
    let raw = uint(data, 4, order)? as u32;
    Ok(f64::from(f32::from_bits(raw)))
}

/// Decodes a 64-bit IEEE real.
pub fn real64(data: &[u8], order: ByteOrder) -> Result<f64, DecodeError> {
    let raw = uint(data, 8, order)?;
    Ok(f64::from_bits(raw))
}

/// Decodes an IPv4 address (network order).
pub fn addr_v4(data: &[u8]) -> Result<IpAddr, DecodeError> {
    let raw = uint(data, 4, ByteOrder::Network)? as u32;
    Ok(IpAddr::V4(Ipv4Addr::from_bits(raw)))
}

/// Decodes an IPv6 address.
pub fn addr_v6(data: &[u8]) -> Result<IpAddr, DecodeError> {
    if data.len() < 16 {
        return Err(DecodeError::OutOfRange {
            need: 16,
            have: data.len(),
        });
    }

    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[..16]);
    Ok(IpAddr::V6(Ipv6Addr::from(octets)))
}
