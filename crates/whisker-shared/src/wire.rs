//! Discovery wire formats.
//!
//! LAN beacon: `me0w:<32 raw public-key bytes>:<decimal port>`, one UDP
//! datagram per beacon, trailing NULs trimmed before parsing.
//!
//! BLE metadata payload: `<32 raw public-key bytes>|<decimal port>`, read
//! from the metadata characteristic or embedded in advertisement data.
//!
//! Both embed the raw key between ASCII delimiters, so a key byte equal to
//! the delimiter makes the field count wrong and the datagram is dropped.
//! The format is kept for compatibility; a v2 beacon should hex-encode the
//! key.

use crate::constants::{BEACON_TAG, PUBKEY_SIZE};
use crate::error::DecodeError;

/// Encode the beacon body broadcast on the multicast group.
pub fn encode_beacon(public_key: &[u8; PUBKEY_SIZE], port: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(BEACON_TAG.len() + 1 + PUBKEY_SIZE + 1 + port.len());
    out.extend_from_slice(BEACON_TAG);
    out.push(b':');
    out.extend_from_slice(public_key);
    out.push(b':');
    out.extend_from_slice(port.as_bytes());
    out
}

/// Parse a beacon datagram into `(public_key, port)`.
pub fn parse_beacon(datagram: &[u8]) -> Result<([u8; PUBKEY_SIZE], String), DecodeError> {
    let trimmed = trim_trailing_nuls(datagram);
    let fields: Vec<&[u8]> = trimmed.split(|&b| b == b':').collect();
    if fields.len() != 3 {
        return Err(DecodeError::BadBeacon);
    }
    if fields[0] != BEACON_TAG {
        return Err(DecodeError::BadBeacon);
    }
    let key = key_from_field(fields[1])?;
    let port = port_from_field(fields[2])?;
    Ok((key, port))
}

/// Encode the BLE metadata characteristic value.
pub fn encode_ble_metadata(public_key: &[u8; PUBKEY_SIZE], port: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(PUBKEY_SIZE + 1 + port.len());
    out.extend_from_slice(public_key);
    out.push(b'|');
    out.extend_from_slice(port.as_bytes());
    out
}

/// Parse a BLE metadata payload into `(public_key, port)`.
pub fn parse_ble_metadata(payload: &[u8]) -> Result<([u8; PUBKEY_SIZE], String), DecodeError> {
    let fields: Vec<&[u8]> = payload.split(|&b| b == b'|').collect();
    if fields.len() != 2 {
        return Err(DecodeError::BadMetadata);
    }
    let key = key_from_field(fields[0])?;
    let port = port_from_field(fields[1])?;
    Ok((key, port))
}

fn trim_trailing_nuls(buf: &[u8]) -> &[u8] {
    let end = buf
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    &buf[..end]
}

fn key_from_field(field: &[u8]) -> Result<[u8; PUBKEY_SIZE], DecodeError> {
    if field.len() != PUBKEY_SIZE {
        return Err(DecodeError::KeyLength(field.len()));
    }
    let mut key = [0u8; PUBKEY_SIZE];
    key.copy_from_slice(field);
    Ok(key)
}

fn port_from_field(field: &[u8]) -> Result<String, DecodeError> {
    let port = std::str::from_utf8(field).map_err(|_| DecodeError::BadPort)?;
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::BadPort);
    }
    port.parse::<u16>().map_err(|_| DecodeError::BadPort)?;
    Ok(port.to_string())
}
