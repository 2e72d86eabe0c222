//! Minimal NTP wire format: the fixed 48-byte client request and the
//! transmit-timestamp field of a server response.

/// Size of an NTP record on the wire.
pub const PACKET_LEN: usize = 48;

/// First request byte: leap indicator 0, version 3, mode 3 (client).
pub const CLIENT_REQUEST_HEADER: u8 = 0x1B;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
pub const NTP_TO_UNIX_OFFSET: i64 = 2_208_988_800;

/// Byte offset of the transmit-timestamp seconds field in a response.
const TRANSMIT_SECONDS_OFFSET: usize = 40;

/// Builds a 48-byte client request: header byte set, every other field zero.
#[must_use]
pub const fn client_request() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CLIENT_REQUEST_HEADER;
    packet
}

/// Extracts the transmit-timestamp seconds from a response.
///
/// Returns `None` unless `payload` is exactly [`PACKET_LEN`] bytes. A record
/// of any other length is rejected without being parsed.
#[must_use]
pub fn transmit_seconds(payload: &[u8]) -> Option<u32> {
    if payload.len() != PACKET_LEN {
        return None;
    }
    let bytes = payload.get(TRANSMIT_SECONDS_OFFSET..TRANSMIT_SECONDS_OFFSET + 4)?;
    let bytes: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Converts NTP seconds (1900 epoch) to Unix seconds (1970 epoch).
#[must_use]
pub const fn to_unix_seconds(ntp_seconds: u32) -> i64 {
    ntp_seconds as i64 - NTP_TO_UNIX_OFFSET
}
