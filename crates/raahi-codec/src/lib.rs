//! Fixed-layout binary location codec plus its compact-JSON sibling and
//! content negotiation (§4.2).
//!
//! The wire layout is externally specified (byte offsets, field widths),
//! so it is written by hand with `byteorder` rather than derived with
//! `serde`/`bincode` — the same choice `bradfier-acbc` makes for its
//! binary telemetry protocol.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

pub const STANDARD_LEN: usize = 24;
pub const EXTENDED_LEN: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("truncated frame")]
    Truncated,
}

/// One location sample, decoded from or destined for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub lat: f64,
    pub lng: f64,
    /// Degrees, `[0, 360)`. `None` means the field was absent on the wire.
    pub heading: Option<f64>,
    /// km/h, `>= 0`.
    pub speed: Option<f64>,
    pub timestamp_sec: u32,
    /// Hex-encoded H3 cell index, or `None` if all-zero on the wire.
    pub h3_index: Option<String>,
    /// Only meaningful for the extended (32-byte) layout.
    pub driver_id: Option<String>,
}

fn driver_id_hash(driver_id: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(driver_id.as_bytes());
    hasher.finish()
}

/// Hex-decodes an H3 index string into the first 8 bytes used on the
/// wire. Short indices are zero-padded on the left. `h3o` cell indices
/// are 15 hex digits (odd length), which `hex::decode` rejects outright,
/// so an odd-length input is left-padded with a `0` nibble first.
fn h3_to_8_bytes(h3_index: &str) -> [u8; 8] {
    let padded;
    let even = if h3_index.len() % 2 == 0 {
        h3_index
    } else {
        padded = format!("0{h3_index}");
        &padded
    };
    let mut decoded = hex::decode(even).unwrap_or_default();
    let mut out = [0u8; 8];
    if decoded.len() > 8 {
        decoded.truncate(8);
    }
    let start = 8 - decoded.len();
    out[start..].copy_from_slice(&decoded);
    out
}

/// Inverse of [`h3_to_8_bytes`]. A real H3 cell index fits in 60 bits,
/// so its canonical hex form (as `h3o` prints it) is 15 digits, one
/// short of the 16 a full 8-byte `hex::encode` always produces; the
/// leading `0` nibble that padding introduced is trimmed back off.
fn h3_from_8_bytes(bytes: &[u8; 8]) -> Option<String> {
    if bytes.iter().all(|b| *b == 0) {
        return None;
    }
    let hex = hex::encode(bytes);
    Some(hex.strip_prefix('0').map(str::to_owned).unwrap_or(hex))
}

fn encode_heading(heading: Option<f64>) -> u16 {
    let clamped = heading.unwrap_or(0.0).rem_euclid(360.0);
    (clamped * 100.0).round().clamp(0.0, u16::MAX as f64) as u16
}

fn decode_heading(raw: u16) -> f64 {
    (raw as f64 / 100.0).rem_euclid(360.0)
}

fn encode_speed(speed: Option<f64>) -> u16 {
    let clamped = speed.unwrap_or(0.0).max(0.0);
    (clamped * 100.0).round().clamp(0.0, u16::MAX as f64) as u16
}

fn decode_speed(raw: u16) -> f64 {
    (raw as f64 / 100.0).max(0.0)
}

impl LocationSample {
    pub fn encode_standard(&self) -> [u8; STANDARD_LEN] {
        let mut buf = Cursor::new(Vec::with_capacity(STANDARD_LEN));
        write_standard_body(&mut buf, self);
        let bytes = buf.into_inner();
        let mut out = [0u8; STANDARD_LEN];
        out.copy_from_slice(&bytes);
        out
    }

    pub fn decode_standard(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != STANDARD_LEN {
            return Err(CodecError::WrongLength {
                expected: STANDARD_LEN,
                actual: bytes.len(),
            });
        }
        let mut cursor = Cursor::new(bytes);
        read_standard_body(&mut cursor, None)
    }

    pub fn encode_extended(&self) -> [u8; EXTENDED_LEN] {
        let mut out = [0u8; EXTENDED_LEN];
        let driver_hash = self
            .driver_id
            .as_deref()
            .map(driver_id_hash)
            .unwrap_or(0);
        out[0..8].copy_from_slice(&driver_hash.to_le_bytes());
        out[8..].copy_from_slice(&self.encode_standard());
        out
    }

    pub fn decode_extended(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != EXTENDED_LEN {
            return Err(CodecError::WrongLength {
                expected: EXTENDED_LEN,
                actual: bytes.len(),
            });
        }
        let mut cursor = Cursor::new(&bytes[8..]);
        // The driver-id hash is one-way; the decoded sample carries no
        // recovered driver id unless the caller supplies one separately
        // (the extended layout exists to let a downstream consumer
        // correlate frames by hash, not to smuggle the id itself).
        read_standard_body(&mut cursor, None)
    }

    /// Encodes a batch: `uint16` count header, then `count * 24` bytes
    /// (standard layout per sample).
    pub fn encode_batch(samples: &[Self]) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + samples.len() * STANDARD_LEN);
        out.write_u16::<LittleEndian>(samples.len() as u16).unwrap();
        for sample in samples {
            out.extend_from_slice(&sample.encode_standard());
        }
        out
    }

    pub fn decode_batch(bytes: &[u8]) -> Result<Vec<Self>, CodecError> {
        if bytes.len() < 2 {
            return Err(CodecError::Truncated);
        }
        let mut cursor = Cursor::new(bytes);
        let count = cursor.read_u16::<LittleEndian>().unwrap() as usize;
        let expected_len = 2 + count * STANDARD_LEN;
        if bytes.len() != expected_len {
            return Err(CodecError::WrongLength {
                expected: expected_len,
                actual: bytes.len(),
            });
        }
        (0..count)
            .map(|_| read_standard_body(&mut cursor, None))
            .collect()
    }
}

fn write_standard_body(buf: &mut Cursor<Vec<u8>>, sample: &LocationSample) {
    buf.write_f32::<LittleEndian>(sample.lat as f32).unwrap();
    buf.write_f32::<LittleEndian>(sample.lng as f32).unwrap();
    buf.write_u16::<LittleEndian>(encode_heading(sample.heading))
        .unwrap();
    buf.write_u16::<LittleEndian>(encode_speed(sample.speed))
        .unwrap();
    buf.write_u32::<LittleEndian>(sample.timestamp_sec).unwrap();
    let h3_bytes = sample
        .h3_index
        .as_deref()
        .map(h3_to_8_bytes)
        .unwrap_or([0u8; 8]);
    buf.write_all(&h3_bytes).unwrap();
}

fn read_standard_body(
    cursor: &mut Cursor<impl AsRef<[u8]>>,
    driver_id: Option<String>,
) -> Result<LocationSample, CodecError> {
    let lat = cursor
        .read_f32::<LittleEndian>()
        .map_err(|_| CodecError::Truncated)? as f64;
    let lng = cursor
        .read_f32::<LittleEndian>()
        .map_err(|_| CodecError::Truncated)? as f64;
    let heading_raw = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| CodecError::Truncated)?;
    let speed_raw = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| CodecError::Truncated)?;
    let timestamp_sec = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| CodecError::Truncated)?;
    let mut h3_bytes = [0u8; 8];
    cursor
        .read_exact(&mut h3_bytes)
        .map_err(|_| CodecError::Truncated)?;

    Ok(LocationSample {
        lat,
        lng,
        heading: Some(decode_heading(heading_raw)),
        speed: Some(decode_speed(speed_raw)),
        timestamp_sec,
        h3_index: h3_from_8_bytes(&h3_bytes),
        driver_id,
    })
}

/// `CompactJSON` — single-letter keys, coordinates rounded to 6 decimals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactLocation {
    pub a: f64,
    pub o: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<f64>,
    pub t: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

impl From<&LocationSample> for CompactLocation {
    fn from(sample: &LocationSample) -> Self {
        Self {
            a: round6(sample.lat),
            o: round6(sample.lng),
            h: sample.heading,
            s: sample.speed,
            t: sample.timestamp_sec,
            x: sample.h3_index.clone(),
            d: sample.driver_id.clone(),
        }
    }
}

impl From<CompactLocation> for LocationSample {
    fn from(compact: CompactLocation) -> Self {
        Self {
            lat: compact.a,
            lng: compact.o,
            heading: compact.h,
            speed: compact.s,
            timestamp_sec: compact.t,
            h3_index: compact.x,
            driver_id: compact.d,
        }
    }
}

/// Content negotiation for `/location/binary` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Binary,
    CompactJson,
    Json,
}

impl WireFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            WireFormat::Binary => "application/octet-stream",
            WireFormat::CompactJson => "application/x-raahi-compact",
            WireFormat::Json => "application/json",
        }
    }

    /// Negotiates the wire format from an `Accept` header value.
    /// Defaults to standard JSON when the header is absent or unrecognised.
    pub fn negotiate(accept: Option<&str>) -> Self {
        match accept {
            Some(value) if value.contains("application/octet-stream") => WireFormat::Binary,
            Some(value) if value.contains("application/x-raahi-compact") => {
                WireFormat::CompactJson
            }
            _ => WireFormat::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LocationSample {
        LocationSample {
            lat: 28.613900,
            lng: 77.209000,
            heading: Some(187.5),
            speed: Some(42.3),
            timestamp_sec: 1_700_000_000,
            h3_index: Some("8a1fb46622dffff".to_owned()),
            driver_id: Some("driver-42".to_owned()),
        }
    }

    #[test]
    fn standard_round_trip_within_precision() {
        let original = sample();
        let encoded = original.encode_standard();
        assert_eq!(encoded.len(), STANDARD_LEN);
        let decoded = LocationSample::decode_standard(&encoded).unwrap();

        assert!((decoded.lat - original.lat).abs() < 1e-4);
        assert!((decoded.lng - original.lng).abs() < 1e-4);
        assert!((decoded.heading.unwrap() - original.heading.unwrap()).abs() < 0.01);
        assert!((decoded.speed.unwrap() - original.speed.unwrap()).abs() < 0.01);
        assert_eq!(decoded.timestamp_sec, original.timestamp_sec);
        assert_eq!(decoded.h3_index, original.h3_index);
    }

    #[test]
    fn extended_layout_prepends_driver_hash() {
        let original = sample();
        let encoded = original.encode_extended();
        assert_eq!(encoded.len(), EXTENDED_LEN);
        // Same driver id -> same hash prefix.
        let encoded_again = original.encode_extended();
        assert_eq!(encoded[0..8], encoded_again[0..8]);

        let mut other = sample();
        other.driver_id = Some("driver-99".to_owned());
        let encoded_other = other.encode_extended();
        assert_ne!(encoded[0..8], encoded_other[0..8]);

        // Body still decodes like the standard layout.
        let decoded = LocationSample::decode_extended(&encoded).unwrap();
        assert!((decoded.lat - original.lat).abs() < 1e-4);
    }

    #[test]
    fn batch_round_trips_with_order_preserved() {
        let mut samples = vec![];
        for i in 0..5 {
            let mut s = sample();
            s.timestamp_sec += i;
            samples.push(s);
        }
        let batch = LocationSample::encode_batch(&samples);
        let decoded = LocationSample::decode_batch(&batch).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (original, round_tripped) in samples.iter().zip(decoded.iter()) {
            assert_eq!(original.timestamp_sec, round_tripped.timestamp_sec);
        }
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = LocationSample::decode_standard(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            CodecError::WrongLength {
                expected: STANDARD_LEN,
                actual: 10
            }
        );
    }

    #[test]
    fn heading_clamps_into_0_360() {
        let mut s = sample();
        s.heading = Some(-10.0);
        let encoded = s.encode_standard();
        let decoded = LocationSample::decode_standard(&encoded).unwrap();
        assert!(decoded.heading.unwrap() >= 0.0 && decoded.heading.unwrap() < 360.0);
    }

    #[test]
    fn speed_clamps_non_negative() {
        let mut s = sample();
        s.speed = Some(-5.0);
        let encoded = s.encode_standard();
        let decoded = LocationSample::decode_standard(&encoded).unwrap();
        assert!(decoded.speed.unwrap() >= 0.0);
    }

    #[test]
    fn all_zero_h3_bytes_decode_as_absent() {
        let mut s = sample();
        s.h3_index = None;
        let encoded = s.encode_standard();
        let decoded = LocationSample::decode_standard(&encoded).unwrap();
        assert_eq!(decoded.h3_index, None);
    }

    #[test]
    fn compact_json_rounds_to_6_decimals_and_uses_single_letter_keys() {
        let mut s = sample();
        s.lat = 28.61389999999;
        let compact = CompactLocation::from(&s);
        let json = serde_json::to_value(&compact).unwrap();
        assert_eq!(json["a"], serde_json::json!(28.6139));
        assert!(json.get("lat").is_none());
    }

    #[test]
    fn content_negotiation_maps_accept_header() {
        assert_eq!(
            WireFormat::negotiate(Some("application/octet-stream")),
            WireFormat::Binary
        );
        assert_eq!(
            WireFormat::negotiate(Some("application/x-raahi-compact")),
            WireFormat::CompactJson
        );
        assert_eq!(WireFormat::negotiate(Some("application/json")), WireFormat::Json);
        assert_eq!(WireFormat::negotiate(None), WireFormat::Json);
    }
}
