//! NDEF URI record codec and Type 2 TLV framing
//!
//! Constants follow the NFC Forum URI Record Type Definition (RTD-URI 1.0)
//! and the Type 2 Tag Operation specification.

use std::ops::Range;

use log::debug;

use crate::types::{TagError, UriRecord};

/// URI identifier codes, indexed by code (0x00..=0x23)
pub const URI_PREFIXES: [&str; 36] = [
    "",
    "http://www.",
    "https://www.",
    "http://",
    "https://",
    "tel:",
    "mailto:",
    "ftp://anonymous:anonymous@",
    "ftp://ftp.",
    "ftps://",
    "sftp://",
    "smb://",
    "nfs://",
    "ftp://",
    "dav://",
    "news:",
    "telnet://",
    "imap:",
    "rtsp://",
    "urn:",
    "pop:",
    "sip:",
    "sips:",
    "tftp:",
    "btspp://",
    "btl2cap://",
    "btgoep://",
    "tcpobex://",
    "irdaobex://",
    "file://",
    "urn:epc:id:",
    "urn:epc:tag:",
    "urn:epc:pat:",
    "urn:epc:raw:",
    "urn:epc:",
    "urn:nfc:",
];

// TLV block types
pub const TLV_NULL: u8 = 0x00;
pub const TLV_LOCK_CONTROL: u8 = 0x01;
pub const TLV_MEMORY_CONTROL: u8 = 0x02;
pub const TLV_NDEF: u8 = 0x03;
pub const TLV_PROPRIETARY: u8 = 0xFD;
pub const TLV_TERMINATOR: u8 = 0xFE;

// Record header flags
const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;
const TNF_EMPTY: u8 = 0x00;
const TNF_WELL_KNOWN: u8 = 0x01;

const URI_TYPE: &[u8] = b"U";
const MAX_TLV_LEN: usize = 0xFFFE;

/// A URI record framed in an NDEF TLV, ready for tag memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    pub record: UriRecord,
    bytes: Vec<u8>,
}

impl EncodedRecord {
    /// TLV bytes: type, length field, NDEF message
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Position of the TLV length field within `bytes()`
    pub fn length_field(&self) -> Range<usize> {
        if self.bytes.get(1) == Some(&0xFF) { 1..4 } else { 1..2 }
    }
}

/// Pick the longest matching abbreviation
pub fn best_prefix(uri: &str) -> (u8, &str) {
    URI_PREFIXES
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, prefix)| uri.starts_with(*prefix))
        .max_by_key(|(_, prefix)| prefix.len())
        .map(|(code, prefix)| (code as u8, &uri[prefix.len()..]))
        .unwrap_or((0, uri))
}

/// Encode `uri` as a single-record NDEF message inside an NDEF TLV.
///
/// `capacity` is the number of data-area bytes available to the TLV; the
/// terminator TLV is not counted since it may be omitted on a full tag.
pub fn encode_uri(uri: &str, capacity: usize) -> Result<EncodedRecord, TagError> {
    if uri.is_empty() {
        return Err(TagError::InvalidParameter("URI must not be empty".into()));
    }

    let (code, rest) = best_prefix(uri);
    let payload_len = 1 + rest.len();

    let mut record = Vec::with_capacity(payload_len + 7);
    if payload_len <= 0xFF {
        record.extend_from_slice(&[FLAG_MB | FLAG_ME | FLAG_SR | TNF_WELL_KNOWN, URI_TYPE.len() as u8]);
        record.push(payload_len as u8);
    } else {
        record.extend_from_slice(&[FLAG_MB | FLAG_ME | TNF_WELL_KNOWN, URI_TYPE.len() as u8]);
        record.extend_from_slice(&(payload_len as u32).to_be_bytes());
    }
    record.extend_from_slice(URI_TYPE);
    record.push(code);
    record.extend_from_slice(rest.as_bytes());

    let needed = record.len() + if record.len() < 0xFF { 2 } else { 4 };
    if record.len() > MAX_TLV_LEN || needed > capacity {
        return Err(TagError::TooLarge { needed, capacity });
    }

    let mut bytes = Vec::with_capacity(needed);
    bytes.push(TLV_NDEF);
    if record.len() < 0xFF {
        bytes.push(record.len() as u8);
    } else {
        bytes.push(0xFF);
        bytes.extend_from_slice(&(record.len() as u16).to_be_bytes());
    }
    bytes.extend_from_slice(&record);

    debug!("Encoded {} with prefix 0x{:02X} into {} bytes", uri, code, bytes.len());
    Ok(EncodedRecord {
        record: UriRecord {
            uri: uri.to_string(),
            prefix_code: code,
        },
        bytes,
    })
}

/// TLV structure found at the start of a Type 2 data area
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvLayout {
    /// Offset of the first byte after the control TLVs (where the NDEF TLV starts)
    pub controls_end: usize,
    /// Value of the first Lock Control TLV
    pub lock_control: Option<[u8; 3]>,
    /// Value range of the NDEF TLV
    pub message: Option<Range<usize>>,
    /// False when `raw` ends before the structure does
    pub complete: bool,
}

/// Walk the TLV blocks of a (possibly partial) data area.
///
/// NULL padding only counts toward `controls_end` when it precedes a control
/// or NDEF TLV, so a zeroed data area has no controls to preserve.
pub fn scan_tlvs(raw: &[u8]) -> Result<TlvLayout, TagError> {
    let mut layout = TlvLayout::default();
    let mut pos = 0;

    while pos < raw.len() {
        let tag = raw[pos];
        match tag {
            TLV_NULL => {
                pos += 1;
                continue;
            }
            TLV_TERMINATOR => {
                layout.complete = true;
                return Ok(layout);
            }
            TLV_LOCK_CONTROL | TLV_MEMORY_CONTROL | TLV_NDEF | TLV_PROPRIETARY => {}
            other => {
                return Err(TagError::MalformedRecord(format!(
                    "Unknown TLV type 0x{:02X} at offset {}",
                    other, pos
                )));
            }
        }

        let Some((len, header)) = read_tlv_length(&raw[pos + 1..]) else {
            return Ok(layout);
        };
        let value = pos + 1 + header..pos + 1 + header + len;

        if tag == TLV_NDEF {
            layout.controls_end = pos;
            layout.complete = value.end <= raw.len();
            layout.message = Some(value);
            return Ok(layout);
        }
        if tag == TLV_LOCK_CONTROL && layout.lock_control.is_none() {
            if let Some(v) = raw.get(value.clone()).and_then(|v| <[u8; 3]>::try_from(v).ok()) {
                layout.lock_control = Some(v);
            }
        }
        pos = value.end;
        layout.controls_end = pos.min(raw.len());
    }

    Ok(layout)
}

fn read_tlv_length(bytes: &[u8]) -> Option<(usize, usize)> {
    match bytes {
        [0xFF, hi, lo, ..] => Some((u16::from_be_bytes([*hi, *lo]) as usize, 3)),
        [0xFF, ..] | [] => None,
        [len, ..] => Some((*len as usize, 1)),
    }
}

/// Decode the URI stored in a Type 2 data area (bytes from page 4 onwards).
pub fn decode_uri(raw: &[u8]) -> Result<UriRecord, TagError> {
    let layout = scan_tlvs(raw)?;
    let Some(range) = layout.message else {
        return Err(TagError::EmptyTag);
    };
    if !layout.complete {
        return Err(TagError::MalformedRecord(format!(
            "NDEF TLV declares {} bytes but only {} are available",
            range.len(),
            raw.len().saturating_sub(range.start)
        )));
    }
    if range.is_empty() {
        return Err(TagError::EmptyTag);
    }
    decode_message(&raw[range])
}

struct Record<'a> {
    header: u8,
    record_type: &'a [u8],
    payload: &'a [u8],
    consumed: usize,
}

fn parse_record(bytes: &[u8]) -> Result<Record<'_>, TagError> {
    let truncated = || TagError::MalformedRecord("Record header truncated".into());

    let header = *bytes.first().ok_or_else(truncated)?;
    if header & FLAG_CF != 0 {
        return Err(TagError::UnsupportedRecord("chunked records".into()));
    }
    let type_len = *bytes.get(1).ok_or_else(truncated)? as usize;

    let mut pos = 2;
    let payload_len = if header & FLAG_SR != 0 {
        let len = *bytes.get(pos).ok_or_else(truncated)? as usize;
        pos += 1;
        len
    } else {
        let len = bytes.get(pos..pos + 4).ok_or_else(truncated)?;
        pos += 4;
        u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize
    };
    let id_len = if header & FLAG_IL != 0 {
        let len = *bytes.get(pos).ok_or_else(truncated)? as usize;
        pos += 1;
        len
    } else {
        0
    };

    let type_end = pos + type_len;
    let payload_start = type_end + id_len;
    let payload_end = payload_start
        .checked_add(payload_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| {
            TagError::MalformedRecord(format!(
                "Payload of {} bytes overruns the message",
                payload_len
            ))
        })?;

    Ok(Record {
        header,
        record_type: &bytes[pos..type_end],
        payload: &bytes[payload_start..payload_end],
        consumed: payload_end,
    })
}

fn decode_message(message: &[u8]) -> Result<UriRecord, TagError> {
    let mut pos = 0;
    let mut first = true;

    while pos < message.len() {
        let record = parse_record(&message[pos..])?;
        let tnf = record.header & TNF_MASK;

        if first && record.header & FLAG_MB == 0 {
            return Err(TagError::MalformedRecord("First record lacks the MB flag".into()));
        }
        if first && tnf == TNF_EMPTY {
            return Err(TagError::EmptyTag);
        }
        if tnf == TNF_WELL_KNOWN && record.record_type == URI_TYPE {
            return decode_payload(record.payload);
        }

        first = false;
        pos += record.consumed;
        if record.header & FLAG_ME != 0 {
            break;
        }
    }

    Err(TagError::UnsupportedRecord("message holds no URI record".into()))
}

fn decode_payload(payload: &[u8]) -> Result<UriRecord, TagError> {
    let Some((&code, rest)) = payload.split_first() else {
        return Err(TagError::MalformedRecord("URI payload is empty".into()));
    };
    let prefix = URI_PREFIXES.get(code as usize).ok_or_else(|| {
        TagError::MalformedRecord(format!("Reserved URI identifier code 0x{:02X}", code))
    })?;
    let rest = std::str::from_utf8(rest)
        .map_err(|e| TagError::MalformedRecord(format!("URI is not UTF-8: {}", e)))?;

    Ok(UriRecord {
        uri: format!("{}{}", prefix, rest),
        prefix_code: code,
    })
}

/// Prepend `https://` to input that carries no scheme.
///
/// `example.com/x` becomes `https://example.com/x`; `tel:+123` and
/// `mailto:a@b` are left alone. `localhost:8080` reads as host and port and
/// gets the scheme as well.
pub fn normalize_uri(input: &str) -> String {
    let input = input.trim();
    if input.is_empty() || has_scheme(input) {
        return input.to_string();
    }
    format!("https://{}", input)
}

fn has_scheme(input: &str) -> bool {
    if best_prefix(input).0 != 0 {
        return true;
    }
    let Some((scheme, rest)) = input.split_once(':') else {
        return false;
    };
    let valid_scheme = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
    let looks_like_port = rest
        .split('/')
        .next()
        .is_some_and(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()));
    valid_scheme && !looks_like_port
}
