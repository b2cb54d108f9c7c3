//! # Packet Framing State Machine
//!
//! A [`Packet`] accumulates raw bytes from the radio, classifies the link
//! mode and frame format, and runs the decode → sanity → CRC-trim pipeline
//! that turns an on-air burst into a clean DLL payload ([`Frame`]).
//!
//! The pipeline runs exactly once per packet. On failure it records a
//! [`DropReason`] together with the want/got lengths and a bounded raw hex
//! capture, which the dispatcher turns into per-packet diagnostics.

use std::mem;

use chrono::Utc;
use log::trace;

use crate::util::hex::{encode_hex, hex_prefix};
use crate::wmbus::crc::{
    total_len_format_a, total_len_format_b, trim_dll_crc_format_a, trim_dll_crc_format_b,
};
use crate::wmbus::link_mode::{FrameFormat, LinkMode};
use crate::wmbus::threeofsix::{self, DecodeStats};

/// Bytes read up-front to size the rest of the burst.
pub const PREAMBLE_SIZE: usize = 3;

/// C-mode second preamble byte selecting Format A.
const FORMAT_A_PREAMBLE: u8 = 0xCD;
/// C-mode second preamble byte selecting Format B.
const FORMAT_B_PREAMBLE: u8 = 0x3D;
/// C-mode prefix length erased before DLL processing.
const MODE_C_PREFIX_LEN: usize = 2;

/// Noise gates: shorter bursts cannot hold a minimal frame.
const MIN_RAW_LEN_T1: usize = 60;
const MIN_RAW_LEN_C1: usize = 16;

/// Accepted range for `L + 1`.
const MIN_WANT_LEN: usize = 12;
const MAX_WANT_LEN: usize = 260;

/// Bytes captured for the `raw` diagnostics field.
const RAW_HEX_MAX_BYTES: usize = 256;

/// How many raw T1 bytes to decode when peeking at the L-field.
const L_FIELD_PEEK_BYTES: usize = 18;

/// Why a packet was discarded. The string tags are stable: diagnostics
/// dashboards bucket on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    TooShort,
    DecodeFailed,
    DllCrcFailed,
    UnknownPreamble,
    LFieldInvalid,
    UnknownLinkMode,
    Truncated,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::TooShort => "too_short",
            DropReason::DecodeFailed => "decode_failed",
            DropReason::DllCrcFailed => "dll_crc_failed",
            DropReason::UnknownPreamble => "unknown_preamble",
            DropReason::LFieldInvalid => "l_field_invalid",
            DropReason::UnknownLinkMode => "unknown_link_mode",
            DropReason::Truncated => "truncated",
        }
    }
}

/// Raw byte accumulator and conversion state for one received burst.
///
/// Built by the receiver, consumed exactly once by the dispatcher. After
/// [`Packet::convert_to_frame`] the packet is terminal: it either yielded a
/// [`Frame`] or carries a drop reason for post-mortem.
#[derive(Debug, Default)]
pub struct Packet {
    bytes: Vec<u8>,
    rssi: i8,
    link_mode: LinkMode,
    frame_format: Option<FrameFormat>,
    expected_size: usize,

    truncated: bool,
    want_len: usize,
    got_len: usize,
    raw_got_len: usize,
    drop_reason: Option<DropReason>,
    raw_hex: String,
    t1_symbols: DecodeStats,
}

impl Packet {
    pub fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(PREAMBLE_SIZE),
            ..Self::default()
        }
    }

    /// Reserve `len` bytes at the tail and return the writable region.
    ///
    /// The caller fills it from the radio FIFO; no validation happens here.
    pub fn append_space(&mut self, len: usize) -> &mut [u8] {
        let old = self.bytes.len();
        self.bytes.resize(old + len, 0);
        &mut self.bytes[old..]
    }

    pub fn set_rssi(&mut self, rssi: i8) {
        self.rssi = rssi;
    }

    pub fn rssi(&self) -> i8 {
        self.rssi
    }

    /// Classify from the first raw byte; cached after first call.
    ///
    /// Valid while the buffer fills front-to-back; the conversion pipeline
    /// classifies before any mutation and never reclassifies afterwards.
    pub fn link_mode(&mut self) -> LinkMode {
        if self.link_mode == LinkMode::Unknown {
            if let Some(&first) = self.bytes.first() {
                self.link_mode = LinkMode::from_first_byte(first);
            }
        }
        self.link_mode
    }

    /// Best-effort read of the logical L-field while the burst streams in.
    ///
    /// Returns 0 when not yet determinable.
    pub fn l_field(&mut self) -> u8 {
        match self.link_mode() {
            LinkMode::C1 => self.bytes.get(2).copied().unwrap_or(0),
            LinkMode::T1 => {
                let prefix = &self.bytes[..self.bytes.len().min(L_FIELD_PEEK_BYTES)];
                let mut stats = DecodeStats::default();
                threeofsix::decode(prefix, &mut stats)
                    .and_then(|decoded| decoded.first().copied())
                    .unwrap_or(0)
            }
            LinkMode::Unknown => 0,
        }
    }

    /// Full on-wire burst length implied by the preamble, or 0 when the
    /// preamble is insufficient. Cached once computed.
    pub fn expected_size(&mut self) -> usize {
        if self.bytes.len() < PREAMBLE_SIZE {
            return 0;
        }
        if self.expected_size == 0 {
            let l_field = self.l_field();
            if l_field == 0 {
                return 0;
            }
            self.expected_size = match self.link_mode() {
                LinkMode::T1 => threeofsix::encoded_size(total_len_format_a(l_field)),
                LinkMode::C1 => match self.bytes[1] {
                    FORMAT_A_PREAMBLE => MODE_C_PREFIX_LEN + total_len_format_a(l_field),
                    FORMAT_B_PREAMBLE => MODE_C_PREFIX_LEN + total_len_format_b(l_field),
                    _ => 0,
                },
                LinkMode::Unknown => 0,
            };
            trace!("expected_size: {}", self.expected_size);
        }
        self.expected_size
    }

    /// Run the conversion pipeline: classify, decode (T1), L-field sanity,
    /// trim to the expected length, validate and strip the block CRCs.
    ///
    /// Returns the clean frame, or `None` with the drop reason and the
    /// want/got/raw lengths populated for diagnostics.
    pub fn convert_to_frame(&mut self) -> Option<Frame> {
        self.truncated = false;
        self.want_len = 0;
        self.got_len = 0;
        self.raw_got_len = self.bytes.len();
        self.drop_reason = None;
        self.raw_hex = hex_prefix(&self.bytes, RAW_HEX_MAX_BYTES);

        let link_mode = self.link_mode();
        match self.run_pipeline(link_mode) {
            Ok(format) => Some(Frame {
                bytes: mem::take(&mut self.bytes),
                link_mode,
                format,
                rssi: self.rssi,
                handlers_count: 0,
            }),
            Err(reason) => {
                self.truncated = reason == DropReason::Truncated;
                self.drop_reason = Some(reason);
                None
            }
        }
    }

    fn run_pipeline(&mut self, link_mode: LinkMode) -> Result<FrameFormat, DropReason> {
        match link_mode {
            LinkMode::T1 => self.convert_t1(),
            LinkMode::C1 => self.convert_c1(),
            LinkMode::Unknown => Err(DropReason::UnknownLinkMode),
        }
    }

    fn convert_t1(&mut self) -> Result<FrameFormat, DropReason> {
        if self.bytes.len() < MIN_RAW_LEN_T1 {
            return Err(DropReason::TooShort);
        }
        // Format B T1 frames exist in the wild but the meters this targets
        // only send Format A; a wrong guess fails the CRC trim below.
        let format = FrameFormat::A;
        self.frame_format = Some(format);

        let mut stats = DecodeStats::default();
        let decoded = threeofsix::decode(&self.bytes, &mut stats);
        self.t1_symbols = stats;
        let decoded = decoded
            .filter(|d| d.len() >= 2)
            .ok_or(DropReason::DecodeFailed)?;
        self.bytes = decoded;

        self.sanity_and_trim(format)
    }

    fn convert_c1(&mut self) -> Result<FrameFormat, DropReason> {
        if self.bytes.len() < MIN_RAW_LEN_C1 {
            return Err(DropReason::TooShort);
        }
        let format = match self.bytes[1] {
            FORMAT_A_PREAMBLE => FrameFormat::A,
            FORMAT_B_PREAMBLE => FrameFormat::B,
            _ => return Err(DropReason::UnknownPreamble),
        };
        self.frame_format = Some(format);
        self.bytes.drain(..MODE_C_PREFIX_LEN);

        self.sanity_and_trim(format)
    }

    fn sanity_and_trim(&mut self, format: FrameFormat) -> Result<FrameFormat, DropReason> {
        let l_field = self.bytes[0];
        let want = l_field as usize + 1;
        let need_total = match format {
            FrameFormat::A => total_len_format_a(l_field),
            FrameFormat::B => total_len_format_b(l_field),
        };
        self.want_len = need_total;
        self.got_len = self.bytes.len();

        if !(MIN_WANT_LEN..=MAX_WANT_LEN).contains(&want) {
            return Err(DropReason::LFieldInvalid);
        }
        if self.bytes.len() < need_total {
            return Err(DropReason::Truncated);
        }
        // The radio may over-read past the frame end.
        self.bytes.truncate(need_total);

        let crc_ok = match format {
            FrameFormat::A => trim_dll_crc_format_a(&mut self.bytes),
            FrameFormat::B => trim_dll_crc_format_b(&mut self.bytes),
        };
        if crc_ok {
            Ok(format)
        } else {
            Err(DropReason::DllCrcFailed)
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Expected on-wire length of the classified frame (set by conversion).
    pub fn want_len(&self) -> usize {
        self.want_len
    }

    /// Length available at the sanity check (after T1 decode / prefix strip).
    pub fn got_len(&self) -> usize {
        self.got_len
    }

    /// Raw byte count as read from the radio, before any mutation.
    pub fn raw_got_len(&self) -> usize {
        self.raw_got_len
    }

    pub fn drop_reason(&self) -> Option<DropReason> {
        self.drop_reason
    }

    /// Lowercase hex of up to 256 raw bytes, captured before conversion.
    pub fn raw_hex(&self) -> &str {
        &self.raw_hex
    }

    /// 3-of-6 symbol statistics (T1 only; zeros otherwise).
    pub fn t1_symbols(&self) -> DecodeStats {
        self.t1_symbols
    }
}

/// Best-effort DLL header peek used for the ok-path log line.
///
/// Never fails a frame: unparsable fields fall back to placeholder values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DllHeader {
    /// Three-letter manufacturer code, `"???"` when not decodable.
    pub manufacturer: String,
    /// Eight-digit BCD device id, hex fallback when a nibble is not BCD.
    pub device_id: String,
    pub version: u8,
    pub device_type: u8,
    pub control_info: u8,
}

/// Clean DLL payload produced by a successful conversion.
#[derive(Debug)]
pub struct Frame {
    bytes: Vec<u8>,
    link_mode: LinkMode,
    format: FrameFormat,
    rssi: i8,
    handlers_count: u8,
}

impl Frame {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn link_mode(&self) -> LinkMode {
        self.link_mode
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn rssi(&self) -> i8 {
        self.rssi
    }

    pub fn as_raw(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    pub fn as_hex(&self) -> String {
        encode_hex(&self.bytes)
    }

    /// Render the frame as an `rtl_wmbus` output line.
    pub fn as_rtlwmbus(&self) -> String {
        format!(
            "{};1;1;{};{};;;0x{}\n",
            self.link_mode.name(),
            Utc::now().format("%Y-%m-%d %H:%M:%S.00Z"),
            self.rssi,
            self.as_hex()
        )
    }

    /// Called by a handler that claimed this frame.
    pub fn mark_as_handled(&mut self) {
        self.handlers_count += 1;
    }

    pub fn handlers_count(&self) -> u8 {
        self.handlers_count
    }

    /// Peek at the DLL header fields for logging.
    pub fn dll_header(&self) -> Option<DllHeader> {
        let d = &self.bytes;
        // With the L-field stored, d[0] + 1 == len; without it the C-field
        // leads. Both layouts are accepted.
        let base = if d.len() >= 10 && d[0] as usize + 1 == d.len() {
            1
        } else if d.len() >= 9 {
            0
        } else {
            return None;
        };
        if d.len() < base + 10 {
            return None;
        }

        let m_field = u16::from_le_bytes([d[base + 1], d[base + 2]]);
        let manufacturer = decode_manufacturer(m_field);

        let id = &d[base + 3..base + 7];
        let device_id = if id.iter().all(|&b| is_bcd(b)) {
            format!("{:02x}{:02x}{:02x}{:02x}", id[3], id[2], id[1], id[0])
        } else {
            format!("{:02X}{:02X}{:02X}{:02X}", id[3], id[2], id[1], id[0])
        };

        Some(DllHeader {
            manufacturer,
            device_id,
            version: d[base + 7],
            device_type: d[base + 8],
            control_info: d[base + 9],
        })
    }
}

fn is_bcd(byte: u8) -> bool {
    (byte & 0x0F) <= 9 && (byte >> 4) <= 9
}

/// Unpack the 15-bit M-field into three letters; `"???"` when any falls
/// outside A-Z.
fn decode_manufacturer(m_field: u16) -> String {
    let letters = [
        (((m_field >> 10) & 0x1F) as u8 + 64) as char,
        (((m_field >> 5) & 0x1F) as u8 + 64) as char,
        ((m_field & 0x1F) as u8 + 64) as char,
    ];
    if letters.iter().all(|c| c.is_ascii_uppercase()) {
        letters.iter().collect()
    } else {
        "???".to_string()
    }
}
