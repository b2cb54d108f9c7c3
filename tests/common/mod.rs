//! Shared helpers for the integration tests: DLL frame builders, a scripted
//! mock transceiver and an in-memory diagnostics publisher.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use wmbus_radio::wmbus::crc::crc16_en13757;
use wmbus_radio::wmbus::threeofsix;
use wmbus_radio::wmbus::{DiagnosticsPublisher, Packet, RadioTransceiver};

/// Clean DLL bytes (L-field first) with a recognizable KAM header and a
/// deterministic filler tail. `l_field + 1` bytes total.
pub fn make_dll_data(l_field: u8) -> Vec<u8> {
    let mut data = vec![
        l_field, 0x44, 0x2D, 0x2C, 0x78, 0x56, 0x34, 0x12, 0x01, 0x07, 0x7A,
    ];
    while data.len() < l_field as usize + 1 {
        data.push((data.len() * 7) as u8);
    }
    data.truncate(l_field as usize + 1);
    data
}

/// Append Format A block CRCs to clean DLL data (`data[0]` is the L-field).
pub fn build_format_a(data: &[u8]) -> Vec<u8> {
    let l_field = data[0];
    assert_eq!(data.len(), l_field as usize + 1, "data must hold L+1 bytes");

    let mut wire = Vec::new();
    let mut offset = 0;
    let mut block_data = 10usize;
    while offset < data.len() {
        let end = (offset + block_data).min(data.len());
        wire.extend_from_slice(&data[offset..end]);
        wire.extend_from_slice(&crc16_en13757(&data[offset..end]).to_be_bytes());
        offset = end;
        block_data = 16;
    }
    wire
}

/// Append Format B CRCs to clean data. The caller must have set `data[0]`
/// to the on-wire L-field (`data.len() + 1` for short frames,
/// `data.len() + 3` for frames with the intermediate CRC).
pub fn build_format_b(data: &[u8]) -> Vec<u8> {
    let l_field = data[0] as usize;
    let mut wire = Vec::new();
    if l_field < 128 {
        assert_eq!(l_field, data.len() + 1);
        wire.extend_from_slice(data);
        wire.extend_from_slice(&crc16_en13757(data).to_be_bytes());
    } else {
        assert_eq!(l_field, data.len() + 3);
        wire.extend_from_slice(&data[..126]);
        wire.extend_from_slice(&crc16_en13757(&data[..126]).to_be_bytes());
        wire.extend_from_slice(&data[126..]);
        wire.extend_from_slice(&crc16_en13757(&data[126..]).to_be_bytes());
    }
    assert_eq!(wire.len(), l_field + 1);
    wire
}

/// Raw C1 burst: mode-C prefix plus the on-wire frame.
pub fn c1_burst(format_preamble: u8, wire: &[u8]) -> Vec<u8> {
    let mut burst = vec![0x54, format_preamble];
    burst.extend_from_slice(wire);
    burst
}

/// Raw T1 burst: the on-wire Format A frame in 3-of-6 line code.
pub fn t1_burst(wire: &[u8]) -> Vec<u8> {
    threeofsix::encode(wire)
}

/// Overwrite the 6-bit symbol at `index` in a 3-of-6 coded buffer.
pub fn set_symbol(coded: &mut [u8], index: usize, value: u8) {
    for k in 0..6 {
        let bit = index * 6 + k;
        let mask = 1u8 << (7 - bit % 8);
        if (value >> (5 - k)) & 1 == 1 {
            coded[bit / 8] |= mask;
        } else {
            coded[bit / 8] &= !mask;
        }
    }
}

/// Build a Packet the way the receiver does: reserve then fill.
pub fn packet_from_bytes(bytes: &[u8], rssi: i8) -> Packet {
    let mut packet = Packet::new();
    packet.append_space(bytes.len()).copy_from_slice(bytes);
    packet.set_rssi(rssi);
    packet
}

#[derive(Debug, Default)]
pub struct MockRadioState {
    pub bursts: VecDeque<Vec<u8>>,
    cursor: usize,
    pub rssi: i8,
    pub restarts: u32,
    pub fail_reads: bool,
    pub notify: Option<Arc<Notify>>,
}

/// Scripted transceiver: serves queued bursts to exact-length reads.
#[derive(Clone, Default)]
pub struct MockRadio {
    pub state: Arc<Mutex<MockRadioState>>,
}

impl MockRadio {
    pub fn new(bursts: Vec<Vec<u8>>, rssi: i8) -> Self {
        let radio = Self::default();
        {
            let mut state = radio.state.lock().unwrap();
            state.bursts = bursts.into();
            state.rssi = rssi;
        }
        radio
    }

    /// Signal the data-available interrupt the receiver waits on.
    pub fn raise_interrupt(&self) {
        let state = self.state.lock().unwrap();
        state
            .notify
            .as_ref()
            .expect("receiver not attached")
            .notify_one();
    }

    pub fn restarts(&self) -> u32 {
        self.state.lock().unwrap().restarts
    }
}

#[async_trait]
impl RadioTransceiver for MockRadio {
    fn restart_rx(&mut self) {
        self.state.lock().unwrap().restarts += 1;
    }

    async fn read(&mut self, buf: &mut [u8]) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.fail_reads {
            return false;
        }
        let cursor = state.cursor;
        let burst = match state.bursts.front() {
            Some(burst) => burst,
            None => return false,
        };
        if burst.len() - cursor < buf.len() {
            return false;
        }
        buf.copy_from_slice(&burst[cursor..cursor + buf.len()]);
        let consumed = cursor + buf.len();
        if consumed == burst.len() {
            state.bursts.pop_front();
            state.cursor = 0;
        } else {
            state.cursor = consumed;
        }
        true
    }

    fn rssi(&self) -> i8 {
        self.state.lock().unwrap().rssi
    }

    fn attach_data_interrupt(&mut self, notify: Arc<Notify>) {
        self.state.lock().unwrap().notify = Some(notify);
    }
}

/// Captures diagnostics publications in memory.
#[derive(Default)]
pub struct MemoryPublisher {
    pub messages: Mutex<Vec<(String, String)>>,
    pub connected: AtomicBool,
}

impl MemoryPublisher {
    pub fn connected() -> Arc<Self> {
        let publisher = Arc::new(Self::default());
        publisher.connected.store(true, Ordering::Relaxed);
        publisher
    }

    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> Vec<(String, String)> {
        std::mem::take(&mut self.messages.lock().unwrap())
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| serde_json::from_str(payload).unwrap())
            .collect()
    }
}

impl DiagnosticsPublisher for MemoryPublisher {
    fn publish(&self, topic: &str, payload: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
