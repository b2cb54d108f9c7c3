//! # Radio Receiver Task
//!
//! The receiver owns the radio-facing side of the pipeline. A single
//! transceiver can listen for only one sync word at a time, so the receive
//! loop ping-pongs between the T1 and C1 sync words: every hop slice it
//! restarts RX (which flips the configured word) and waits for the
//! data-available notification. Alternating on a short cadence keeps both
//! modes alive with at most one hop period of extra latency.
//!
//! A burst is read in two steps: a 3-byte preamble to size the frame, then
//! the remainder. The finished [`Packet`] is handed to the dispatcher
//! through a bounded queue; when the queue is full the newest packet is
//! dropped, because blocking here would mean losing radio bytes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use crate::config::ReceiverConfig;
use crate::error::RadioError;
use crate::util::LogThrottle;
use crate::wmbus::packet::{Packet, PREAMBLE_SIZE};

/// Capacity of the packet hand-off queue.
pub const PACKET_QUEUE_DEPTH: usize = 3;

/// T-mode sync word configured on even hops.
pub const SYNC_WORD_T1: u16 = 0x543D;
/// C-mode sync word configured on odd hops.
pub const SYNC_WORD_C1: u16 = 0x54CD;

/// Radio transceiver capability consumed by the receiver.
///
/// Implementations wrap the actual SPI/GPIO driver; the receiver only needs
/// RX restarts, exact-length FIFO reads, RSSI and the data-available
/// notification.
#[async_trait]
pub trait RadioTransceiver: Send {
    /// Reset the RX state machine and alternate the configured sync word
    /// between [`SYNC_WORD_T1`] and [`SYNC_WORD_C1`].
    fn restart_rx(&mut self);

    /// Read exactly `buf.len()` bytes from the radio FIFO.
    ///
    /// Returns `false` on timeout or hardware error.
    async fn read(&mut self, buf: &mut [u8]) -> bool;

    /// RSSI of the last received packet in dBm.
    fn rssi(&self) -> i8;

    /// Register the notification the driver signals when the FIFO crosses
    /// its threshold (the ISR side of the pipeline).
    fn attach_data_interrupt(&mut self, notify: Arc<Notify>);
}

/// Create the bounded packet queue shared by receiver and dispatcher.
pub fn packet_queue() -> (mpsc::Sender<Packet>, mpsc::Receiver<Packet>) {
    mpsc::channel(PACKET_QUEUE_DEPTH)
}

/// Reception loop: hop, wait for the interrupt, read one burst, enqueue.
pub struct Receiver<R: RadioTransceiver> {
    radio: R,
    irq: Arc<Notify>,
    queue: mpsc::Sender<Packet>,
    stop: Arc<AtomicBool>,
    config: ReceiverConfig,
}

impl<R: RadioTransceiver> Receiver<R> {
    pub fn new(mut radio: R, queue: mpsc::Sender<Packet>, config: ReceiverConfig) -> Self {
        let irq = Arc::new(Notify::new());
        radio.attach_data_interrupt(irq.clone());
        Self {
            radio,
            irq,
            queue,
            stop: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Flag observed between hops; set it to stop the loop gracefully.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run until the stop flag is set. Transient errors re-arm the radio on
    /// the next iteration; read failures are logged with a throttle so RF
    /// noise cannot flood the log.
    pub async fn run(mut self) {
        let mut read_fail_throttle = LogThrottle::new(10_000, 5);
        while !self.stop.load(Ordering::Relaxed) {
            match self.receive_frame().await {
                Ok(()) => {}
                Err(RadioError::ReadFailed) => {
                    if read_fail_throttle.allow() {
                        warn!("Failed to read data");
                    }
                }
                Err(err) => warn!("{err}, dropping packet"),
            }
        }
        debug!("Receiver stopped");
    }

    /// One reception attempt. `Ok(())` covers both a delivered packet and a
    /// quiet window (the caller re-arms by looping).
    pub async fn receive_frame(&mut self) -> Result<(), RadioError> {
        if !self.wait_for_interrupt().await {
            return Ok(());
        }

        let mut packet = Packet::new();
        if !self.radio.read(packet.append_space(PREAMBLE_SIZE)).await {
            return Err(RadioError::ReadFailed);
        }

        let total_len = packet.expected_size();
        if total_len == 0 || total_len < PREAMBLE_SIZE {
            debug!("Cannot calculate payload size");
            return Ok(());
        }

        let remaining = total_len - PREAMBLE_SIZE;
        if remaining > 0 && !self.radio.read(packet.append_space(remaining)).await {
            return Err(RadioError::ReadFailed);
        }

        packet.set_rssi(self.radio.rssi());

        match self.queue.try_send(packet) {
            Ok(()) => {
                trace!("Queue send success ({} slots free)", self.queue.capacity());
                Ok(())
            }
            Err(_) => Err(RadioError::QueueFull),
        }
    }

    /// Ping-pong RX: restart the radio each hop slice and wait for the
    /// data-available notification. Returns `false` when the wait budget is
    /// spent or the stop flag was raised.
    async fn wait_for_interrupt(&mut self) -> bool {
        let mut waited = Duration::ZERO;
        while waited < self.config.rx_window {
            if self.stop.load(Ordering::Relaxed) {
                return false;
            }
            self.radio.restart_rx();
            if timeout(self.config.hop_interval, self.irq.notified())
                .await
                .is_ok()
            {
                return true;
            }
            waited += self.config.hop_interval;
        }
        debug!("Radio interrupt timeout");
        false
    }
}
