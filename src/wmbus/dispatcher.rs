//! # Packet Dispatcher
//!
//! Consumer side of the receive pipeline. Runs on a cooperative main loop:
//! every [`Dispatcher::poll`] is non-blocking and bounded — it publishes the
//! periodic diagnostics summary when due, then drains at most one packet
//! from the queue, converts it, accounts for the outcome and hands a
//! successful frame to the registered handlers.
//!
//! Per-packet `truncated`/`dropped` events are published regardless of the
//! verbosity setting so a host can silence logs without losing diagnostics;
//! `diag_publish_raw` gates only the raw hex field.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::DiagConfig;
use crate::wmbus::diagnostics::DiagnosticsWindow;
use crate::wmbus::link_mode::LinkMode;
use crate::wmbus::packet::{Frame, Packet};

/// Transport capability for diagnostics publications.
///
/// Publish failures are swallowed: diagnostics must never disturb reception.
pub trait DiagnosticsPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str);
    fn is_connected(&self) -> bool;
}

/// Telegram handler invoked for every emitted frame.
pub type FrameHandler = Box<dyn FnMut(&mut Frame) + Send>;

/// Drains the packet queue and aggregates diagnostics.
pub struct Dispatcher {
    queue: mpsc::Receiver<Packet>,
    publisher: Option<Arc<dyn DiagnosticsPublisher>>,
    handlers: Vec<FrameHandler>,
    window: DiagnosticsWindow,
    config: DiagConfig,
    last_summary: Option<Instant>,
}

impl Dispatcher {
    pub fn new(
        queue: mpsc::Receiver<Packet>,
        publisher: Option<Arc<dyn DiagnosticsPublisher>>,
        config: DiagConfig,
    ) -> Self {
        Self {
            queue,
            publisher,
            handlers: Vec::new(),
            window: DiagnosticsWindow::new(),
            config,
            last_summary: None,
        }
    }

    /// Register a telegram handler. Call during setup, before packets flow.
    pub fn add_frame_handler(&mut self, handler: impl FnMut(&mut Frame) + Send + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// Current window counters (summary-cycle introspection).
    pub fn window(&self) -> &DiagnosticsWindow {
        &self.window
    }

    /// One cooperative iteration: summary check, then at most one packet.
    pub fn poll(&mut self) {
        self.maybe_publish_summary(Instant::now());
        let packet = match self.queue.try_recv() {
            Ok(packet) => packet,
            Err(_) => return,
        };
        self.process_packet(packet);
    }

    /// Publish the summary immediately and start a fresh window.
    ///
    /// Also useful at shutdown so the tail of the window is not lost.
    pub fn flush_summary(&mut self, now: Instant) {
        let payload = self.window.summary_payload();
        let hint = self.window.hint();

        if let Some(publisher) = self.ready_publisher() {
            if publisher.is_connected() {
                publisher.publish(&self.config.topic, &payload.to_string());
                let f = self.window.features();
                info!(
                    "DIAG summary published to {} (total={} ok={} truncated={} dropped={} crc_failed={})",
                    self.config.topic, f.total, f.ok, f.truncated, f.dropped, f.crc_failed
                );
            }
        }
        if hint.code == "OK" {
            info!("DIAG hint: {} | {}", hint.code, hint.en);
        } else {
            warn!("DIAG hint: {} | {}", hint.code, hint.en);
        }

        self.window.reset();
        self.last_summary = Some(now);
    }

    fn maybe_publish_summary(&mut self, now: Instant) {
        if self.config.topic.is_empty() {
            return;
        }
        let last = match self.last_summary {
            Some(last) => last,
            // First poll only anchors the window.
            None => {
                self.last_summary = Some(now);
                return;
            }
        };
        if now.duration_since(last) < self.config.summary_interval() {
            return;
        }
        self.flush_summary(now);
    }

    fn process_packet(&mut self, mut packet: Packet) {
        let mode = packet.link_mode();
        self.window.record_attempt(mode);

        let frame = packet.convert_to_frame();

        if mode == LinkMode::T1 {
            self.window.record_t1_symbols(packet.t1_symbols());
        }

        match frame {
            Some(frame) => self.handle_frame(frame),
            None => self.handle_discard(&packet, mode),
        }
    }

    fn handle_discard(&mut self, packet: &Packet, mode: LinkMode) {
        if packet.is_truncated() {
            self.window.record_truncated();
            self.publish_packet_event(packet, mode, "truncated", None);

            if self.config.verbose {
                warn!(
                    "TRUNCATED frame: mode={} want={} got={} raw_got={} RSSI={}dBm",
                    mode.name(),
                    packet.want_len(),
                    packet.got_len(),
                    packet.raw_got_len(),
                    packet.rssi()
                );
                if self.config.publish_raw {
                    warn!("TRUNCATED raw(hex)={}", packet.raw_hex());
                }
            }
            return;
        }

        let reason = match packet.drop_reason() {
            Some(reason) => reason,
            None => return,
        };
        self.window.record_drop(mode, packet.rssi(), reason.as_str());
        self.publish_packet_event(packet, mode, "dropped", Some(reason.as_str()));

        if self.config.verbose {
            warn!(
                "DROPPED packet: reason={} mode={} want={} got={} raw_got={} RSSI={}dBm",
                reason.as_str(),
                mode.name(),
                packet.want_len(),
                packet.got_len(),
                packet.raw_got_len(),
                packet.rssi()
            );
            if self.config.publish_raw {
                warn!("DROPPED raw(hex)={}", packet.raw_hex());
            }
        }
    }

    fn handle_frame(&mut self, mut frame: Frame) {
        self.window.record_ok(frame.link_mode(), frame.rssi());

        match frame.dll_header() {
            Some(header) => info!(
                "Have data ({} bytes) [RSSI: {}dBm, mode: {} {}, mfr:{} id:{} ver:{} type:{} ci:{:02X}]",
                frame.bytes().len(),
                frame.rssi(),
                frame.link_mode().name(),
                frame.format().as_str(),
                header.manufacturer,
                header.device_id,
                header.version,
                header.device_type,
                header.control_info
            ),
            None => info!(
                "Have data ({} bytes) [RSSI: {}dBm, mode: {} {}]",
                frame.bytes().len(),
                frame.rssi(),
                frame.link_mode().name(),
                frame.format().as_str()
            ),
        }

        for handler in &mut self.handlers {
            // One panicking handler must not starve the rest.
            if catch_unwind(AssertUnwindSafe(|| handler(&mut frame))).is_err() {
                warn!("Frame handler panicked; continuing with remaining handlers");
            }
        }

        if frame.handlers_count() > 0 {
            info!("Telegram handled by {} handlers", frame.handlers_count());
        } else {
            debug!("Telegram not handled by any handler");
        }
    }

    fn ready_publisher(&self) -> Option<&Arc<dyn DiagnosticsPublisher>> {
        if self.config.topic.is_empty() {
            return None;
        }
        self.publisher.as_ref()
    }

    fn publish_packet_event(&self, packet: &Packet, mode: LinkMode, event: &str, reason: Option<&str>) {
        let publisher = match self.ready_publisher() {
            Some(publisher) => publisher,
            None => return,
        };
        let mut payload = json!({
            "event": event,
            "mode": mode.name(),
            "rssi": packet.rssi(),
            "want": packet.want_len(),
            "got": packet.got_len(),
            "raw_got": packet.raw_got_len(),
        });
        if let Some(reason) = reason {
            payload["reason"] = json!(reason);
        }
        if self.config.publish_raw {
            payload["raw"] = json!(packet.raw_hex());
        }
        publisher.publish(&self.config.topic, &payload.to_string());
    }
}
