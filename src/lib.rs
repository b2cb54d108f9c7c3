//! # wmbus-radio - Wireless M-Bus Link-Layer Reception
//!
//! The wmbus-radio crate receives wireless M-Bus (EN 13757-4) radio bursts
//! from utility meters, validates their link-layer framing and delivers
//! clean data-link-layer payloads to registered telegram handlers.
//!
//! ## Features
//!
//! - T1 and C1 link modes with per-hop sync-word alternation on
//!   single-sync-word transceivers
//! - Frame Format A and Format B with EN 13757 block CRC validation and
//!   stripping
//! - Tolerant 3-of-6 line-code decoding with symbol-error statistics
//! - Windowed RF diagnostics: drop-reason buckets, per-mode counters, RSSI
//!   averages and a first-match triage hint for field debugging
//! - Periodic JSON diagnostics publishing through a pluggable transport
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wmbus_radio::config::{DiagConfig, ReceiverConfig};
//! use wmbus_radio::wmbus::{packet_queue, Dispatcher, Receiver};
//! # use wmbus_radio::wmbus::RadioTransceiver;
//! # async fn example(radio: impl RadioTransceiver + 'static) {
//! let (tx, rx) = packet_queue();
//! let receiver = Receiver::new(radio, tx, ReceiverConfig::default());
//! let mut dispatcher = Dispatcher::new(rx, None, DiagConfig::default());
//! dispatcher.add_frame_handler(|frame| {
//!     println!("{}", frame.as_hex());
//!     frame.mark_as_handled();
//! });
//!
//! tokio::spawn(receiver.run());
//! loop {
//!     dispatcher.poll();
//!     tokio::time::sleep(std::time::Duration::from_millis(10)).await;
//! }
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod wmbus;

pub use config::{DiagConfig, ReceiverConfig};
pub use error::RadioError;
pub use logging::init_logger;
pub use wmbus::{
    DiagnosticsPublisher, Dispatcher, DropReason, Frame, FrameFormat, LinkMode, Packet,
    RadioTransceiver, Receiver,
};
