//! # Wireless M-Bus Link-Layer Receive Pipeline
//!
//! Radio bursts enter through the [`receiver`], are framed and validated by
//! [`packet`] (with [`threeofsix`] decoding for T-mode and [`crc`] block
//! validation for both formats), and leave through the [`dispatcher`] as
//! clean DLL frames plus windowed [`diagnostics`].

pub mod crc;
pub mod diagnostics;
pub mod dispatcher;
pub mod link_mode;
pub mod packet;
pub mod receiver;
pub mod threeofsix;

pub use crc::{crc16_en13757, trim_dll_crc_format_a, trim_dll_crc_format_b};
pub use diagnostics::{DiagnosticsWindow, DropBucket, TriageHint, WindowFeatures};
pub use dispatcher::{DiagnosticsPublisher, Dispatcher, FrameHandler};
pub use link_mode::{FrameFormat, LinkMode};
pub use packet::{DllHeader, DropReason, Frame, Packet, PREAMBLE_SIZE};
pub use receiver::{packet_queue, RadioTransceiver, Receiver, PACKET_QUEUE_DEPTH};
pub use threeofsix::{encoded_size, DecodeStats};
