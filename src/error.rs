//! # Receiver Error Handling
//!
//! Fatal and setup-time errors for the radio pipeline. Per-packet framing
//! problems are not errors: they are recorded as drop reasons on the packet
//! and aggregated by the dispatcher (this system is a best-effort sniffer).

use thiserror::Error;

/// Errors surfaced by the receive pipeline.
#[derive(Debug, Error)]
pub enum RadioError {
    /// The radio FIFO read timed out or the hardware reported a fault.
    #[error("Radio read failed")]
    ReadFailed,

    /// The bounded packet queue was full; the newest packet was dropped.
    #[error("Packet queue full")]
    QueueFull,
}
