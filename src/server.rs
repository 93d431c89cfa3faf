//! The UDP responder: a blocking receive loop on a dedicated thread.
//!
//! [`NtpResponder`] binds a UDP socket on the configured port, answers each client
//! request with the current time shifted by a fixed signed offset, and shuts down
//! cooperatively: the loop polls a running flag on a short receive timeout rather than
//! being killed out from under a blocking read.
//!
//! # Examples
//!
//! ```no_run
//! # fn example() -> std::io::Result<()> {
//! use ntp_mimic::server::NtpResponder;
//!
//! let mut responder = NtpResponder::builder()
//!     .port(123)
//!     .offset_secs(-3600.0)
//!     .build();
//!
//! responder.start()?;
//! // ... serve requests ...
//! responder.stop();
//! # Ok(())
//! # }
//! ```

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::protocol::{
    self, ConstPackedSizeBytes, LeapIndicator, Mode, Packet, ReferenceId, ShortFormat, Stratum,
    Version, WriteBytes,
};
use crate::unix_time::{self, Instant};

/// Polling interval advertised in replies, in log2 seconds (8 s).
const POLL: u8 = 3;

/// Clock precision advertised in replies, in signed log2 seconds (~60 ns).
///
/// Representative of a typical low-end time source; the responder does not measure its
/// actual clock.
const PRECISION: i8 = -24;

/// Root delay advertised in replies: 0.5 ms in NTP short format.
const ROOT_DELAY: ShortFormat = ShortFormat {
    seconds: 0,
    fraction: 33,
};

/// Root dispersion advertised in replies: 1 ms in NTP short format.
const ROOT_DISPERSION: ShortFormat = ShortFormat {
    seconds: 0,
    fraction: 66,
};

/// How long a single `recv_from` blocks before the loop re-checks the running flag.
const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Configuration shared with the receive loop.
///
/// Effectively immutable once `start()` has been called: only the loop reads it, so no
/// locking is needed.
#[derive(Clone, Copy, Debug)]
struct ResponderConfig {
    offset_secs: f64,
    reference_id: ReferenceId,
}

/// Builder for configuring and creating an [`NtpResponder`].
#[derive(Debug)]
pub struct NtpResponderBuilder {
    port: u16,
    offset_secs: f64,
    reference_id: Option<ReferenceId>,
    recv_timeout: Duration,
}

impl NtpResponderBuilder {
    fn new() -> Self {
        NtpResponderBuilder {
            port: protocol::PORT,
            offset_secs: 0.0,
            reference_id: None,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
        }
    }

    /// Set the UDP port to listen on (default 123, which requires elevated privilege on
    /// most systems). Port 0 binds an ephemeral port, useful for tests.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the signed offset in seconds added to the real wall clock when building
    /// replies (default 0).
    pub fn offset_secs(mut self, offset_secs: f64) -> Self {
        self.offset_secs = offset_secs;
        self
    }

    /// Derive the offset so that the responder reports `target` as "now".
    ///
    /// The offset is computed against the actual current time at this call, then stays
    /// fixed: the impersonated clock keeps advancing at the real clock's rate.
    pub fn pretend_now(mut self, target: DateTime<Utc>) -> Self {
        let delta = target - Utc::now();
        self.offset_secs = delta.num_milliseconds() as f64 / 1e3;
        self
    }

    /// Set the 32-bit reference identifier echoed in every reply.
    ///
    /// When not set, a random identifier is drawn at build time.
    pub fn reference_id(mut self, reference_id: ReferenceId) -> Self {
        self.reference_id = Some(reference_id);
        self
    }

    /// Set the receive timeout used by the loop to poll the stop signal (default 100 ms).
    ///
    /// This bounds the shutdown latency of [`NtpResponder::stop`].
    pub fn recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Build the responder. No socket is bound until [`NtpResponder::start`] is called.
    pub fn build(self) -> NtpResponder {
        let reference_id = self.reference_id.unwrap_or_else(ReferenceId::random);
        NtpResponder {
            port: self.port,
            recv_timeout: self.recv_timeout,
            config: Arc::new(ResponderConfig {
                offset_secs: self.offset_secs,
                reference_id,
            }),
            running: Arc::new(AtomicBool::new(false)),
            socket: None,
            loop_handle: None,
        }
    }
}

/// A minimal NTP server that answers each request with the current time shifted by a
/// fixed offset.
///
/// Created via [`NtpResponder::builder()`]. Call [`start()`](NtpResponder::start) to
/// bind the socket and launch the receive loop, [`stop()`](NtpResponder::stop) to shut
/// down. Each datagram is handled independently; no per-client state is kept.
pub struct NtpResponder {
    port: u16,
    recv_timeout: Duration,
    config: Arc<ResponderConfig>,
    running: Arc<AtomicBool>,
    socket: Option<UdpSocket>,
    loop_handle: Option<JoinHandle<()>>,
}

impl NtpResponder {
    /// Create a builder for configuring the responder.
    pub fn builder() -> NtpResponderBuilder {
        NtpResponderBuilder::new()
    }

    /// Create a responder with the given port and a derived offset so that it reports
    /// `target` as the current time.
    ///
    /// Equivalent to `NtpResponder::builder().port(port).pretend_now(target).build()`.
    pub fn pretending(target: DateTime<Utc>, port: u16) -> NtpResponder {
        NtpResponder::builder().port(port).pretend_now(target).build()
    }

    /// Bind the UDP socket on all interfaces and launch the receive loop on a dedicated
    /// thread.
    ///
    /// # Errors
    ///
    /// Fails fast with [`io::ErrorKind::AlreadyExists`] when the responder is already
    /// running. Bind failures (port in use, insufficient privilege for ports below
    /// 1024) are surfaced directly; the responder never comes up silently broken.
    pub fn start(&mut self) -> io::Result<()> {
        if self.loop_handle.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "responder is already running",
            ));
        }

        let socket = UdpSocket::bind(("0.0.0.0", self.port))?;
        socket.set_read_timeout(Some(self.recv_timeout))?;
        debug!("NTP responder listening on {}", socket.local_addr()?);

        let loop_socket = socket.try_clone()?;
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let config = Arc::clone(&self.config);
        self.loop_handle = Some(thread::spawn(move || {
            receive_loop(loop_socket, config, running)
        }));
        self.socket = Some(socket);
        Ok(())
    }

    /// Clear the running flag, wait for the receive loop to observe it, and close the
    /// socket.
    ///
    /// Returns within one receive-timeout interval. Idempotent: calling `stop` on a
    /// stopped responder, or on one whose loop already exited after a fatal socket
    /// error, is a no-op.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.loop_handle.take() {
            // The loop re-checks the flag at most one recv timeout from now.
            let _ = handle.join();
        }
        self.socket = None;
    }

    /// The local address the responder is bound to, while running.
    ///
    /// With port 0 this reveals the ephemeral port the OS assigned.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.socket {
            Some(socket) => socket.local_addr(),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "responder is not running",
            )),
        }
    }

    /// The signed offset in seconds this responder applies to the real wall clock.
    pub fn offset_secs(&self) -> f64 {
        self.config.offset_secs
    }

    /// The reference identifier echoed in every reply.
    pub fn reference_id(&self) -> ReferenceId {
        self.config.reference_id
    }
}

/// One iteration per datagram: decode, timestamp, reply.
///
/// Runs until the running flag is cleared or a socket error other than a receive
/// timeout occurs. Malformed datagrams and failed sends are dropped without
/// interrupting the loop.
fn receive_loop(socket: UdpSocket, config: Arc<ResponderConfig>, running: Arc<AtomicBool>) {
    let mut recv_buf = [0u8; 512];

    while running.load(Ordering::SeqCst) {
        let (recv_len, src_addr) = match socket.recv_from(&mut recv_buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                warn!("receive loop terminating: {}", e);
                break;
            }
        };

        let request = match Packet::from_datagram(&recv_buf[..recv_len]) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("dropped datagram from {}: {}", src_addr, e);
                continue;
            }
        };

        let response = build_response(&request, &config);
        match serialize_response(&response) {
            Ok(send_buf) => {
                if let Err(e) = socket.send_to(&send_buf, src_addr) {
                    debug!("failed to send reply to {}: {}", src_addr, e);
                }
            }
            Err(e) => {
                debug!("failed to encode reply for {}: {}", src_addr, e);
            }
        }
    }
}

/// Build the reply for a client request.
///
/// One "now" sample is reused for the reference, receive, and transmit timestamps:
/// receive and transmit are indistinguishable at this responder's granularity since no
/// real processing delay is measured, and clients' round-trip math assumes near-zero
/// processing time here. The origin timestamp is the client's transmit timestamp copied
/// verbatim; clients use it to compute round-trip delay.
fn build_response(request: &Packet, config: &ResponderConfig) -> Packet {
    let tx = unix_time::ntp_timestamp(&Instant::now(), config.offset_secs);
    Packet {
        leap_indicator: LeapIndicator::NoWarning,
        version: Version::V4,
        mode: Mode::Server,
        stratum: Stratum::SECONDARY_MIN,
        poll: POLL,
        precision: PRECISION,
        root_delay: ROOT_DELAY,
        root_dispersion: ROOT_DISPERSION,
        reference_id: config.reference_id,
        reference_timestamp: tx,
        origin_timestamp: request.transmit_timestamp,
        receive_timestamp: tx,
        transmit_timestamp: tx,
    }
}

/// Serialize a response packet into a send-ready buffer.
fn serialize_response(response: &Packet) -> io::Result<[u8; Packet::PACKED_SIZE_BYTES]> {
    let mut buf = [0u8; Packet::PACKED_SIZE_BYTES];
    (&mut buf[..]).write_bytes(response)?;
    Ok(buf)
}
