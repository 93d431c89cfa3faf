/*!
# Example
Shows how to run a responder that impersonates an arbitrary wall-clock time: clients
that sync against it will be told it is 2019-11-10, advancing at the real clock's rate.

```rust,no_run
use chrono::TimeZone;
use ntp_mimic::NtpResponder;

fn main() -> std::io::Result<()> {
    let target = chrono::Utc.with_ymd_and_hms(2019, 11, 10, 0, 0, 0).unwrap();
    let mut responder = NtpResponder::pretending(target, 123);
    responder.start()?;
    std::thread::sleep(std::time::Duration::from_secs(60));
    responder.stop();
    Ok(())
}
```

The responder answers one datagram at a time on a single background thread; a dropped
or malformed request simply goes unanswered and well-behaved clients retry at the
protocol level. This is a lab/test tool, not a production timekeeping authority: it
always claims stratum 2 and does no clock filtering, authentication, or leap handling.
*/

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Custom error types for NTP datagram decoding.
pub mod error;
/// Wire types and the byte-exact codec for the fixed 48-byte NTP packet.
pub mod protocol;
/// The UDP responder and its builder.
pub mod server;
/// Unix time conversion utilities for NTP timestamps.
///
/// Provides the `Instant` type for the current wall clock and the offset-aware
/// conversion to the NTP 32.32 fixed-point timestamp format.
pub mod unix_time;

pub use error::ParseError;
pub use server::{NtpResponder, NtpResponderBuilder};
