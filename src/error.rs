//! Custom error types for NTP datagram decoding.
//!
//! [`ParseError`] covers the one failure the responder can encounter while decoding a
//! received datagram: a payload shorter than the fixed packet size. It implements
//! [`std::error::Error`] and converts to [`std::io::Error`] for use at io-flavored call
//! sites.

use std::fmt;
use std::io;

/// Errors that can occur while decoding a received NTP datagram.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The datagram is too short for the fixed 48-byte packet layout.
    ///
    /// Malformed datagrams do not merit a reply: the receive loop drops them silently,
    /// which matches what other NTP implementations do.
    PacketTooShort {
        /// Number of bytes needed.
        needed: usize,
        /// Number of bytes available.
        available: usize,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::PacketTooShort { needed, available } => {
                write!(
                    f,
                    "NTP packet too short: needed {} bytes, got {}",
                    needed, available
                )
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for io::Error {
    fn from(err: ParseError) -> io::Error {
        io::Error::new(io::ErrorKind::UnexpectedEof, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_packet_too_short() {
        let err = ParseError::PacketTooShort {
            needed: 48,
            available: 10,
        };
        assert_eq!(err.to_string(), "NTP packet too short: needed 48 bytes, got 10");
    }

    #[test]
    fn test_into_io_error() {
        let parse_err = ParseError::PacketTooShort {
            needed: 48,
            available: 0,
        };
        let io_err: io::Error = parse_err.clone().into();
        assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);
        let inner = io_err.get_ref().unwrap().downcast_ref::<ParseError>().unwrap();
        assert_eq!(*inner, parse_err);
    }
}
