//! RFC 854 telnet protocol decoding for network CLI sessions.
//!
//! The decoder is a byte-at-a-time state machine: every input byte either
//! passes through as terminal data or is consumed as protocol. Only the
//! option subset the CLI negotiates is interpreted (ECHO, SGA, LINEMODE,
//! NAWS, BINARY); everything else is consumed and ignored.

use crate::error::SessionError;
use log::{debug, trace};

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

pub const OPT_BINARY: u8 = 0;
pub const OPT_ECHO: u8 = 1;
pub const OPT_SGA: u8 = 3;
pub const OPT_NAWS: u8 = 31;
pub const OPT_LINEMODE: u8 = 34;

/// Upper bound for accumulated subnegotiation payload. A peer exceeding it
/// is fatal for the session.
const SB_BUFFER_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DecodeState {
    /// Plain terminal data.
    Data,
    /// The previous byte was IAC.
    Iac,
    /// A DO/DONT/WILL/WONT notification awaiting its option byte.
    Option(u8),
    /// Inside an `IAC SB … IAC SE` subnegotiation.
    Subnegotiation,
    /// IAC seen while inside a subnegotiation.
    SubnegotiationIac,
}

#[derive(Debug, Eq, PartialEq)]
/// Outcome of feeding one byte to the decoder.
pub enum TelnetEvent {
    /// The byte is terminal data for the line editor.
    Data(u8),
    /// The byte was consumed as protocol.
    Consumed,
    /// A complete NAWS subnegotiation carrying the raw window size.
    WindowSize { width: u16, height: u16 },
}

/// Decoder state for one telnet connection.
pub struct TelnetCodec {
    state: DecodeState,
    sb_buffer: Vec<u8>,
    peer_will_binary: bool,
    peer_do_binary: bool,
}

impl Default for TelnetCodec {
    fn default() -> Self {
        Self {
            state: DecodeState::Data,
            sb_buffer: Vec::new(),
            peer_will_binary: false,
            peer_do_binary: false,
        }
    }
}

impl TelnetCodec {
    /// The option burst sent to every freshly accepted network session.
    pub fn initial_negotiation() -> Vec<u8> {
        vec![
            IAC, WILL, OPT_ECHO,
            IAC, WILL, OPT_SGA,
            IAC, DONT, OPT_LINEMODE,
            IAC, DO, OPT_NAWS,
            IAC, DO, OPT_BINARY,
            IAC, WILL, OPT_BINARY,
        ]
    }

    /// True once the peer agreed to binary transmission in both directions.
    /// Binary mode disables the `\n` to `\r\n` output translation.
    pub fn is_binary(&self) -> bool {
        self.peer_will_binary && self.peer_do_binary
    }

    /// Feed one input byte through the decoder.
    pub fn decode(&mut self, byte: u8) -> Result<TelnetEvent, SessionError> {
        match self.state {
            DecodeState::Data => {
                if byte == IAC {
                    self.state = DecodeState::Iac;
                    Ok(TelnetEvent::Consumed)
                } else {
                    Ok(TelnetEvent::Data(byte))
                }
            }
            DecodeState::Iac => match byte {
                IAC => {
                    // Escaped literal 0xFF
                    self.state = DecodeState::Data;
                    Ok(TelnetEvent::Data(IAC))
                }
                SB => {
                    self.sb_buffer.clear();
                    self.state = DecodeState::Subnegotiation;
                    Ok(TelnetEvent::Consumed)
                }
                SE => {
                    // SE outside of a subnegotiation is ignored
                    self.state = DecodeState::Data;
                    Ok(TelnetEvent::Consumed)
                }
                DO | DONT | WILL | WONT => {
                    self.state = DecodeState::Option(byte);
                    Ok(TelnetEvent::Consumed)
                }
                _ => {
                    // GA, NOP, AYT and friends take no arguments
                    trace!("Ignoring telnet command {}", byte);
                    self.state = DecodeState::Data;
                    Ok(TelnetEvent::Consumed)
                }
            },
            DecodeState::Option(command) => {
                self.process_option(command, byte);
                self.state = DecodeState::Data;
                Ok(TelnetEvent::Consumed)
            }
            DecodeState::Subnegotiation => {
                if byte == IAC {
                    self.state = DecodeState::SubnegotiationIac;
                    return Ok(TelnetEvent::Consumed);
                }
                self.push_sb(byte)?;
                Ok(TelnetEvent::Consumed)
            }
            DecodeState::SubnegotiationIac => match byte {
                IAC => {
                    self.push_sb(IAC)?;
                    self.state = DecodeState::Subnegotiation;
                    Ok(TelnetEvent::Consumed)
                }
                SE => {
                    self.state = DecodeState::Data;
                    Ok(self.finish_subnegotiation())
                }
                _ => {
                    // Malformed subnegotiation; drop it
                    debug!("Unexpected telnet command {} inside subnegotiation", byte);
                    self.sb_buffer.clear();
                    self.state = DecodeState::Data;
                    Ok(TelnetEvent::Consumed)
                }
            },
        }
    }

    fn push_sb(&mut self, byte: u8) -> Result<(), SessionError> {
        if self.sb_buffer.len() >= SB_BUFFER_CAPACITY {
            return Err(SessionError::TelnetOverflow);
        }
        self.sb_buffer.push(byte);
        Ok(())
    }

    fn process_option(&mut self, command: u8, option: u8) {
        trace!("Telnet option notification: command {} option {}", command, option);
        if option == OPT_BINARY {
            match command {
                DO => self.peer_do_binary = true,
                DONT => self.peer_do_binary = false,
                WILL => self.peer_will_binary = true,
                WONT => self.peer_will_binary = false,
                _ => (),
            }
        }
    }

    fn finish_subnegotiation(&mut self) -> TelnetEvent {
        let event = if self.sb_buffer.first() == Some(&OPT_NAWS) && self.sb_buffer.len() >= 5 {
            let width = 256 * u16::from(self.sb_buffer[1]) + u16::from(self.sb_buffer[2]);
            let height = 256 * u16::from(self.sb_buffer[3]) + u16::from(self.sb_buffer[4]);
            TelnetEvent::WindowSize { width, height }
        } else {
            TelnetEvent::Consumed
        };
        self.sb_buffer.clear();
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn decode_all(codec: &mut TelnetCodec, bytes: &[u8]) -> Result<Vec<TelnetEvent>> {
        let mut events = Vec::new();
        for b in bytes {
            events.push(codec.decode(*b)?);
        }
        Ok(events)
    }

    #[test]
    fn plain_data_passes_through() -> Result<()> {
        let mut codec = TelnetCodec::default();
        assert_eq!(codec.decode(b'x')?, TelnetEvent::Data(b'x'));
        assert_eq!(codec.decode(b'\n')?, TelnetEvent::Data(b'\n'));
        Ok(())
    }

    #[test]
    fn escaped_iac_is_literal_data() -> Result<()> {
        let mut codec = TelnetCodec::default();
        let events = decode_all(&mut codec, &[IAC, IAC])?;
        assert_eq!(events, vec![TelnetEvent::Consumed, TelnetEvent::Data(IAC)]);
        Ok(())
    }

    #[test]
    fn option_notification_consumes_three_bytes() -> Result<()> {
        let mut codec = TelnetCodec::default();
        let events = decode_all(&mut codec, &[IAC, DO, OPT_ECHO, b'a'])?;
        assert_eq!(
            events,
            vec![
                TelnetEvent::Consumed,
                TelnetEvent::Consumed,
                TelnetEvent::Consumed,
                TelnetEvent::Data(b'a'),
            ]
        );
        Ok(())
    }

    #[test]
    fn naws_reports_window_size() -> Result<()> {
        let mut codec = TelnetCodec::default();
        let events = decode_all(&mut codec, &[IAC, SB, OPT_NAWS, 0, 80, 0, 24, IAC, SE])?;
        assert_eq!(
            events.last(),
            Some(&TelnetEvent::WindowSize {
                width: 80,
                height: 24
            })
        );
        Ok(())
    }

    #[test]
    fn naws_wide_terminal_uses_high_byte() -> Result<()> {
        let mut codec = TelnetCodec::default();
        let events = decode_all(&mut codec, &[IAC, SB, OPT_NAWS, 1, 4, 0, 50, IAC, SE])?;
        assert_eq!(
            events.last(),
            Some(&TelnetEvent::WindowSize {
                width: 260,
                height: 50
            })
        );
        Ok(())
    }

    #[test]
    fn stray_se_is_ignored() -> Result<()> {
        let mut codec = TelnetCodec::default();
        let events = decode_all(&mut codec, &[IAC, SE, b'a'])?;
        assert_eq!(events[2], TelnetEvent::Data(b'a'));
        Ok(())
    }

    #[test]
    fn binary_mode_requires_both_directions() -> Result<()> {
        let mut codec = TelnetCodec::default();
        decode_all(&mut codec, &[IAC, DO, OPT_BINARY])?;
        assert!(!codec.is_binary());

        decode_all(&mut codec, &[IAC, WILL, OPT_BINARY])?;
        assert!(codec.is_binary());

        decode_all(&mut codec, &[IAC, DONT, OPT_BINARY])?;
        assert!(!codec.is_binary());
        Ok(())
    }

    #[test]
    fn subnegotiation_overflow_is_fatal() {
        let mut codec = TelnetCodec::default();
        codec.decode(IAC).unwrap();
        codec.decode(SB).unwrap();
        let mut result = Ok(TelnetEvent::Consumed);
        for _ in 0..=SB_BUFFER_CAPACITY {
            result = codec.decode(OPT_NAWS);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(SessionError::TelnetOverflow));
    }

    #[test]
    fn initial_negotiation_is_well_formed() {
        let bytes = TelnetCodec::initial_negotiation();
        assert_eq!(bytes.len() % 3, 0);
        for chunk in bytes.chunks(3) {
            assert_eq!(chunk[0], IAC);
        }
    }
}
