//! Transcoding between the XNS character encoding and host strings.
//!
//! On the wire a string is a byte sequence in the XNS character code. Bytes
//! are interpreted in the current 8-bit character set (initially set 0, which
//! is close to ASCII). `0xFF s` selects character set `s`, `0xFF 0xFF` enters
//! 16-bit mode where every character is a `(set, code)` byte pair, and the pair
//! `0xFF 0x00` leaves 16-bit mode again.
//!
//! The host form keeps that structure in a printable string. Printable ASCII
//! characters of set 0 (except the escape character `~`) stand for
//! themselves; everything else becomes an escape of `~` followed by two base-62
//! digits (`0-9A-Za-z`):
//!
//! | wire                        | host                                    |
//! |-----------------------------|-----------------------------------------|
//! | code byte `b` (8-bit mode)  | `~` + base62(b)                         |
//! | `0xFF s` (select set `s`)   | `~` + base62(256 + s)                   |
//! | `0xFF 0xFF`                 | `~{`                                    |
//! | `0xFF 0x00` (16-bit mode)   | `~}`                                    |
//! | pair `(c, b)` (16-bit mode) | `~` + base62(256 + c), then code of `b` |
//!
//! Every well-formed wire string survives `encode(decode(x))` byte for byte.

use super::utils::invalid_data;
use crate::protocol::wire::WireResult;

/// Escape character of the host form.
pub const ESCAPE: char = '~';

const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const SWITCH: u8 = 0xFF;
const WIDE_EXIT: u8 = 0x00;
const ENTER_WIDE: char = '{';
const EXIT_WIDE: char = '}';
/// Escaped values from here on name a character set rather than a code.
const SET_BASE: u16 = 256;

/// Structural unit of a wire string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token {
    /// Code byte in the current 8-bit character set.
    Code(u8),
    /// `0xFF s`: select 8-bit character set `s`.
    Select(u8),
    EnterWide,
    ExitWide,
    /// `(set, code)` pair in 16-bit mode.
    Wide(u8, u8),
}

/// Walks a wire string token by token, tracking the character mode.
struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    wide: bool,
    set: u8,
}

impl<'a> Scanner<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0, wide: false, set: 0 }
    }

    /// Next token and the character set it belongs to; `None` at the end.
    fn next_token(&mut self) -> WireResult<Option<(Token, u8)>> {
        let Some(&first) = self.bytes.get(self.pos) else {
            return Ok(None);
        };
        let second = self.bytes.get(self.pos + 1).copied();
        let token = if self.wide {
            let second = second.ok_or_else(|| invalid_data("odd byte in 16-bit character"))?;
            match (first, second) {
                (SWITCH, WIDE_EXIT) => {
                    self.wide = false;
                    self.set = 0;
                    Token::ExitWide
                }
                (SWITCH, _) => return Err(invalid_data("invalid escape in 16-bit mode")),
                (set, code) => Token::Wide(set, code),
            }
        } else if first == SWITCH {
            match second.ok_or_else(|| invalid_data("dangling character set escape"))? {
                SWITCH => {
                    self.wide = true;
                    Token::EnterWide
                }
                set => {
                    self.set = set;
                    Token::Select(set)
                }
            }
        } else {
            Token::Code(first)
        };
        self.pos += match token {
            Token::Code(_) => 1,
            _ => 2,
        };
        Ok(Some((token, self.set)))
    }
}

fn is_literal(byte: u8) -> bool {
    (0x20..=0x7E).contains(&byte) && byte != ESCAPE as u8
}

fn push_escape(out: &mut String, value: u16) {
    out.push(ESCAPE);
    out.push(DIGITS[(value / 62) as usize] as char);
    out.push(DIGITS[(value % 62) as usize] as char);
}

fn push_code(out: &mut String, code: u8) {
    if is_literal(code) {
        out.push(code as char);
    } else {
        push_escape(out, code as u16);
    }
}

fn digit_value(c: char) -> Option<u16> {
    let pos = DIGITS.iter().position(|d| *d as char == c)?;
    Some(pos as u16)
}

/// Converts a wire string into its host form.
pub fn decode(wire: &[u8]) -> WireResult<String> {
    let mut out = String::with_capacity(wire.len());
    let mut scanner = Scanner::new(wire);
    while let Some((token, set)) = scanner.next_token()? {
        match token {
            Token::Code(code) if set == 0 => push_code(&mut out, code),
            Token::Code(code) => push_escape(&mut out, code as u16),
            Token::Select(set) => push_escape(&mut out, SET_BASE + set as u16),
            Token::EnterWide => {
                out.push(ESCAPE);
                out.push(ENTER_WIDE);
            }
            Token::ExitWide => {
                out.push(ESCAPE);
                out.push(EXIT_WIDE);
            }
            Token::Wide(0, code) if is_literal(code) => out.push(code as char),
            Token::Wide(set, code) => {
                push_escape(&mut out, SET_BASE + set as u16);
                push_code(&mut out, code);
            }
        }
    }
    Ok(out)
}

/// Unit of the host form.
enum HostToken {
    Literal(u8),
    Escaped(u16),
    EnterWide,
    ExitWide,
}

struct HostScanner<'a> {
    chars: std::str::Chars<'a>,
}

impl HostScanner<'_> {
    fn next_token(&mut self) -> WireResult<Option<HostToken>> {
        let Some(c) = self.chars.next() else {
            return Ok(None);
        };
        if c != ESCAPE {
            if !c.is_ascii() {
                return Err(invalid_data(format!("character {c:?} has no XNS encoding")));
            }
            return Ok(Some(HostToken::Literal(c as u8)));
        }
        let first = self.chars.next().ok_or_else(|| invalid_data("dangling escape"))?;
        match first {
            ENTER_WIDE => return Ok(Some(HostToken::EnterWide)),
            EXIT_WIDE => return Ok(Some(HostToken::ExitWide)),
            _ => {}
        }
        let second = self.chars.next().ok_or_else(|| invalid_data("truncated escape"))?;
        match (digit_value(first), digit_value(second)) {
            (Some(high), Some(low)) => Ok(Some(HostToken::Escaped(high * 62 + low))),
            _ => Err(invalid_data(format!("invalid escape ~{first}{second}"))),
        }
    }
}

/// Converts a host string back into wire bytes.
///
/// Plain ASCII text is accepted as is; characters outside ASCII fail.
pub fn encode(host: &str) -> WireResult<Vec<u8>> {
    let mut out = Vec::with_capacity(host.len());
    let mut scanner = HostScanner { chars: host.chars() };
    let mut wide = false;
    while let Some(token) = scanner.next_token()? {
        match (wide, token) {
            (false, HostToken::Literal(code)) => out.push(code),
            (false, HostToken::Escaped(code)) if code < SWITCH as u16 => out.push(code as u8),
            (false, HostToken::Escaped(set)) if (SET_BASE..SET_BASE + 255).contains(&set) => {
                out.extend_from_slice(&[SWITCH, (set - SET_BASE) as u8]);
            }
            (false, HostToken::EnterWide) => {
                out.extend_from_slice(&[SWITCH, SWITCH]);
                wide = true;
            }
            (true, HostToken::Literal(code)) => out.extend_from_slice(&[0, code]),
            (true, HostToken::Escaped(set)) if (SET_BASE..SET_BASE + 255).contains(&set) => {
                let code = match scanner.next_token()? {
                    Some(HostToken::Literal(code)) => code,
                    Some(HostToken::Escaped(code)) if code < SET_BASE => code as u8,
                    _ => return Err(invalid_data("16-bit character lacks its code")),
                };
                out.extend_from_slice(&[(set - SET_BASE) as u8, code]);
            }
            (true, HostToken::ExitWide) => {
                out.extend_from_slice(&[SWITCH, WIDE_EXIT]);
                wide = false;
            }
            (wide, _) => {
                let mode = if wide { "16-bit" } else { "8-bit" };
                return Err(invalid_data(format!("escape not valid in {mode} mode")));
            }
        }
    }
    Ok(out)
}

/// Length of the longest prefix of `wire` that is at most `max_len` bytes and
/// ends on a token boundary, so no escape or 16-bit pair is split.
pub fn truncate(wire: &[u8], max_len: usize) -> usize {
    if wire.len() <= max_len {
        return wire.len();
    }
    let mut scanner = Scanner::new(wire);
    let mut cut = 0;
    while let Ok(Some(_)) = scanner.next_token() {
        if scanner.pos > max_len {
            break;
        }
        cut = scanner.pos;
    }
    cut
}

/// True when the host form is plain text without escapes.
pub fn is_plain(host: &str) -> bool {
    host.bytes().all(is_literal)
}
