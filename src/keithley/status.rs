//! Keithley 199 machine status decoding.
//!
//! The `U0X` reply is a fixed-layout ASCII string. Only a handful of offsets matter here:
//!
//! | Offset | Meaning |
//! |--------|---------|
//! | 0..3   | model id (`199`) |
//! | 3      | multiplex enabled |
//! | 5      | function code |
//! | 21     | range code (DCV only) |
//! | 22     | integration rate code |
//!
//! [`decode`] is total: every input yields a complete [`StatusReport`], and anything it does not
//! recognise becomes `Unknown`.

use serde::Serialize;
use std::fmt;

/// Shortest status string that carries every decoded field.
pub const STATUS_LEN: usize = 23;

const MULTIPLEX_OFFSET: usize = 3;
const FUNCTION_OFFSET: usize = 5;
const RANGE_OFFSET: usize = 21;
const RATE_OFFSET: usize = 22;

/// Measurement function.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Function {
    /// DC volts.
    DCV,
    /// AC volts.
    ACV,
    /// Resistance.
    OHMS,
    /// DC current.
    DCI,
    /// AC current.
    ACI,
    /// AC volts, dB.
    ACVdB,
    /// AC current, dB.
    ACAdB,
    /// Code not in the table.
    Unknown,
}

impl Function {
    fn from_code(code: Option<u32>) -> Self {
        match code {
            Some(0) => Function::DCV,
            Some(1) => Function::ACV,
            Some(2) => Function::OHMS,
            Some(3) => Function::DCI,
            Some(4) => Function::ACI,
            Some(5) => Function::ACVdB,
            Some(6) => Function::ACAdB,
            _ => Function::Unknown,
        }
    }
}

/// DC voltage range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Range {
    /// Autoranging.
    Auto,
    /// 300 mV.
    R300mV,
    /// 3 V.
    R3V,
    /// 30 V.
    R30V,
    /// 300 V.
    R300V,
    /// The function is not DCV, so the range code does not apply.
    NotApplicable,
    /// Code not in the table.
    Unknown,
}

impl Range {
    fn from_code(code: Option<u32>) -> Self {
        match code {
            Some(0) => Range::Auto,
            Some(1) => Range::R300mV,
            Some(2) => Range::R3V,
            Some(3) => Range::R30V,
            Some(4) => Range::R300V,
            _ => Range::Unknown,
        }
    }
}

/// Integration rate, expressed as display resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rate {
    /// 4½ digits.
    Digits4_5,
    /// 5½ digits.
    Digits5_5,
    /// Code not in the table.
    Unknown,
}

impl Rate {
    fn from_code(code: Option<u32>) -> Self {
        match code {
            Some(0) => Rate::Digits4_5,
            Some(1) => Rate::Digits5_5,
            _ => Rate::Unknown,
        }
    }
}

/// Decoded machine status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Model id (first three characters).
    pub id: String,
    /// Whether the scanner multiplexes inputs.
    pub multiplex_enabled: bool,
    /// Measurement function.
    pub function: Function,
    /// Range (DCV only).
    pub range: Range,
    /// Integration rate.
    pub rate: Rate,
}

impl StatusReport {
    /// Report for input too short or too garbled to decode.
    fn unknown(id: String) -> Self {
        Self {
            id,
            multiplex_enabled: false,
            function: Function::Unknown,
            range: Range::Unknown,
            rate: Rate::Unknown,
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} function={:?} range={:?} rate={:?} multiplex={}",
            self.id, self.function, self.range, self.rate, self.multiplex_enabled
        )
    }
}

/// Decode a raw status string.
///
/// Offsets count characters, not bytes. Input shorter than [`STATUS_LEN`] decodes to
/// `Unknown` fields with whatever id characters are present.
pub fn decode(raw: &str) -> StatusReport {
    let chars: Vec<char> = raw.chars().collect();
    let id: String = chars.iter().take(3).collect();

    if chars.len() < STATUS_LEN {
        return StatusReport::unknown(id);
    }

    let digit = |offset: usize| chars.get(offset).and_then(|c| c.to_digit(10));

    let function = Function::from_code(digit(FUNCTION_OFFSET));
    let range = if function == Function::DCV {
        Range::from_code(digit(RANGE_OFFSET))
    } else {
        Range::NotApplicable
    };

    StatusReport {
        id,
        multiplex_enabled: is_truthy(chars.get(MULTIPLEX_OFFSET).copied()),
        function,
        range,
        rate: Rate::from_code(digit(RATE_OFFSET)),
    }
}

/// Absent, `'0'` and whitespace are false; anything else is true.
fn is_truthy(c: Option<char>) -> bool {
    match c {
        None => false,
        Some(c) => c != '0' && !c.is_whitespace(),
    }
}
