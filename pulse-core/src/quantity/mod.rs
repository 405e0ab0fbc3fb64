//! Unit-suffixed literals accepted for frequency, duty cycle and duration.
//!
//! Decimal literals are scaled with integer arithmetic, so `1.5kHz` is exactly
//! 1500 Hz and `2.5ms` exactly 2 500 000 ns.

use core::fmt;
use core::time::Duration;

use winnow::ascii::{Caseless, digit1, space0};
use winnow::combinator::{alt, opt, preceded};
use winnow::prelude::*;

/// Failure to read a quantity literal.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QuantityError {
    /// The text is not a number followed by a known unit.
    Syntax,
    /// The value does not fit the target type.
    Overflow,
    /// The frequency does not resolve to a whole number of hertz.
    FractionalHertz,
    /// The frequency resolves to zero.
    ZeroFrequency,
}

impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantityError::Syntax => f.write_str("expected a number with an optional unit"),
            QuantityError::Overflow => f.write_str("value is too large"),
            QuantityError::FractionalHertz => {
                f.write_str("frequency must be a whole number of Hz")
            }
            QuantityError::ZeroFrequency => f.write_str("frequency must be greater than 0 Hz"),
        }
    }
}

impl core::error::Error for QuantityError {}

#[derive(Copy, Clone, Debug)]
struct Literal<'a> {
    whole: &'a str,
    fraction: &'a str,
}

impl Literal<'_> {
    /// Value times `10^exponent`, truncated; the flag reports whether
    /// truncation dropped non-zero digits.
    fn scaled(&self, exponent: u32) -> Result<(u64, bool), QuantityError> {
        let multiplier = 10_u64.checked_pow(exponent).ok_or(QuantityError::Overflow)?;
        let mut value = self
            .whole
            .parse::<u64>()
            .map_err(|_| QuantityError::Overflow)?
            .checked_mul(multiplier)
            .ok_or(QuantityError::Overflow)?;
        let mut exact = true;

        for (place, digit) in (1_u32..).zip(self.fraction.bytes()) {
            let digit = u64::from(digit - b'0');
            if place <= exponent {
                value = value
                    .checked_add(digit * 10_u64.pow(exponent - place))
                    .ok_or(QuantityError::Overflow)?;
            } else if digit != 0 {
                exact = false;
            }
        }

        Ok((value, exact))
    }
}

fn literal<'a>(input: &mut &'a str) -> ModalResult<Literal<'a>> {
    (digit1, opt(preceded('.', digit1)))
        .map(|(whole, fraction): (&'a str, Option<&'a str>)| Literal {
            whole,
            fraction: fraction.unwrap_or(""),
        })
        .parse_next(input)
}

/// Power of ten converting the unit to hertz.
fn frequency_unit(input: &mut &str) -> ModalResult<u32> {
    opt(alt((
        Caseless("mhz").value(6_u32),
        Caseless("khz").value(3_u32),
        Caseless("hz").value(0_u32),
    )))
    .map(|exponent| exponent.unwrap_or(0))
    .parse_next(input)
}

/// Power of ten converting the unit to nanoseconds.
fn duration_unit(input: &mut &str) -> ModalResult<u32> {
    opt(alt((
        Caseless("ms").value(6_u32),
        Caseless("us").value(3_u32),
        "µs".value(3_u32),
        Caseless("ns").value(0_u32),
        Caseless("s").value(9_u32),
    )))
    .map(|exponent| exponent.unwrap_or(9))
    .parse_next(input)
}

/// Parses `10000`, `10kHz`, `1.5kHz` or `2MHz` into hertz.
///
/// # Errors
///
/// Returns a [`QuantityError`] for malformed text, a fractional or zero
/// result, or a value above `u32::MAX`.
pub fn parse_frequency(text: &str) -> Result<u32, QuantityError> {
    let (literal, exponent) = (literal, preceded(space0, frequency_unit))
        .parse(text.trim())
        .map_err(|_| QuantityError::Syntax)?;

    let (hertz, exact) = literal.scaled(exponent)?;
    if !exact {
        return Err(QuantityError::FractionalHertz);
    }
    if hertz == 0 {
        return Err(QuantityError::ZeroFrequency);
    }
    u32::try_from(hertz).map_err(|_| QuantityError::Overflow)
}

/// Parses `25` or `12.5%` into a percentage.
///
/// Range checking is left to request validation.
///
/// # Errors
///
/// Returns [`QuantityError::Syntax`] for malformed text.
pub fn parse_duty_cycle(text: &str) -> Result<f64, QuantityError> {
    let number = (literal.take(), space0, opt('%'))
        .map(|(number, _, _): (&str, &str, Option<char>)| number)
        .parse(text.trim())
        .map_err(|_| QuantityError::Syntax)?;

    number.parse::<f64>().map_err(|_| QuantityError::Syntax)
}

/// Parses `5`, `2.5s`, `500ms`, `250us` or `40ns`; bare numbers are seconds.
///
/// Digits below one nanosecond are truncated.
///
/// # Errors
///
/// Returns a [`QuantityError`] for malformed text or an overflowing value.
pub fn parse_duration(text: &str) -> Result<Duration, QuantityError> {
    let (literal, exponent) = (literal, preceded(space0, duration_unit))
        .parse(text.trim())
        .map_err(|_| QuantityError::Syntax)?;

    let (nanos, _) = literal.scaled(exponent)?;
    Ok(Duration::from_nanos(nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_literals() {
        let cases = [
            ("10000", 10_000),
            ("10kHz", 10_000),
            ("10 khz", 10_000),
            ("1.5kHz", 1_500),
            ("2MHz", 2_000_000),
            ("0.25MHz", 250_000),
            ("60Hz", 60),
            ("  440  ", 440),
        ];
        for (text, expected) in cases {
            assert_eq!(parse_frequency(text), Ok(expected), "{text}");
        }
    }

    #[test]
    fn frequency_rejects_non_whole_or_zero() {
        assert_eq!(parse_frequency("1.5"), Err(QuantityError::FractionalHertz));
        assert_eq!(parse_frequency("1.0001kHz"), Err(QuantityError::FractionalHertz));
        assert_eq!(parse_frequency("0kHz"), Err(QuantityError::ZeroFrequency));
        assert_eq!(parse_frequency("5000MHz"), Err(QuantityError::Overflow));
        assert_eq!(parse_frequency("fast"), Err(QuantityError::Syntax));
        assert_eq!(parse_frequency("10 kHz!"), Err(QuantityError::Syntax));
        assert_eq!(parse_frequency("-5"), Err(QuantityError::Syntax));
        assert_eq!(parse_frequency(""), Err(QuantityError::Syntax));
    }

    #[test]
    fn duty_cycle_literals() {
        let cases = [("25", 25.0), ("12.5%", 12.5), ("100 %", 100.0), ("0", 0.0)];
        for (text, expected) in cases {
            let value = parse_duty_cycle(text).expect(text);
            assert!((value - expected).abs() < f64::EPSILON, "{text}");
        }
        assert_eq!(parse_duty_cycle("half"), Err(QuantityError::Syntax));
        assert_eq!(parse_duty_cycle("50%%"), Err(QuantityError::Syntax));
    }

    #[test]
    fn duration_literals() {
        let cases = [
            ("5", Duration::from_secs(5)),
            ("2.5s", Duration::from_millis(2_500)),
            ("500ms", Duration::from_millis(500)),
            ("250us", Duration::from_micros(250)),
            ("250µs", Duration::from_micros(250)),
            ("0.7ms", Duration::from_micros(700)),
            ("40ns", Duration::from_nanos(40)),
            ("1.0000000009", Duration::from_secs(1)),
        ];
        for (text, expected) in cases {
            assert_eq!(parse_duration(text), Ok(expected), "{text}");
        }
        assert_eq!(parse_duration("5 minutes"), Err(QuantityError::Syntax));
    }
}
