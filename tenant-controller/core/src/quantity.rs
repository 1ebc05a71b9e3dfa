//! Kubernetes resource quantities.
//!
//! Values are held as a signed count of nano-units so that every suffix the
//! API server accepts (`n` through `E`, `Ki` through `Ei`, and decimal
//! exponents) can be summed and compared without loss. The original
//! formatting family is remembered so that canonical serialization keeps
//! binary quantities binary.

use std::{cmp::Ordering, fmt, iter::Sum, ops::Add, str::FromStr};

const NANOS_PER_UNIT: i128 = 1_000_000_000;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Format {
    #[default]
    DecimalSi,
    BinarySi,
    DecimalExponent,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Quantity {
    nanos: i128,
    format: Format,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("quantity is empty")]
    Empty,

    #[error("invalid quantity {0:?}")]
    Invalid(String),

    #[error("quantity {0:?} is out of range")]
    OutOfRange(String),
}

// === impl Quantity ===

impl Quantity {
    pub const ZERO: Self = Self {
        nanos: 0,
        format: Format::DecimalSi,
    };

    pub fn from_units(units: i64) -> Self {
        Self {
            nanos: i128::from(units) * NANOS_PER_UNIT,
            format: Format::DecimalSi,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Adds two quantities. A zero receiver adopts the other operand's format.
    pub fn checked_add(self, other: Self) -> Option<Self> {
        let nanos = self.nanos.checked_add(other.nanos)?;
        let format = if self.nanos == 0 {
            other.format
        } else {
            self.format
        };
        Some(Self { nanos, format })
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        let nanos = self.nanos.checked_sub(other.nanos)?;
        Some(Self {
            nanos,
            format: self.format,
        })
    }

    /// The value as a floating-point number of whole units.
    pub fn as_f64(&self) -> f64 {
        self.nanos as f64 / NANOS_PER_UNIT as f64
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Add for Quantity {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        let format = if self.nanos == 0 {
            other.format
        } else {
            self.format
        };
        Self {
            nanos: self.nanos.saturating_add(other.nanos),
            format,
        }
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'q> Sum<&'q Quantity> for Quantity {
    fn sum<I: Iterator<Item = &'q Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl FromStr for Quantity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        let invalid = || ParseError::Invalid(s.to_string());
        let out_of_range = || ParseError::OutOfRange(s.to_string());

        let (negative, unsigned) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let split = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(split);
        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(invalid());
        }
        let (multiplier, exponent, format) = parse_suffix(suffix).ok_or_else(invalid)?;

        let mut mantissa: i128 = 0;
        for digit in whole.bytes().chain(fraction.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(digit - b'0')))
                .ok_or_else(out_of_range)?;
        }
        let mantissa = mantissa.checked_mul(multiplier).ok_or_else(out_of_range)?;

        // Shift the mantissa into nano-units, rounding any sub-nano remainder up.
        let scale = i64::from(exponent) + 9 - fraction.len() as i64;
        let nanos = if scale >= 0 {
            let factor = u32::try_from(scale)
                .ok()
                .and_then(|s| 10i128.checked_pow(s))
                .ok_or_else(out_of_range)?;
            mantissa.checked_mul(factor).ok_or_else(out_of_range)?
        } else {
            match u32::try_from(-scale).ok().and_then(|s| 10i128.checked_pow(s)) {
                Some(divisor) => {
                    let truncated = mantissa / divisor;
                    if mantissa % divisor == 0 {
                        truncated
                    } else {
                        truncated + 1
                    }
                }
                None if mantissa == 0 => 0,
                None => 1,
            }
        };

        Ok(Self {
            nanos: if negative { -nanos } else { nanos },
            format,
        })
    }
}

fn parse_suffix(suffix: &str) -> Option<(i128, i32, Format)> {
    let binary = |shift: u32| Some((1i128 << shift, 0, Format::BinarySi));
    let decimal = |exponent: i32| Some((1, exponent, Format::DecimalSi));
    match suffix {
        "Ki" => binary(10),
        "Mi" => binary(20),
        "Gi" => binary(30),
        "Ti" => binary(40),
        "Pi" => binary(50),
        "Ei" => binary(60),
        "n" => decimal(-9),
        "u" => decimal(-6),
        "m" => decimal(-3),
        "" => decimal(0),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        other => {
            let exponent = other.strip_prefix(|c| c == 'e' || c == 'E')?;
            let exponent = exponent.parse::<i32>().ok()?;
            Some((1, exponent, Format::DecimalExponent))
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }

        if self.format == Format::BinarySi && self.nanos % NANOS_PER_UNIT == 0 {
            let units = self.nanos / NANOS_PER_UNIT;
            if units.abs() >= 1024 {
                const SUFFIXES: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
                let mut value = units;
                let mut power = 0;
                while power < SUFFIXES.len() - 1 && value % 1024 == 0 {
                    value /= 1024;
                    power += 1;
                }
                return write!(f, "{}{}", value, SUFFIXES[power]);
            }
        }

        // Find the largest power of 1000 (from nano upwards) that divides the value.
        let mut value = self.nanos;
        let mut exponent = -9;
        while exponent < 18 && value % 1000 == 0 {
            value /= 1000;
            exponent += 3;
        }

        if self.format == Format::DecimalExponent {
            return match exponent {
                0 => write!(f, "{}", value),
                e => write!(f, "{}e{}", value, e),
            };
        }

        let suffix = match exponent {
            -9 => "n",
            -6 => "u",
            -3 => "m",
            0 => "",
            3 => "k",
            6 => "M",
            9 => "G",
            12 => "T",
            15 => "P",
            _ => "E",
        };
        write!(f, "{}{}", value, suffix)
    }
}
