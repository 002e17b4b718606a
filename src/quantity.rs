//! Size quantities
//!
//! Parses Kubernetes-style quantity strings (`1Ki`, `10Gi`, `500M`, `1e3`)
//! into exact decimal values, and converts the decimal byte counts reported by
//! the host tools into [`Quantity`] values for the resource status.

use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Largest decimal scale kept exact, `10^38` still fits an `i128`
const MAX_SCALE: u32 = 38;

/// An exact decimal value, `mantissa / 10^scale`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExactQuantity {
    pub mantissa: i128,
    pub scale: u32,
}

impl ExactQuantity {
    pub const ZERO: ExactQuantity = ExactQuantity {
        mantissa: 0,
        scale: 0,
    };

    /// The integer value, or `None` when the quantity has a fractional part
    pub fn to_integer(self) -> Option<i128> {
        let divisor = 10i128.checked_pow(self.scale)?;
        if self.mantissa % divisor != 0 {
            return None;
        }
        Some(self.mantissa / divisor)
    }

    /// Whether `value` is strictly greater than this quantity
    pub fn is_exceeded_by(self, value: i128) -> bool {
        let scaled = 10i128
            .checked_pow(self.scale)
            .and_then(|factor| value.checked_mul(factor));
        match scaled {
            Some(scaled) => scaled > self.mantissa,
            // |value * 10^scale| is beyond any mantissa
            None => value > 0,
        }
    }
}

/// Parse a quantity string into an exact decimal value.
pub fn parse_exact(input: &str) -> std::result::Result<ExactQuantity, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty quantity".into());
    }

    let (negative, s) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let number_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(number_end);
    if number.is_empty() || number == "." {
        return Err(format!("invalid number in quantity {:?}", input));
    }

    let (whole, fraction) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    if fraction.contains('.') {
        return Err(format!("invalid number in quantity {:?}", input));
    }

    let (multiplier, exponent): (i128, i32) = match suffix {
        "" => (1, 0),
        "Ki" => (1 << 10, 0),
        "Mi" => (1 << 20, 0),
        "Gi" => (1 << 30, 0),
        "Ti" => (1 << 40, 0),
        "Pi" => (1 << 50, 0),
        "Ei" => (1 << 60, 0),
        "k" => (1, 3),
        "M" => (1, 6),
        "G" => (1, 9),
        "T" => (1, 12),
        "P" => (1, 15),
        "E" => (1, 18),
        "m" => (1, -3),
        other if other.starts_with(['e', 'E']) => {
            let exp: i32 = other[1..]
                .parse()
                .map_err(|_| format!("invalid exponent in quantity {:?}", input))?;
            (1, exp)
        }
        other => return Err(format!("unknown suffix {:?} in quantity {:?}", other, input)),
    };

    let digits = format!("{}{}", whole, fraction);
    let mantissa: i128 = digits
        .parse()
        .map_err(|_| format!("number out of range in quantity {:?}", input))?;
    if mantissa == 0 {
        return Ok(ExactQuantity::ZERO);
    }

    let out_of_range = || format!("quantity {:?} out of range", input);
    let mut mantissa = mantissa.checked_mul(multiplier).ok_or_else(out_of_range)?;
    let mut scale = fraction.len() as u32;

    if exponent >= 0 {
        let exponent = exponent.unsigned_abs();
        let absorbed = exponent.min(scale);
        scale -= absorbed;
        mantissa = 10i128
            .checked_pow(exponent - absorbed)
            .and_then(|factor| mantissa.checked_mul(factor))
            .ok_or_else(out_of_range)?;
    } else {
        scale = scale
            .checked_add(exponent.unsigned_abs())
            .ok_or_else(out_of_range)?;
    }

    while scale > 0 && mantissa % 10 == 0 {
        mantissa /= 10;
        scale -= 1;
    }
    if scale > MAX_SCALE {
        return Err(format!("quantity {:?} has too many decimal places", input));
    }

    Ok(ExactQuantity {
        mantissa: if negative { -mantissa } else { mantissa },
        scale,
    })
}

/// Parse a quantity string into an exact integer value.
///
/// Fractional results (`1.5` or `100m`) are rejected since every quantity
/// handled here is a byte count.
pub fn parse_quantity(input: &str) -> std::result::Result<i128, String> {
    parse_exact(input)?
        .to_integer()
        .ok_or_else(|| format!("quantity {:?} is not a whole number", input))
}

/// Parse a quantity that must describe a non-negative byte count
pub fn parse_bytes(field: &str, input: &str) -> Result<u64> {
    let value = parse_quantity(input).map_err(|reason| Error::QuantityConversion {
        field: field.to_string(),
        reason,
    })?;
    u64::try_from(value).map_err(|_| Error::QuantityConversion {
        field: field.to_string(),
        reason: format!("{} is not a valid byte count", value),
    })
}

/// Convert a host-reported size (decimal bytes, optionally with a `B` suffix)
/// into a status quantity
pub fn host_size_to_quantity(field: &str, size: &str) -> Result<Quantity> {
    let trimmed = size.trim();
    let digits = trimmed.strip_suffix(['B', 'b']).unwrap_or(trimmed);
    // Host tools print fractional bytes as "123.00"
    let digits = digits.strip_suffix(".00").unwrap_or(digits);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::QuantityConversion {
            field: field.to_string(),
            reason: format!("unparseable host size {:?}", size),
        });
    }
    let bytes: u64 = digits.parse().map_err(|_| Error::QuantityConversion {
        field: field.to_string(),
        reason: format!("host size {:?} out of range", size),
    })?;
    Ok(Quantity(bytes.to_string()))
}

/// Render a quantity as the byte argument the host tools expect
pub fn quantity_to_host_bytes(field: &str, quantity: &Quantity) -> Result<String> {
    parse_bytes(field, &quantity.0).map(|bytes| format!("{}b", bytes))
}
