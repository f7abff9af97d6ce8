//! Decimal-string amount conversion.
//!
//! Wallet operations carry amounts as decimal strings ("0.1", "1.5") and
//! chains consume integer base units (lamports, token base units). The
//! conversion is done in integer arithmetic; floats never touch amounts.

use crate::error::HostError;

/// Converts a decimal string to integer base units.
///
/// # Errors
///
/// Fails with [`HostError::InvalidArgs`] on malformed input, more fractional
/// digits than `decimals`, or overflow.
pub fn to_base_units(amount: &str, decimals: u8) -> Result<u128, HostError> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(HostError::invalid_args("amount must not be empty"));
    }
    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(HostError::invalid_args(format!("invalid amount: {amount}")));
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(HostError::invalid_args(format!("invalid amount: {amount}")));
    }
    if frac_part.len() > usize::from(decimals) {
        return Err(HostError::invalid_args(format!(
            "amount {amount} has more than {decimals} decimal places"
        )));
    }

    let scale = 10u128
        .checked_pow(u32::from(decimals))
        .ok_or_else(|| HostError::invalid_args("decimals out of range"))?;
    let int_value: u128 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| HostError::invalid_args(format!("amount too large: {amount}")))?
    };

    let mut frac_value: u128 = 0;
    if !frac_part.is_empty() {
        frac_value = frac_part
            .parse()
            .map_err(|_| HostError::invalid_args(format!("invalid amount: {amount}")))?;
        frac_value *= 10u128.pow(u32::from(decimals) - frac_part.len() as u32);
    }

    int_value
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_value))
        .ok_or_else(|| HostError::invalid_args(format!("amount too large: {amount}")))
}

/// Formats integer base units as a decimal string, trimming trailing zeros.
#[must_use]
pub fn from_base_units(value: u128, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string();
    }
    let scale = 10u128.pow(u32::from(decimals));
    let int_part = value / scale;
    let frac_part = value % scale;
    if frac_part == 0 {
        return int_part.to_string();
    }
    let frac = format!("{frac_part:0width$}", width = usize::from(decimals));
    let frac = frac.trim_end_matches('0');
    format!("{int_part}.{frac}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_amounts() {
        assert_eq!(to_base_units("1", 9).unwrap(), 1_000_000_000);
        assert_eq!(to_base_units("0", 9).unwrap(), 0);
    }

    #[test]
    fn test_fractional_amounts() {
        assert_eq!(to_base_units("0.1", 9).unwrap(), 100_000_000);
        assert_eq!(to_base_units("1.5", 6).unwrap(), 1_500_000);
        assert_eq!(to_base_units(".5", 1).unwrap(), 5);
    }

    #[test]
    fn test_too_many_decimals() {
        assert!(to_base_units("0.0000000001", 9).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(to_base_units("", 9).is_err());
        assert!(to_base_units("1.2.3", 9).is_err());
        assert!(to_base_units("-1", 9).is_err());
        assert!(to_base_units("1e9", 9).is_err());
        assert!(to_base_units(".", 9).is_err());
    }

    #[test]
    fn test_format_roundtrip() {
        assert_eq!(from_base_units(1_500_000, 6), "1.5");
        assert_eq!(from_base_units(100_000_000, 9), "0.1");
        assert_eq!(from_base_units(7, 0), "7");
        assert_eq!(from_base_units(1_000_000_000, 9), "1");
    }
}
