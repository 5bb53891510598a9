//! Money Amounts
//!
//! All balances and transfer amounts are integer minor units (cents).
//! Wire formats carry decimal strings; parsing validates precision instead
//! of truncating.

use crate::error::PaymentError;

/// Decimal places carried on the wire. Minor units are cents.
pub const AMOUNT_DECIMALS: u32 = 2;

/// Parse a decimal amount string into minor units
///
/// Rejects empty input, negative values, excess precision, and zero.
pub fn parse_amount(s: &str) -> Result<u64, PaymentError> {
    let s = s.trim();

    if s.is_empty() {
        return Err(PaymentError::InvalidAmount(
            "amount must not be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = s.split('.').collect();

    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => (parts[0], parts[1]),
        _ => {
            return Err(PaymentError::InvalidAmount(format!(
                "malformed amount: {}",
                s
            )));
        }
    };

    let whole_num: u64 = whole
        .parse()
        .map_err(|_| PaymentError::InvalidAmount(format!("malformed amount: {}", s)))?;

    // Reject excess precision instead of silently truncating
    if frac.len() > AMOUNT_DECIMALS as usize {
        return Err(PaymentError::InvalidAmount(format!(
            "at most {} decimal places allowed",
            AMOUNT_DECIMALS
        )));
    }

    // Pad fractional part to full width ("4" -> "40")
    let frac_str = format!("{:0<width$}", frac, width = AMOUNT_DECIMALS as usize);
    let frac_num: u64 = frac_str[..AMOUNT_DECIMALS as usize]
        .parse()
        .map_err(|_| PaymentError::InvalidAmount(format!("malformed amount: {}", s)))?;

    let multiplier = 10u64.pow(AMOUNT_DECIMALS);
    let amount = whole_num
        .checked_mul(multiplier)
        .and_then(|v| v.checked_add(frac_num))
        .ok_or_else(|| PaymentError::InvalidAmount("amount overflow".to_string()))?;

    if amount == 0 {
        return Err(PaymentError::InvalidAmount(
            "amount must be greater than zero".to_string(),
        ));
    }

    Ok(amount)
}

/// Format minor units as a decimal string ("12345" -> "123.45")
pub fn format_amount(amount: u64) -> String {
    let divisor = 10u64.pow(AMOUNT_DECIMALS);
    let whole = amount / divisor;
    let frac = amount % divisor;
    format!("{}.{:0>width$}", whole, frac, width = AMOUNT_DECIMALS as usize)
}
