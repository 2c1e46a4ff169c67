//! Fixed-point conversions between on-chain integers and human units.
//!
//! Chain values arrive as U256 in several scales: token amounts in the
//! reserve's decimals, prices and base-currency values in 8 decimals,
//! thresholds in basis points, and health factors in WAD. Policy math runs in
//! f64; conversion back to integers only happens for token amounts.

use alloy::primitives::U256;

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Basis points denominator (10000 = 100%)
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Oracle price and base currency decimals (8)
pub const PRICE_DECIMALS: u8 = 8;

/// Health factor used when a position has no debt.
pub const NO_DEBT_HEALTH_FACTOR: f64 = f64::MAX;

/// Power of ten as U256. Exponents beyond 77 overflow and saturate.
#[inline]
pub fn pow10(exp: u8) -> U256 {
    U256::from(10u64).saturating_pow(U256::from(exp))
}

/// Lossy U256 -> f64 using all four limbs.
#[inline]
pub fn u256_to_f64(value: U256) -> f64 {
    const LIMB: f64 = 18_446_744_073_709_551_616.0; // 2^64
    value
        .as_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * LIMB + *limb as f64)
}

/// Token amount in `decimals` -> human units.
#[inline]
pub fn to_units(raw: U256, decimals: u8) -> f64 {
    u256_to_f64(raw) / 10f64.powi(decimals as i32)
}

/// Base currency value (8 decimals) -> USD.
#[inline]
pub fn base_to_usd(base: U256) -> f64 {
    to_units(base, PRICE_DECIMALS)
}

/// Basis points -> ratio (8250 -> 0.825).
#[inline]
pub fn bps_to_ratio(bps: U256) -> f64 {
    u256_to_f64(bps) / BPS_DENOMINATOR as f64
}

/// WAD health factor -> f64. `U256::MAX` (no debt) maps to [`NO_DEBT_HEALTH_FACTOR`].
#[inline]
pub fn health_factor_from_wad(wad: U256) -> f64 {
    if wad == U256::MAX {
        NO_DEBT_HEALTH_FACTOR
    } else {
        u256_to_f64(wad) / 1e18
    }
}

/// USD value of `raw` tokens at an 8-decimal oracle price.
#[inline]
pub fn usd_value(raw: U256, price: U256, decimals: u8) -> f64 {
    to_units(raw, decimals) * base_to_usd(price)
}

/// Human amount -> raw token units, truncating digits beyond `decimals`.
///
/// Works from the shortest decimal rendering of `amount`, so `0.1` with 18
/// decimals becomes exactly `100000000000000000`. Returns `None` for
/// non-finite, zero or negative amounts, or when the result overflows.
pub fn parse_units(amount: f64, decimals: u8) -> Option<U256> {
    if !amount.is_finite() || amount <= 0.0 {
        return None;
    }

    // f64 Display never uses exponent notation.
    let rendered = amount.to_string();
    let (whole, fraction) = rendered.split_once('.').unwrap_or((&rendered, ""));

    let mut digits = String::with_capacity(whole.len() + decimals as usize);
    digits.push_str(whole);
    for i in 0..decimals as usize {
        digits.push(fraction.as_bytes().get(i).map_or('0', |b| *b as char));
    }

    let raw = U256::from_str_radix(&digits, 10).ok()?;
    (!raw.is_zero()).then_some(raw)
}

/// Render a health factor for humans: three decimals, `inf` without debt.
pub fn format_health_factor(hf: f64) -> String {
    if hf >= NO_DEBT_HEALTH_FACTOR || hf.is_infinite() {
        "inf".to_string()
    } else {
        format!("{hf:.3}")
    }
}

/// Safe minimum of two U256 values
#[inline]
pub fn min(a: U256, b: U256) -> U256 {
    if a < b {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow10() {
        assert_eq!(pow10(0), U256::from(1u64));
        assert_eq!(pow10(6), U256::from(1_000_000u64));
        assert_eq!(pow10(18), WAD);
    }

    #[test]
    fn test_u256_to_f64_large_values() {
        assert_eq!(u256_to_f64(U256::ZERO), 0.0);
        assert_eq!(u256_to_f64(U256::from(12_345u64)), 12_345.0);
        let big = U256::from(u128::MAX) + U256::from(1u64);
        assert_eq!(u256_to_f64(big), 2f64.powi(128));
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(to_units(U256::from(1_500_000u64), 6), 1.5);
        assert_eq!(base_to_usd(U256::from(100_000_000_000u64)), 1000.0);
        assert_eq!(bps_to_ratio(U256::from(8250u64)), 0.825);
        // 2 WETH at $3000
        let raw = U256::from(2u64) * WAD;
        assert_eq!(usd_value(raw, U256::from(300_000_000_000u64), 18), 6000.0);
    }

    #[test]
    fn test_health_factor_from_wad() {
        assert_eq!(health_factor_from_wad(U256::MAX), NO_DEBT_HEALTH_FACTOR);
        let hf = health_factor_from_wad(U256::from(1_800_000_000_000_000_000u64));
        assert!((hf - 1.8).abs() < 1e-12);
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units(500.0, 6), Some(U256::from(500_000_000u64)));
        assert_eq!(parse_units(0.1, 18), Some(U256::from(100_000_000_000_000_000u64)));
        assert_eq!(parse_units(1.234567891, 6), Some(U256::from(1_234_567u64)));
        assert_eq!(parse_units(0.0000001, 6), None);
        assert_eq!(parse_units(0.0, 6), None);
        assert_eq!(parse_units(-5.0, 6), None);
        assert_eq!(parse_units(f64::NAN, 6), None);
        assert_eq!(parse_units(f64::INFINITY, 6), None);
    }

    #[test]
    fn test_format_health_factor() {
        assert_eq!(format_health_factor(1.8), "1.800");
        assert_eq!(format_health_factor(0.95), "0.950");
        assert_eq!(format_health_factor(NO_DEBT_HEALTH_FACTOR), "inf");
    }
}
