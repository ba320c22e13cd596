//! Floating-point to `(sign, mantissa, exponent)` decimal normalization
//! (spec §4.6), such that `v = (negative ? -1 : 1) * mantissa * 10^(-exponent)`.

use std::convert::TryFrom;

/// A `(negative, mantissa, exponent)` triple produced by a [`Decimalizer`]
/// strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    /// Whether the original value was negative.
    pub negative: bool,
    /// Unsigned digit magnitude.
    pub mantissa: u64,
    /// Number of digits counted from the right that fall after the
    /// decimal point.
    pub exponent: u32,
}

const LITE_MAX_EXPONENT: u32 = 18;

/// For `exponent` in `0..=18`, accepts `mantissa` such that `|v| ==
/// mantissa * 10^-exponent` holds *exactly* - not merely that dividing
/// `mantissa` back out by a floating-point `10^exponent` happens to
/// round back to `v`. Every finite `f64` is itself an exact dyadic
/// rational (`significand * 2^exp2`), so exactness is checked with
/// integer arithmetic instead of further floating-point division, which
/// is what lets this correctly reject values like `0.1`: `0.1_f64` is
/// not *exactly* `1/10` (no binary fraction is), but `1.0 / 10.0`
/// happens to round back to the same bit pattern, which a
/// division-based round-trip check can't tell apart from a true exact
/// match.
pub fn lite(v: f64) -> Option<Decimal> {
    if !v.is_finite() {
        return None;
    }

    let abs = v.abs();
    if abs == 0.0 {
        return Some(Decimal {
            negative: false,
            mantissa: 0,
            exponent: 0,
        });
    }

    let negative = v.is_sign_negative();
    let (significand, exp2) = dyadic_parts(abs);

    for exponent in 0..=LITE_MAX_EXPONENT {
        if let Some(mantissa) = exact_decimal_mantissa(significand, exp2, exponent) {
            return Some(Decimal {
                negative,
                mantissa,
                exponent,
            });
        }
    }

    None
}

/// Decomposes a finite, nonzero, non-negative `f64` into `(significand,
/// exp2)` such that `v == significand * 2^exp2` exactly, handling both
/// normal and subnormal encodings.
fn dyadic_parts(v: f64) -> (u64, i64) {
    let bits = v.to_bits();
    let biased_exponent = ((bits >> 52) & 0x7FF) as i64;
    let fraction = bits & 0x000F_FFFF_FFFF_FFFF;

    if biased_exponent == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1 << 52), biased_exponent - 1075)
    }
}

/// Checks whether `significand * 2^exp2 * 10^exponent` is an exact
/// integer that fits in a `u64`, returning it if so. `10^exponent ==
/// 2^exponent * 5^exponent`, so this reduces to multiplying by
/// `5^exponent` and then shifting by `exp2 + exponent` bits - a right
/// shift must drop only zero bits, or the value doesn't terminate at
/// this `exponent`.
fn exact_decimal_mantissa(significand: u64, exp2: i64, exponent: u32) -> Option<u64> {
    let mut scaled: u128 = significand as u128;
    for _ in 0..exponent {
        scaled = scaled.checked_mul(5)?;
    }

    let shift = exp2 + exponent as i64;
    let exact: u128 = if shift >= 0 {
        let shift = u32::try_from(shift).ok()?;
        scaled.checked_shl(shift)?
    } else {
        let drop = u32::try_from(-shift).ok()?;
        if drop >= 128 || scaled & ((1u128 << drop) - 1) != 0 {
            return None;
        }
        scaled >> drop
    };

    u64::try_from(exact).ok()
}

/// Valid input range for [`big_decimal`]: `|v| \in [1e-29, 1e45]` (plus
/// zero), avoiding pathological exponents outside that band.
const BIG_DECIMAL_MIN: f64 = 1e-29;
const BIG_DECIMAL_MAX: f64 = 1e45;

/// Constructs an arbitrary-precision decimal from `v`'s canonical `f64`
/// textual representation (equivalent to Java's `new BigDecimal(double)`
/// stripped to `(unscaledValue, scale)`), restricted to `|v| \in [1e-29,
/// 1e45]`. Fails if the unscaled value doesn't fit in a `u64`.
pub fn big_decimal(v: f64) -> Option<Decimal> {
    if !v.is_finite() {
        return None;
    }
    if v == 0.0 {
        return Some(Decimal {
            negative: false,
            mantissa: 0,
            exponent: 0,
        });
    }

    let abs = v.abs();
    if !(BIG_DECIMAL_MIN..=BIG_DECIMAL_MAX).contains(&abs) {
        return None;
    }

    let negative = v.is_sign_negative();

    // `{:e}` gives the shortest round-tripping decimal representation,
    // i.e. exactly the digits Rust's own float formatter considers
    // canonical - the same role Java's `Double.toString`-derived
    // `BigDecimal(double)` constructor plays for the source system.
    let text = format!("{abs:e}");
    let (digits_part, exp_part) = text.split_once('e')?;
    let sci_exponent: i32 = exp_part.parse().ok()?;

    let (int_part, frac_part) = match digits_part.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits_part, ""),
    };

    let mut digits = String::with_capacity(int_part.len() + frac_part.len());
    digits.push_str(int_part);
    digits.push_str(frac_part);

    let mantissa: u64 = digits.parse().ok()?;
    let exponent = frac_part.len() as i32 - sci_exponent;

    if exponent < 0 {
        return None;
    }

    Some(Decimal {
        negative,
        mantissa,
        exponent: exponent as u32,
    })
}

/// Tries [`lite`] first, falling back to [`big_decimal`] on failure.
pub fn to_decimal(v: f64) -> Option<Decimal> {
    lite(v).or_else(|| big_decimal(v))
}

/// Formats a [`Decimal`] as the human-readable digit string the append-
/// decimal codec produces: digits left to right, a `.` inserted
/// `exponent` digits from the right, leading-zero padding when `exponent
/// >= digits`, and a leading `-` when negative.
pub fn format_decimal(d: Decimal) -> String {
    let digits = d.mantissa.to_string();
    let mut body = if d.exponent == 0 {
        digits
    } else {
        let exponent = d.exponent as usize;
        if exponent >= digits.len() {
            let mut padded = "0".repeat(exponent - digits.len() + 1);
            padded.push_str(&digits);
            let point = padded.len() - exponent;
            format!("{}.{}", &padded[..point], &padded[point..])
        } else {
            let point = digits.len() - exponent;
            format!("{}.{}", &digits[..point], &digits[point..])
        }
    };

    if d.negative && d.mantissa != 0 {
        body.insert(0, '-');
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lite_handles_terminating_fractions() {
        let d = lite(1234.5).unwrap();
        assert_eq!(d, Decimal {
            negative: false,
            mantissa: 12345,
            exponent: 1,
        });
        assert_eq!(format_decimal(d), "1234.5");
    }

    #[test]
    fn lite_fails_for_point_one_s5() {
        assert_eq!(lite(0.1), None);
    }

    #[test]
    fn lite_succeeds_for_exact_sub_unity_fractions() {
        assert_eq!(lite(0.5), Some(Decimal { negative: false, mantissa: 5, exponent: 1 }));
        assert_eq!(lite(0.25), Some(Decimal { negative: false, mantissa: 25, exponent: 2 }));
        assert_eq!(lite(0.125), Some(Decimal { negative: false, mantissa: 125, exponent: 3 }));
        assert_eq!(format_decimal(lite(0.5).unwrap()), "0.5");
    }

    #[test]
    fn instance_falls_back_to_big_decimal_for_point_one_s5() {
        let d = to_decimal(0.1).unwrap();
        assert_eq!(d, Decimal {
            negative: false,
            mantissa: 1,
            exponent: 1,
        });
    }

    #[test]
    fn negative_values_round_trip() {
        let d = to_decimal(-2.5).unwrap();
        assert!(d.negative);
        assert_eq!(format_decimal(d), "-2.5");
    }

    #[test]
    fn zero_formats_without_sign() {
        let d = to_decimal(0.0).unwrap();
        assert_eq!(format_decimal(d), "0");
    }

    #[test]
    fn big_decimal_rejects_out_of_band_magnitudes() {
        assert_eq!(big_decimal(1e-40), None);
        assert_eq!(big_decimal(1e60), None);
    }

    #[test]
    fn lite_round_trips_integers() {
        let d = lite(42.0).unwrap();
        assert_eq!(format_decimal(d), "42");
    }
}
