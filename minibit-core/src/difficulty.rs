//! Compact encoding of proof-of-work targets and the retargeting rule.

use std::sync::LazyLock;

use num_bigint::{BigInt, Sign};

/// Highest proof of work value a block can have, the value 2^255 - 1.
///
/// In the Bitcoin mainnet it's 2^224 - 1.
pub static MAX_TARGET: LazyLock<BigInt> =
    LazyLock::new(|| (BigInt::from(1u8) << 255) - BigInt::from(1u8));

/// Difficulty of the genesis block.
///
/// In the Bitcoin mainnet, it's 0x1d00ffff.
pub const BASE_DIFFICULTY_BITS: u32 = 0x1e04ffff;

/// Desired time (in seconds) to generate each block.
///
/// In the Bitcoin mainnet, it's 10 minutes.
pub const TARGET_TIME_PER_BLOCK: i64 = 20;

/// Number of blocks until the difficulty is re-calculated.
///
/// In the Bitcoin mainnet, it's 2016.
pub const BLOCKS_RETARGET_PERIOD: i32 = 16;

/// Desired amount of time that should elapse before the block difficulty
/// requirement is examined to determine how it should be changed in order
/// to maintain the desired block generation rate.
pub const TARGET_TIMESPAN: i64 = TARGET_TIME_PER_BLOCK * BLOCKS_RETARGET_PERIOD as i64;

/// Adjustment factor used to limit the minimum and maximum amount of
/// adjustment that can occur between difficulty retargets.
const RETARGET_ADJUSTMENT_FACTOR: i64 = 4;
const MIN_RETARGET_TIMESPAN: i64 = TARGET_TIMESPAN / RETARGET_ADJUSTMENT_FACTOR;
const MAX_RETARGET_TIMESPAN: i64 = TARGET_TIMESPAN * RETARGET_ADJUSTMENT_FACTOR;

/// Recomputes the difficulty bits at a retarget boundary.
///
/// The actual timespan is clamped to a quarter/quadruple of the target
/// timespan and the new target is capped at [`MAX_TARGET`].
pub fn retarget_bits(old_bits: u32, actual_timespan: i64) -> u32 {
    tracing::debug!(
        "difficulty adjustment: target timespan {TARGET_TIMESPAN}s, actual timespan {actual_timespan}s"
    );

    let actual_timespan = actual_timespan.clamp(MIN_RETARGET_TIMESPAN, MAX_RETARGET_TIMESPAN);

    // nextDifficulty = currentDifficulty * actualTimespan / targetTimespan
    let old_target = compact_to_big(old_bits);
    let mut new_target = old_target * BigInt::from(actual_timespan) / BigInt::from(TARGET_TIMESPAN);

    if new_target > *MAX_TARGET {
        new_target = MAX_TARGET.clone();
    }

    let new_bits = big_to_compact(&new_target);
    tracing::debug!("old target: {old_bits:08x}");
    tracing::debug!("new target: {new_bits:08x}");

    new_bits
}

/// Converts a compact representation of a whole number N to a big integer.
/// The representation is similar to IEEE754 floating point numbers.
///
/// Like IEEE754 floating point, there are three basic components: the sign,
/// the exponent, and the mantissa. They are broken out as follows:
///
///   - the most significant 8 bits represent the unsigned base 256 exponent
///
///   - bit 23 (the 24th bit) represents the sign bit
///
///   - the least significant 23 bits represent the mantissa
///
/// The formula to calculate N is:
///
///	N = (-1^sign) * mantissa * 256^(exponent-3)
///
/// This compact form is only used to encode unsigned 256-bit numbers which
/// represent difficulty targets, thus there really is not a need for a sign
/// bit, but it is implemented here to stay consistent with bitcoind.
pub fn compact_to_big(compact: u32) -> BigInt {
    let mantissa = compact & 0x007f_ffff;
    let is_negative = compact & 0x0080_0000 != 0;
    let exponent = compact >> 24;

    // Since the base for the exponent is 256, the exponent can be treated
    // as the number of bytes to represent the full 256-bit number. So,
    // treat the exponent as the number of bytes and shift the mantissa
    // right or left accordingly. This is equivalent to:
    // N = mantissa * 256^(exponent-3)
    let n = if exponent <= 3 {
        BigInt::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigInt::from(mantissa) << (8 * (exponent - 3))
    };

    if is_negative {
        -n
    } else {
        n
    }
}

/// Converts a whole number N to a compact representation using an unsigned
/// 32-bit number. The compact representation only provides 23 bits of
/// precision, so values larger than (2^23 - 1) only encode the most
/// significant digits of the number. See [`compact_to_big`] for details.
pub fn big_to_compact(n: &BigInt) -> u32 {
    if n.sign() == Sign::NoSign {
        return 0;
    }

    // Since the base for the exponent is 256, the exponent can be treated
    // as the number of bytes. So, shift the number right or left
    // accordingly. This is equivalent to:
    // mantissa = mantissa / 256^(exponent-3)
    let bytes = n.magnitude().to_bytes_be();
    let mut exponent = bytes.len() as u32;
    let mut mantissa: u32 = if exponent <= 3 {
        let mut m = 0u32;
        for b in &bytes {
            m = (m << 8) | u32::from(*b);
        }
        m << (8 * (3 - exponent))
    } else {
        let shifted = n.magnitude() >> (8 * (exponent - 3));
        shifted.to_u32_digits().first().copied().unwrap_or(0)
    };

    // When the mantissa already has the sign bit set, the number is too
    // large to fit into the available 23-bits, so divide the number by 256
    // and increment the exponent accordingly.
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }

    let mut compact = (exponent << 24) | mantissa;
    if n.sign() == Sign::Minus {
        compact |= 0x0080_0000;
    }
    compact
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_target_compact() {
        assert_eq!(big_to_compact(&MAX_TARGET), 0x207fffff);
    }

    #[test]
    fn base_difficulty_decodes() {
        let expected = BigInt::from(0x04ffffu32) << (8 * (0x1e - 3));
        assert_eq!(compact_to_big(BASE_DIFFICULTY_BITS), expected);
    }

    #[test]
    fn compact_round_trip() {
        let cases: &[u32] = &[0x1e04ffff, 0x207fffff, 0x1d00ffff, 0x03123456, 0x04923456];
        for &bits in cases {
            let n = compact_to_big(bits);
            assert_eq!(big_to_compact(&n), bits, "bits {bits:08x}");
        }
    }

    #[test]
    fn compact_of_zero() {
        assert_eq!(big_to_compact(&BigInt::from(0)), 0);
        assert_eq!(compact_to_big(0), BigInt::from(0));
    }

    #[test]
    fn compact_preserves_top_three_bytes() {
        // Values larger than the 23-bit mantissa keep only their most
        // significant digits.
        let n = BigInt::from(0x12345678u32);
        let round = compact_to_big(big_to_compact(&n));
        assert_eq!(round, BigInt::from(0x12345600u32));
    }

    #[test]
    fn retarget_clamps_timespan() {
        // Blocks arriving ten times too fast count as a quarter timespan.
        let fast = retarget_bits(BASE_DIFFICULTY_BITS, TARGET_TIMESPAN / 10);
        let quarter = retarget_bits(BASE_DIFFICULTY_BITS, TARGET_TIMESPAN / 4);
        assert_eq!(fast, quarter);

        // Blocks arriving ten times too slow count as a quadruple timespan.
        let slow = retarget_bits(BASE_DIFFICULTY_BITS, TARGET_TIMESPAN * 10);
        let quadruple = retarget_bits(BASE_DIFFICULTY_BITS, TARGET_TIMESPAN * 4);
        assert_eq!(slow, quadruple);
    }

    #[test]
    fn retarget_is_proportional() {
        // Half the timespan halves the target, truncated to 23-bit precision:
        // 0x04ffff * 256^27 / 2 == 0x027fff80 * 256^26 -> 0x1e027fff.
        let halved = retarget_bits(BASE_DIFFICULTY_BITS, TARGET_TIMESPAN / 2);
        assert_eq!(halved, 0x1e027fff);
    }

    #[test]
    fn retarget_caps_at_max_target() {
        let bits = big_to_compact(&MAX_TARGET);
        assert_eq!(retarget_bits(bits, TARGET_TIMESPAN * 4), bits);
    }
}
