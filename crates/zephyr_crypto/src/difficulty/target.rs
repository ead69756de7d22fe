use core::cmp::Ordering;
use core::fmt;

/// 256-bit unsigned integer stored little-endian, used for proof-of-work targets.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Target(pub [u8; 32]);

impl Target {
    pub const ZERO: Target = Target([0u8; 32]);

    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        Target(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Decodes a compact `nBits` value.
    ///
    /// Encodings with the sign bit set, or whose mantissa would be shifted past
    /// 256 bits, decode to zero so that callers reject them as invalid targets.
    pub fn from_compact(nbits: u32) -> Self {
        let mant = nbits & 0x007f_ffff;
        let exp = (nbits >> 24) as usize;
        if mant == 0 || nbits & 0x0080_0000 != 0 {
            return Target::ZERO;
        }

        let mut out = [0u8; 32];
        if exp <= 3 {
            let shifted = mant >> (8 * (3 - exp));
            out[..4].copy_from_slice(&shifted.to_le_bytes());
            return Target(out);
        }

        let shift = exp - 3;
        for (i, byte) in mant.to_le_bytes()[..3].iter().enumerate() {
            match out.get_mut(i + shift) {
                Some(slot) => *slot = *byte,
                None if *byte != 0 => return Target::ZERO,
                None => {}
            }
        }
        Target(out)
    }

    /// Encodes this target in compact `nBits` form, rounding down the mantissa.
    pub fn to_compact(&self) -> u32 {
        let mut be = self.0;
        be.reverse();

        let leading = be.iter().take_while(|b| **b == 0).count();
        if leading == 32 {
            return 0;
        }
        let significant = &be[leading..];
        let mut size = significant.len() as u32;

        let mut mant = significant
            .iter()
            .take(3)
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
        if size < 3 {
            mant <<= 8 * (3 - size);
        }

        // The compact form is signed: keep the mantissa's top bit clear.
        if mant & 0x0080_0000 != 0 {
            mant >>= 8;
            size += 1;
        }
        (size << 24) | mant
    }

    /// Adds two targets, returning `None` on overflow past 256 bits.
    pub fn checked_add(&self, rhs: &Target) -> Option<Target> {
        let mut out = [0u8; 32];
        let mut carry = 0u16;
        for (i, slot) in out.iter_mut().enumerate() {
            let sum = u16::from(self.0[i]) + u16::from(rhs.0[i]) + carry;
            *slot = sum as u8;
            carry = sum >> 8;
        }
        (carry == 0).then_some(Target(out))
    }

    /// Multiplies by a small factor, returning `None` on overflow past 256 bits.
    pub fn checked_mul_u32(&self, rhs: u32) -> Option<Target> {
        let mut out = [0u8; 32];
        let mut carry = 0u64;
        for (i, slot) in out.iter_mut().enumerate() {
            let cur = u64::from(self.0[i]) * u64::from(rhs) + carry;
            *slot = cur as u8;
            carry = cur >> 8;
        }
        (carry == 0).then_some(Target(out))
    }

    /// Integer division by a non-zero small divisor.
    pub fn div_u32(&self, rhs: u32) -> Target {
        debug_assert!(rhs != 0);
        let mut out = [0u8; 32];
        let mut rem = 0u64;
        for i in (0..32).rev() {
            let cur = (rem << 8) | u64::from(self.0[i]);
            out[i] = (cur / u64::from(rhs)) as u8;
            rem = cur % u64::from(rhs);
        }
        Target(out)
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut be = self.0;
        be.reverse();
        write!(f, "Target({})", hex::encode(be))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_round_trips_for_canonical_encodings() {
        for bits in [0x1e0f_fff0, 0x1e0f_ffff, 0x207f_ffff, 0x1d00_ffff, 0x1b04_04cb] {
            assert_eq!(Target::from_compact(bits).to_compact(), bits, "{bits:#x}");
        }
    }

    #[test]
    fn difficulty_one_target_has_expected_layout() {
        let target = Target::from_compact(0x1d00_ffff);
        let mut expected = [0u8; 32];
        expected[26] = 0xff;
        expected[27] = 0xff;
        assert_eq!(target.0, expected);
    }

    #[test]
    fn negative_and_overflowing_encodings_are_zero() {
        assert!(Target::from_compact(0x0180_0000 | 0x01).is_zero());
        assert!(Target::from_compact(0x0400_0000).is_zero());
        assert!(Target::from_compact(0x2301_0000).is_zero());
    }

    #[test]
    fn ordering_compares_most_significant_byte_first() {
        let mut low = [0u8; 32];
        low[0] = 0xff;
        let mut high = [0u8; 32];
        high[31] = 0x01;
        assert!(Target(low) < Target(high));
    }

    #[test]
    fn arithmetic_matches_small_integers() {
        let mut seven = [0u8; 32];
        seven[0] = 7;
        let seven = Target(seven);
        let fourteen = seven.checked_add(&seven).unwrap();
        assert_eq!(fourteen.0[0], 14);
        assert_eq!(fourteen.div_u32(7).0[0], 2);
        assert_eq!(seven.checked_mul_u32(1000).unwrap().0[..2], 7000u16.to_le_bytes());
        assert!(Target([0xff; 32]).checked_add(&seven).is_none());
    }
}
