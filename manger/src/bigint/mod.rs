use crypto_bigint::{Encoding, Uint};

pub mod rsa;

/// Number of significant bits of `value`
pub fn bit_length<const LIMBS: usize>(value: &Uint<LIMBS>) -> usize {
    Uint::<LIMBS>::BITS - value.leading_zeros()
}

/// Encodes `value` big endian into exactly `len` bytes.
///
/// Shorter encodings are left padded with zeros, surplus leading bytes are dropped.
pub fn to_block<const LIMBS: usize>(value: &Uint<LIMBS>, len: usize) -> Vec<u8>
where
    Uint<LIMBS>: Encoding,
{
    let bytes = value.to_be_bytes();
    let bytes = bytes.as_ref();
    if len >= bytes.len() {
        let mut block = vec![0; len - bytes.len()];
        block.extend_from_slice(bytes);
        block
    } else {
        bytes[bytes.len() - len..].to_vec()
    }
}

/// Generates Uint<LIMBS> from big endian bytes of any length, if the value fits
pub fn from_block<const LIMBS: usize>(block: &[u8]) -> Option<Uint<LIMBS>> {
    let width = Uint::<LIMBS>::BYTES;
    if block.len() > width {
        let (surplus, rest) = block.split_at(block.len() - width);
        return surplus
            .iter()
            .all(|byte| *byte == 0)
            .then(|| Uint::from_be_slice(rest));
    }
    let mut bytes = vec![0; width];
    bytes[width - block.len()..].copy_from_slice(block);
    Some(Uint::from_be_slice(&bytes))
}

/// floor( a/b ) for integers, None for b = 0
pub fn divide_floor<const LIMBS: usize>(a: &Uint<LIMBS>, b: &Uint<LIMBS>) -> Option<Uint<LIMBS>> {
    Option::from(a.checked_div(b))
}

/// ceiling( a/b ) for integers, None for b = 0
///
/// Exact: `a/b` when `b` divides `a`, `a/b + 1` otherwise.
pub fn divide_ceiling<const LIMBS: usize>(a: &Uint<LIMBS>, b: &Uint<LIMBS>) -> Option<Uint<LIMBS>> {
    let quotient = divide_floor(a, b)?;
    let remainder = a.wrapping_sub(&quotient.wrapping_mul(b));
    if remainder == Uint::ZERO {
        Some(quotient)
    } else {
        Some(quotient.wrapping_add(&Uint::ONE))
    }
}

/// a mod n, None for n = 0
pub fn reduce<const LIMBS: usize>(a: &Uint<LIMBS>, n: &Uint<LIMBS>) -> Option<Uint<LIMBS>> {
    let quotient = divide_floor(a, n)?;
    Some(a.wrapping_sub(&quotient.wrapping_mul(n)))
}

#[cfg(test)]
mod tests {
    use crypto_bigint::{U128, U256};
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_block_padding() {
        let value = U256::from_u64(0x0102);
        assert_eq!(to_block(&value, 4), vec![0, 0, 1, 2]);
        assert_eq!(to_block(&value, 1), vec![2]);
        assert_eq!(to_block(&value, 34)[..2], [0, 0]);
        assert_eq!(to_block(&value, 34).len(), 34);
    }

    #[test]
    fn test_from_block() {
        assert_eq!(from_block::<{ U128::LIMBS }>(&[1, 2]), Some(U128::from_u64(0x0102)));
        assert_eq!(from_block::<{ U128::LIMBS }>(&[]), Some(U128::ZERO));

        let mut wide = vec![0u8; 20];
        wide[19] = 7;
        assert_eq!(from_block::<{ U128::LIMBS }>(&wide), Some(U128::from_u64(7)));
        wide[0] = 1;
        assert_eq!(from_block::<{ U128::LIMBS }>(&wide), None);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(divide_ceiling(&U128::ONE, &U128::ZERO), None);
        assert_eq!(reduce(&U128::ONE, &U128::ZERO), None);
    }

    #[test]
    fn test_exact_ceiling() {
        let six = U128::from_u64(6);
        assert_eq!(divide_ceiling(&six, &U128::from_u64(3)), Some(U128::from_u64(2)));
        assert_eq!(divide_ceiling(&six, &U128::from_u64(4)), Some(U128::from_u64(2)));
        assert_eq!(divide_ceiling(&U128::ZERO, &six), Some(U128::ZERO));
    }

    proptest! {
        #[test]
        fn ceiling_brackets_quotient(a in 1u128.., b in 1u128..) {
            let result = divide_ceiling(&U128::from_u128(a), &U128::from_u128(b)).unwrap();
            let result = u128::from_be_bytes(result.to_be_bytes());

            // result * b >= a and (result - 1) * b < a
            prop_assert!(result.checked_mul(b).map_or(true, |product| product >= a));
            prop_assert!((result - 1) * b < a);
            prop_assert_eq!(result, a.div_ceil(b));
        }

        #[test]
        fn reduce_matches_remainder(a in any::<u128>(), n in 1u128..) {
            let rest = reduce(&U128::from_u128(a), &U128::from_u128(n)).unwrap();
            prop_assert_eq!(u128::from_be_bytes(rest.to_be_bytes()), a % n);
        }
    }
}
