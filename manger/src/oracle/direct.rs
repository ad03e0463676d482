use crypto_bigint::Uint;
use tracing::trace;

use super::{check_block_len, Oracle, OracleError};
use crate::bigint::{
    from_block,
    rsa::{Key, PrivateKey},
};

/// Test oracle holding the private key, it answers exactly.
pub struct DirectOracle<const LIMBS: usize> {
    private_key: PrivateKey<LIMBS>,
    boundary: Uint<LIMBS>,
    block_len: usize,
    queries: u64,
}

impl<const LIMBS: usize> DirectOracle<LIMBS> {
    pub fn new(private_key: PrivateKey<LIMBS>) -> Self {
        Self {
            boundary: private_key.boundary(),
            block_len: private_key.block_len(),
            private_key,
            queries: 0,
        }
    }
}

impl<const LIMBS: usize> Oracle for DirectOracle<LIMBS> {
    fn check_validity(&mut self, block: &[u8]) -> Result<bool, OracleError> {
        self.queries += 1;
        check_block_len(block, self.block_len)?;

        let c: Uint<LIMBS> = from_block(block).ok_or(OracleError::InvalidBlockSize {
            expected: self.block_len,
            actual: block.len(),
        })?;
        let m = self.private_key.encrypt(&c);
        let less = m < self.boundary;
        trace!(query = self.queries, less, "direct oracle");
        Ok(less)
    }

    fn query_count(&self) -> u64 {
        self.queries
    }
}

#[cfg(test)]
mod tests {
    use crypto_bigint::U512;
    use proptest::{collection::vec, prelude::*};

    use super::*;
    use crate::bigint::{rsa::tests::keys_512, to_block};

    fn block_for(m: &U512) -> Vec<u8> {
        let (public_key, _) = keys_512();
        to_block(&public_key.encrypt(m), public_key.block_len())
    }

    #[test]
    fn test_boundary_values() {
        let (public_key, private_key) = keys_512();
        let mut oracle = DirectOracle::new(private_key);
        let b = public_key.boundary();

        assert!(oracle.check_validity(&block_for(&U512::ZERO)).unwrap());
        assert!(oracle.check_validity(&block_for(&b.wrapping_sub(&U512::ONE))).unwrap());
        assert!(!oracle.check_validity(&block_for(&b)).unwrap());
        assert!(!oracle
            .check_validity(&block_for(&public_key.modulus().wrapping_sub(&U512::ONE)))
            .unwrap());
        assert_eq!(oracle.query_count(), 4);
    }

    #[test]
    fn test_wrong_length_still_counts() {
        let (_, private_key) = keys_512();
        let mut oracle = DirectOracle::new(private_key);

        assert!(matches!(
            oracle.check_validity(&[1; 63]),
            Err(OracleError::InvalidBlockSize { expected: 64, actual: 63 })
        ));
        assert_eq!(oracle.query_count(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn answers_exactly(bytes in vec(any::<u8>(), 64)) {
            let (public_key, private_key) = keys_512();
            let n = public_key.modulus();
            let m = U512::from_be_slice(&bytes);
            prop_assume!(m < n);

            let mut oracle = DirectOracle::new(private_key);
            prop_assert_eq!(oracle.check_validity(&block_for(&m)).unwrap(), m < public_key.boundary());
        }

        #[test]
        fn answers_exactly_below_b(mut bytes in vec(any::<u8>(), 64)) {
            let (_, private_key) = keys_512();
            bytes[0] = 0;
            let m = U512::from_be_slice(&bytes);

            let mut oracle = DirectOracle::new(private_key);
            prop_assert!(oracle.check_validity(&block_for(&m)).unwrap());
        }
    }
}
