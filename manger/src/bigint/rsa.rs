use std::fmt::Debug;

use crypto_bigint::{
    modular::runtime_mod::{DynResidue, DynResidueParams},
    CheckedSub, Encoding, Uint,
};
use crypto_primes::generate_prime;
use thiserror::Error;

use super::{bit_length, from_block};

/// Trait for constant public exponents used during key generation
pub trait PublicExponent<const LIMBS: usize> {
    const EXPONENT: Uint<LIMBS>;
}

/// Type for constant e = 3 public key
pub struct ExponentThree<const LIMBS: usize> {}

impl<const LIMBS: usize> PublicExponent<LIMBS> for ExponentThree<LIMBS> {
    const EXPONENT: Uint<LIMBS> = Uint::from_u8(3);
}

/// Type for constant e = 65537 public key
pub struct NistExponent<const LIMBS: usize> {}

impl<const LIMBS: usize> PublicExponent<LIMBS> for NistExponent<LIMBS> {
    const EXPONENT: Uint<LIMBS> = Uint::from_u64(65537);
}

/// Rejected key material
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("modulus must be odd")]
    EvenModulus,
    #[error("modulus of {bits} bits is too small, at least 16 bits are needed")]
    ModulusTooSmall { bits: usize },
    #[error("exponent must not be zero")]
    ZeroExponent,
    #[error("{len} bytes do not fit into a {max} byte integer")]
    Oversized { len: usize, max: usize },
}

/// Trait for Public/Private keys for encryption
pub trait Key<const LIMBS: usize> {
    fn encrypt(&self, text: &Uint<LIMBS>) -> Uint<LIMBS>;
    fn get_modulus(&self) -> DynResidueParams<LIMBS>;

    /// Modulus N as plain integer
    fn modulus(&self) -> Uint<LIMBS> {
        *self.get_modulus().modulus()
    }

    /// Bit length of N
    fn bits(&self) -> usize {
        bit_length(&self.modulus())
    }

    /// Byte length k of one cipher block
    fn block_len(&self) -> usize {
        (self.bits() + 7) / 8
    }

    /// B = 2^(bits - 8)
    fn boundary(&self) -> Uint<LIMBS> {
        Uint::<LIMBS>::ONE.shl(self.bits() - 8)
    }
}

/// Public key with runtime exponent, as announced by a server endpoint.
#[derive(Clone, Copy)]
pub struct PublicKey<const LIMBS: usize> {
    exponent: Uint<LIMBS>,
    exponent_bits: usize,
    modulus: DynResidueParams<LIMBS>,
}

impl<const LIMBS: usize> PublicKey<LIMBS> {
    pub fn new(modulus: Uint<LIMBS>, exponent: Uint<LIMBS>) -> Result<Self, KeyError> {
        let modulus = checked_modulus(&modulus)?;
        if exponent == Uint::ZERO {
            return Err(KeyError::ZeroExponent);
        }
        Ok(Self {
            exponent,
            exponent_bits: bit_length(&exponent),
            modulus,
        })
    }

    /// Reads modulus and exponent from their big endian encodings
    pub fn from_be_bytes(modulus: &[u8], exponent: &[u8]) -> Result<Self, KeyError> {
        let oversized = |len: usize| KeyError::Oversized {
            len,
            max: Uint::<LIMBS>::BYTES,
        };
        let n = from_block(modulus).ok_or_else(|| oversized(modulus.len()))?;
        let e = from_block(exponent).ok_or_else(|| oversized(exponent.len()))?;
        Self::new(n, e)
    }

    pub fn exponent(&self) -> &Uint<LIMBS> {
        &self.exponent
    }
}

impl<const LIMBS: usize> Key<LIMBS> for PublicKey<LIMBS> {
    fn encrypt(&self, text: &Uint<LIMBS>) -> Uint<LIMBS> {
        DynResidue::new(text, self.modulus)
            .pow_bounded_exp(&self.exponent, self.exponent_bits)
            .retrieve()
    }

    fn get_modulus(&self) -> DynResidueParams<LIMBS> {
        self.modulus
    }
}

impl<const LIMBS: usize> Debug for PublicKey<LIMBS> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("modulus", self.modulus.modulus())
            .field("exponent", &self.exponent)
            .finish()
    }
}

/// Private key struct
#[derive(Clone, Copy)]
pub struct PrivateKey<const LIMBS: usize> {
    exponent: Uint<LIMBS>,
    modulus: DynResidueParams<LIMBS>,
}

impl<const LIMBS: usize> PrivateKey<LIMBS> {
    pub fn new(modulus: Uint<LIMBS>, exponent: Uint<LIMBS>) -> Result<Self, KeyError> {
        let modulus = checked_modulus(&modulus)?;
        if exponent == Uint::ZERO {
            return Err(KeyError::ZeroExponent);
        }
        Ok(Self { exponent, modulus })
    }
}

impl<const LIMBS: usize> Key<LIMBS> for PrivateKey<LIMBS> {
    fn encrypt(&self, text: &Uint<LIMBS>) -> Uint<LIMBS> {
        DynResidue::new(text, self.modulus)
            .pow(&self.exponent)
            .retrieve()
    }

    fn get_modulus(&self) -> DynResidueParams<LIMBS> {
        self.modulus
    }
}

impl<const LIMBS: usize> Debug for PrivateKey<LIMBS> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("modulus", self.modulus.modulus())
            .finish_non_exhaustive()
    }
}

fn checked_modulus<const LIMBS: usize>(
    modulus: &Uint<LIMBS>,
) -> Result<DynResidueParams<LIMBS>, KeyError> {
    let bits = bit_length(modulus);
    if bits < 16 {
        return Err(KeyError::ModulusTooSmall { bits });
    }
    if modulus.as_words()[0] & 1 == 0 {
        return Err(KeyError::EvenModulus);
    }
    Ok(DynResidueParams::new(modulus))
}

/// Factory for new RSA Public/Private Keypairs
pub struct RSA {}

impl RSA {
    /// Generate a new Public/Private Keypair of size Uint<LIMBS> and constant Public Exponent
    pub fn new<const LIMBS: usize, EXPONENT: PublicExponent<LIMBS>>(
    ) -> (PublicKey<LIMBS>, PrivateKey<LIMBS>) {
        loop {
            let p = generate_prime(Some(Uint::<LIMBS>::BITS / 2));
            let q: Uint<LIMBS> = generate_prime(Some(Uint::<LIMBS>::BITS / 2));
            if p == q {
                continue;
            }

            let (n, _) = p.mul_wide(&q);

            let inverse = Self::totient(&p, &q).and_then(|totient| {
                let (exponent, choice) = EXPONENT::EXPONENT.inv_mod(&totient);
                let invertible: bool = choice.into();
                invertible.then_some(exponent)
            });

            if let Some(exponent) = inverse {
                if let Ok(keys) = Self::from_components(n, EXPONENT::EXPONENT, exponent) {
                    return keys;
                }
            }
        }
    }

    /// Assembles a keypair from known components n, e and d
    pub fn from_components<const LIMBS: usize>(
        n: Uint<LIMBS>,
        e: Uint<LIMBS>,
        d: Uint<LIMBS>,
    ) -> Result<(PublicKey<LIMBS>, PrivateKey<LIMBS>), KeyError> {
        Ok((PublicKey::new(n, e)?, PrivateKey::new(n, d)?))
    }

    /// Generate euler totient of n = pq : phi(n) = (p-1)(q-1)
    pub fn totient<const LIMBS: usize>(p: &Uint<LIMBS>, q: &Uint<LIMBS>) -> Option<Uint<LIMBS>> {
        Option::from(p.checked_sub(&Uint::<LIMBS>::ONE).and_then(|a| {
            q.checked_sub(&Uint::<LIMBS>::ONE).map(|b| {
                let (totient, _) = a.mul_wide(&b);
                totient
            })
        }))
    }

    /// Raw RSA of a big endian block under `key`, re-encoded to the key's block length
    pub fn apply_block<const LIMBS: usize>(key: &impl Key<LIMBS>, block: &[u8]) -> Option<Vec<u8>>
    where
        Uint<LIMBS>: Encoding,
    {
        let value = from_block::<LIMBS>(block)?;
        Some(super::to_block(&key.encrypt(&value), key.block_len()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crypto_bigint::{U1024, U256, U512};

    use super::*;

    pub(crate) const N_512: &str = "ed7d837b98d42cb9d57914aeb17b1285b0bbc438c3352cdec697fb8874ba3ef30d30360432b4d048b452e0e2c085e5686158efd799c27d680a152d70bc6a4a01";
    pub(crate) const D_512: &str = "e93a8f2a8d5f29816304e2ebe0be95e517387f2ea37e904f43c7342dc13cbadd807295ffbd5841dc028d73b34bb34a7cf53fd901baef47b7bf1bdcdd8ff56775";

    /// Fixed 512 bit keypair with e = 65537
    pub(crate) fn keys_512() -> (PublicKey<{ U512::LIMBS }>, PrivateKey<{ U512::LIMBS }>) {
        RSA::from_components(
            U512::from_be_hex(N_512),
            U512::from_u64(65537),
            U512::from_be_hex(D_512),
        )
        .unwrap()
    }

    #[test]
    fn test_fixed_key_roundtrip() {
        let (public_key, private_key) = keys_512();
        assert_eq!(public_key.bits(), 512);
        assert_eq!(public_key.block_len(), 64);
        assert_eq!(public_key.boundary(), U512::ONE.shl(504));

        let m = U512::from_u64(0xdead_beef_cafe);
        let c = public_key.encrypt(&m);
        assert_ne!(c, m);
        assert_eq!(private_key.encrypt(&c), m);
    }

    #[test]
    fn test_generated_keypair() {
        let (public_key, private_key) = RSA::new::<{ U256::LIMBS }, NistExponent<{ U256::LIMBS }>>();
        assert!(public_key.bits() >= 255);

        let m = U256::from_u64(42);
        assert_eq!(private_key.encrypt(&public_key.encrypt(&m)), m);
    }

    #[test]
    fn test_rejected_components() {
        assert_eq!(
            PublicKey::new(U256::from_u64(1 << 20), U256::from_u64(3)).unwrap_err(),
            KeyError::EvenModulus
        );
        assert_eq!(
            PublicKey::new(U256::from_u64(255), U256::from_u64(3)).unwrap_err(),
            KeyError::ModulusTooSmall { bits: 8 }
        );
        assert_eq!(
            PublicKey::new(U256::from_u64(65537), U256::ZERO).unwrap_err(),
            KeyError::ZeroExponent
        );
        assert_eq!(
            PublicKey::<{ U256::LIMBS }>::from_be_bytes(&[1u8; 33], &[3]).unwrap_err(),
            KeyError::Oversized { len: 33, max: 32 }
        );
    }

    #[test]
    fn test_from_be_bytes() {
        let (public_key, _) = keys_512();
        let modulus = public_key.modulus().to_be_bytes();
        let parsed =
            PublicKey::<{ U1024::LIMBS }>::from_be_bytes(modulus.as_ref(), &[0x01, 0x00, 0x01]).unwrap();
        assert_eq!(parsed.bits(), 512);
        assert_eq!(parsed.exponent(), &U1024::from_u64(65537));
    }
}
