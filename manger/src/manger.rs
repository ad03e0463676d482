//! Manger's chosen ciphertext attack on RSA-OAEP.
//!
//! Given an oracle telling whether the plaintext of a ciphertext is below
//! B = 2^(bits - 8), the plaintext m of c is recovered by querying multiples
//! f·m through ciphertexts f^e·c and bisecting the interval that must hold m.
//! Intermediate values live in `Uint<WIDE>`, twice the width of the modulus.

use crypto_bigint::{modular::runtime_mod::DynResidue, ConcatMixed, Encoding, Uint};
use rand_core::{CryptoRng, RngCore};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    bigint::{
        bit_length, divide_ceiling, divide_floor, from_block, reduce,
        rsa::{Key, PublicKey},
        to_block,
    },
    config::{AttackConfig, Precondition},
    oracle::{Oracle, OracleError},
};

#[derive(Debug, Error)]
pub enum AttackError {
    #[error("cipher block has {actual} bytes, expected {expected}")]
    InvalidBlock { expected: usize, actual: usize },
    #[error("ciphertext is not smaller than the modulus")]
    CiphertextOutOfRange,
    #[error("plaintext of the ciphertext is not below B")]
    PreconditionFailed,
    #[error("no blinding factor found in {attempts} attempts")]
    BlindingExhausted { attempts: u64 },
    #[error("{queries} queries exceed the budget of {budget}, the oracle answers wrong")]
    Aborted { queries: u64, budget: u64 },
    #[error("search interval is inconsistent: {0}")]
    Inconsistent(&'static str),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Recovered plaintext of one cipher block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery<const LIMBS: usize> {
    /// Big endian, exactly one block long
    pub plaintext: Vec<u8>,
    pub value: Uint<LIMBS>,
    /// Oracle queries spent, blinding included
    pub queries: u64,
    /// Queries of the three search steps alone, the part bound by the query budget
    pub search_queries: u64,
    pub blinded: bool,
}

fn random_uint<const LIMBS: usize>(rng: &mut (impl RngCore + CryptoRng)) -> Uint<LIMBS> {
    let mut bytes = vec![0u8; Uint::<LIMBS>::BYTES];
    rng.fill_bytes(&mut bytes);
    Uint::from_be_slice(&bytes)
}

/// Uniform random value below B
pub(crate) fn random_below_boundary<const LIMBS: usize>(
    public_key: &PublicKey<LIMBS>,
    rng: &mut (impl RngCore + CryptoRng),
) -> Uint<LIMBS> {
    let mask = public_key.boundary().wrapping_sub(&Uint::ONE);
    random_uint::<LIMBS>(rng) & mask
}

/// Random plaintext block whose value is below B
pub fn generate_plaintext_less_b<const LIMBS: usize>(
    public_key: &PublicKey<LIMBS>,
    rng: &mut (impl RngCore + CryptoRng),
) -> Vec<u8>
where
    Uint<LIMBS>: Encoding,
{
    to_block(&random_below_boundary(public_key, rng), public_key.block_len())
}

/// Random plaintext block whose value lies in [B, N)
pub fn generate_plaintext_geq_b<const LIMBS: usize>(
    public_key: &PublicKey<LIMBS>,
    rng: &mut (impl RngCore + CryptoRng),
) -> Vec<u8>
where
    Uint<LIMBS>: Encoding,
{
    let n = public_key.modulus();
    let b = public_key.boundary();
    let mask = Uint::<LIMBS>::MAX.shr_vartime(Uint::<LIMBS>::BITS - public_key.bits());
    loop {
        let value = random_uint::<LIMBS>(rng) & mask;
        if value >= b && value < n {
            return to_block(&value, public_key.block_len());
        }
    }
}

/// One run of the attack against a single cipher block.
///
/// The query budget (`2·bits` unless configured) bounds the three search steps only. The
/// precondition query and blinding are not charged to it, blinding is capped separately by
/// `max_blinding_attempts`, so a blinded run may issue up to `budget + max_blinding_attempts + 2`
/// queries in total.
pub struct MangerAttack<'o, const LIMBS: usize, const WIDE: usize> {
    oracle: &'o mut dyn Oracle,
    public_key: PublicKey<LIMBS>,
    config: AttackConfig,
    c: Uint<LIMBS>,
    n: Uint<WIDE>,
    b: Uint<WIDE>,
    budget: u64,
    /// Oracle count at which the bisection budget starts
    base: u64,
}

impl<'o, const LIMBS: usize, const WIDE: usize> MangerAttack<'o, LIMBS, WIDE>
where
    Uint<LIMBS>: Encoding + ConcatMixed<Uint<LIMBS>, MixedOutput = Uint<WIDE>>,
{
    pub fn new(
        cipher_block: &[u8],
        oracle: &'o mut dyn Oracle,
        public_key: PublicKey<LIMBS>,
        config: AttackConfig,
    ) -> Result<Self, AttackError> {
        let expected = public_key.block_len();
        if cipher_block.len() != expected {
            return Err(AttackError::InvalidBlock {
                expected,
                actual: cipher_block.len(),
            });
        }
        let c: Uint<LIMBS> = from_block(cipher_block).ok_or(AttackError::CiphertextOutOfRange)?;
        let modulus = public_key.modulus();
        if c >= modulus {
            return Err(AttackError::CiphertextOutOfRange);
        }

        let budget = config.query_budget.unwrap_or(2 * public_key.bits() as u64);
        let base = oracle.query_count();
        Ok(Self {
            oracle,
            c,
            n: modulus.resize(),
            b: public_key.boundary().resize(),
            public_key,
            config,
            budget,
            base,
        })
    }

    /// (a * b) mod N
    fn mul_mod(&self, a: &Uint<LIMBS>, b: &Uint<LIMBS>) -> Uint<LIMBS> {
        let params = self.public_key.get_modulus();
        DynResidue::new(a, params)
            .mul(&DynResidue::new(b, params))
            .retrieve()
    }

    /// Oracle answer for (f^e * c) mod N, without budget check
    fn ask(&mut self, c: &Uint<LIMBS>, f: &Uint<WIDE>) -> Result<bool, AttackError> {
        let f: Uint<LIMBS> = reduce(f, &self.n)
            .ok_or(AttackError::Inconsistent("zero modulus"))?
            .resize();
        let manipulated = self.mul_mod(&self.public_key.encrypt(&f), c);
        let block = to_block(&manipulated, self.public_key.block_len());
        Ok(self.oracle.check_validity(&block)?)
    }

    fn query(&mut self, c: &Uint<LIMBS>, f: &Uint<WIDE>) -> Result<bool, AttackError> {
        let spent = self.oracle.query_count().saturating_sub(self.base);
        if spent > self.budget {
            return Err(AttackError::Aborted {
                queries: spent,
                budget: self.budget,
            });
        }
        self.ask(c, f)
    }

    /// Finds c0 = c * s^e whose plaintext is below B, returns c0 and the inverse of s
    fn blind(&mut self) -> Result<(Uint<LIMBS>, Option<Uint<LIMBS>>), AttackError> {
        let c = self.c;
        if self.ask(&c, &Uint::ONE)? {
            return Ok((c, None));
        }
        info!("plaintext not below B, blinding the ciphertext");

        let params = self.public_key.get_modulus();
        let modulus = self.public_key.modulus();
        let two = Uint::<LIMBS>::from_u8(2);
        let mut rng = rand::thread_rng();

        for attempt in 1..=self.config.max_blinding_attempts {
            let s = reduce(&random_uint(&mut rng), &modulus)
                .ok_or(AttackError::Inconsistent("zero modulus"))?;
            if s < two {
                continue;
            }
            let (inverse, invertible) = DynResidue::new(&s, params).invert();
            let invertible: bool = invertible.into();
            if !invertible {
                continue;
            }

            let c0 = self.mul_mod(&self.public_key.encrypt(&s), &c);
            if self.ask(&c0, &Uint::ONE)? {
                debug!(attempt, "blinding factor found");
                return Ok((c0, Some(inverse.retrieve())));
            }
        }
        Err(AttackError::BlindingExhausted {
            attempts: self.config.max_blinding_attempts,
        })
    }

    pub fn execute(mut self) -> Result<Recovery<LIMBS>, AttackError> {
        let block_len = self.public_key.block_len();
        let start = self.oracle.query_count();
        if self.c == Uint::ZERO {
            return Ok(Recovery {
                plaintext: vec![0; block_len],
                value: Uint::ZERO,
                queries: 0,
                search_queries: 0,
                blinded: false,
            });
        }
        info!(bits = self.public_key.bits(), budget = self.budget, "starting manger attack");

        let (c0, unblind) = match self.config.precondition {
            Precondition::Skip => (self.c, None),
            Precondition::Require => {
                let c = self.c;
                if !self.ask(&c, &Uint::ONE)? {
                    return Err(AttackError::PreconditionFailed);
                }
                (c, None)
            }
            Precondition::Blind => self.blind()?,
        };
        self.base = self.oracle.query_count();

        let m0 = self.bisect(&c0)?;
        let value = match unblind {
            Some(inverse) => self.mul_mod(&m0, &inverse),
            None => m0,
        };
        let queries = self.oracle.query_count() - start;
        let search_queries = self.oracle.query_count() - self.base;
        info!(queries, search_queries, blinded = unblind.is_some(), "plaintext recovered");

        Ok(Recovery {
            plaintext: to_block(&value, block_len),
            value,
            queries,
            search_queries,
            blinded: unblind.is_some(),
        })
    }

    fn bisect(&mut self, c: &Uint<LIMBS>) -> Result<Uint<LIMBS>, AttackError> {
        const DIVISION: &str = "division by zero";
        let n = self.n;
        let b = self.b;

        // step 1: f1 * m crosses B
        let mut f1 = Uint::<WIDE>::from_u8(2);
        while self.query(c, &f1)? {
            f1 = f1.shl(1);
        }
        debug!(f1_bits = bit_length(&f1), "step 1 done");

        // step 2: f2 * m falls back below N + B
        let half = f1.shr_vartime(1);
        let mut f2 = divide_floor(&n.wrapping_add(&b), &b)
            .ok_or(AttackError::Inconsistent(DIVISION))?
            .wrapping_mul(&half);
        while !self.query(c, &f2)? {
            f2 = f2.wrapping_add(&half);
        }
        debug!(f2_bits = bit_length(&f2), "step 2 done");

        // step 3: m in [mmin, mmax]
        let mut mmin = divide_ceiling(&n, &f2).ok_or(AttackError::Inconsistent(DIVISION))?;
        let mut mmax =
            divide_floor(&n.wrapping_add(&b), &f2).ok_or(AttackError::Inconsistent(DIVISION))?;
        let two_b = b.shl(1);

        while mmax > mmin {
            let ftmp = divide_floor(&two_b, &mmax.wrapping_sub(&mmin))
                .ok_or(AttackError::Inconsistent(DIVISION))?;
            let i = divide_floor(&ftmp.wrapping_mul(&mmin), &n)
                .ok_or(AttackError::Inconsistent(DIVISION))?;
            let i_n = i.wrapping_mul(&n);
            let f3 = divide_ceiling(&i_n, &mmin).ok_or(AttackError::Inconsistent(DIVISION))?;
            if f3 == Uint::ZERO {
                return Err(AttackError::Inconsistent(DIVISION));
            }

            let bound = i_n.wrapping_add(&b);
            if self.query(c, &f3)? {
                mmax = divide_floor(&bound, &f3).ok_or(AttackError::Inconsistent(DIVISION))?;
            } else {
                mmin = divide_ceiling(&bound, &f3).ok_or(AttackError::Inconsistent(DIVISION))?;
            }
        }

        if mmin != mmax {
            return Err(AttackError::Inconsistent("lower bound passed upper bound"));
        }
        Ok(mmin.resize())
    }
}
