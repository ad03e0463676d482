//! Locating and replacing RSA cipher blocks inside a captured OpenSecureChannel request.

use std::io::Cursor;

use bytes::Buf;
use thiserror::Error;

use crate::endpoint::SecurityPolicy;

/// Tag of an OpenSecureChannel request chunk
pub const OPN_TAG: &[u8; 3] = b"OPN";

/// Tag, reserved byte, message size and secure channel id
const FIXED_HEADER_LEN: usize = 12;

/// Length value announcing a null field
const NULL_LENGTH: u32 = u32::MAX;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("expected an OPN message, found tag {0:?}")]
    UnexpectedTag(Vec<u8>),
    #[error("header ends after {needed} bytes but the message has only {available}")]
    TruncatedHeader { needed: usize, available: usize },
    #[error("block {index} at offset {offset} with size {block_size} exceeds the {len} byte message")]
    BlockOutOfRange {
        index: usize,
        offset: usize,
        block_size: usize,
        len: usize,
    },
    #[error("block of {actual} bytes does not match the block size {expected}")]
    BlockSize { expected: usize, actual: usize },
}

/// Header fields of an OPN request in front of the asymmetric encrypted part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpnHeader {
    pub message_size: u32,
    pub secure_channel_id: u32,
    /// None for a null URI
    pub security_policy_uri: Option<String>,
    pub certificate_len: usize,
    pub thumbprint_len: usize,
    /// Offset of the first encrypted block
    pub block_offset: usize,
}

impl OpnHeader {
    pub fn parse(message: &[u8]) -> Result<Self, FormatError> {
        let available = message.len();
        let truncated = |needed: usize| FormatError::TruncatedHeader { needed, available };

        if available < FIXED_HEADER_LEN {
            return Err(truncated(FIXED_HEADER_LEN));
        }
        if &message[..3] != OPN_TAG {
            return Err(FormatError::UnexpectedTag(message[..3].to_vec()));
        }

        let mut src = Cursor::new(message);
        src.advance(4);
        let message_size = src.get_u32_le();
        let secure_channel_id = src.get_u32_le();

        let policy = field(&mut src).map_err(truncated)?;
        let security_policy_uri = policy.map(|bytes| String::from_utf8_lossy(bytes).into_owned());
        let certificate_len = field(&mut src).map_err(truncated)?.map_or(0, <[u8]>::len);
        let thumbprint_len = field(&mut src).map_err(truncated)?.map_or(0, <[u8]>::len);

        Ok(Self {
            message_size,
            secure_channel_id,
            security_policy_uri,
            certificate_len,
            thumbprint_len,
            block_offset: src.position() as usize,
        })
    }

    /// The announced policy, if it is one we know
    pub fn security_policy(&self) -> Option<SecurityPolicy> {
        self.security_policy_uri
            .as_deref()
            .and_then(SecurityPolicy::from_uri)
    }
}

/// Reads one length prefixed field. A too short buffer yields the number of bytes needed.
fn field<'a>(src: &mut Cursor<&'a [u8]>) -> Result<Option<&'a [u8]>, usize> {
    let start = src.position() as usize;
    if src.remaining() < 4 {
        return Err(start + 4);
    }
    let len = src.get_u32_le();
    if len == NULL_LENGTH {
        return Ok(None);
    }

    let start = start + 4;
    let len = len as usize;
    if src.remaining() < len {
        return Err(start + len);
    }
    src.advance(len);
    Ok(Some(&src.get_ref()[start..start + len]))
}

/// Offset of the first encrypted block in an OPN message.
///
/// The offset depends on the header alone, a message ending right behind it yields its length.
pub fn block_offset(ciphertext: &[u8], _key_byte_length: usize) -> Result<usize, FormatError> {
    let offset = OpnHeader::parse(ciphertext)?.block_offset;
    if offset > ciphertext.len() {
        return Err(FormatError::TruncatedHeader {
            needed: offset,
            available: ciphertext.len(),
        });
    }
    Ok(offset)
}

fn block_range(
    len: usize,
    offset: usize,
    block_size: usize,
    index: usize,
) -> Result<std::ops::Range<usize>, FormatError> {
    let out_of_range = || FormatError::BlockOutOfRange {
        index,
        offset,
        block_size,
        len,
    };
    let start = index
        .checked_mul(block_size)
        .and_then(|skip| skip.checked_add(offset))
        .ok_or_else(out_of_range)?;
    let end = start.checked_add(block_size).ok_or_else(out_of_range)?;
    if block_size == 0 || end > len {
        return Err(out_of_range());
    }
    Ok(start..end)
}

/// Copies block `index` out of the message
pub fn extract_block(
    ciphertext: &[u8],
    offset: usize,
    block_size: usize,
    index: usize,
) -> Result<Vec<u8>, FormatError> {
    let range = block_range(ciphertext.len(), offset, block_size, index)?;
    Ok(ciphertext[range].to_vec())
}

/// Overwrites block `index` of the message in place
pub fn splice_block(
    ciphertext: &mut [u8],
    block: &[u8],
    offset: usize,
    block_size: usize,
    index: usize,
) -> Result<(), FormatError> {
    if block.len() != block_size {
        return Err(FormatError::BlockSize {
            expected: block_size,
            actual: block.len(),
        });
    }
    let range = block_range(ciphertext.len(), offset, block_size, index)?;
    ciphertext[range].copy_from_slice(block);
    Ok(())
}

/// Position of the cipher blocks inside a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub offset: usize,
    pub block_size: usize,
}

/// A captured OPN message together with its block layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherText {
    bytes: Vec<u8>,
    layout: BlockLayout,
}

impl CipherText {
    pub fn new(bytes: Vec<u8>, block_size: usize) -> Result<Self, FormatError> {
        let offset = block_offset(&bytes, block_size)?;
        block_range(bytes.len(), offset, block_size, 0)?;
        Ok(Self {
            bytes,
            layout: BlockLayout { offset, block_size },
        })
    }

    pub fn layout(&self) -> BlockLayout {
        self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of complete blocks behind the header
    pub fn block_count(&self) -> usize {
        (self.bytes.len() - self.layout.offset) / self.layout.block_size
    }

    pub fn block(&self, index: usize) -> Result<&[u8], FormatError> {
        let BlockLayout { offset, block_size } = self.layout;
        let range = block_range(self.bytes.len(), offset, block_size, index)?;
        Ok(&self.bytes[range])
    }

    /// Copy of the message with block `index` replaced, this message stays untouched
    pub fn spliced(&self, index: usize, block: &[u8]) -> Result<CipherText, FormatError> {
        let mut bytes = self.bytes.clone();
        splice_block(
            &mut bytes,
            block,
            self.layout.offset,
            self.layout.block_size,
            index,
        )?;
        Ok(CipherText {
            bytes,
            layout: self.layout,
        })
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
