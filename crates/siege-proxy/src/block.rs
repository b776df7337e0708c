//! Decoding of the raw block carried by `test_importRawBlock`.

use alloy_consensus::{
    Block,
    TxEnvelope,
};
use alloy_primitives::{
    B256,
    hex,
};
use alloy_rlp::Decodable;
use serde_json::Value;
use thiserror::Error;

/// The block fields the verifier is invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedBlock {
    pub number: u64,
    pub hash: B256,
    pub state_root: B256,
    pub receipts_root: B256,
}

/// Why a block payload could not be decoded. Test harnesses send invalid
/// blocks on purpose, so none of these fail the request.
#[derive(Debug, Error)]
pub enum BlockDecodeError {
    #[error("block payload must be a hex string")]
    NotAString,
    #[error("invalid block hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid block rlp: {0}")]
    Rlp(#[from] alloy_rlp::Error),
    #[error("{0} trailing bytes after block rlp")]
    TrailingBytes(usize),
}

impl DecodedBlock {
    /// Positional arguments for the verifier, after the `test` subcommand.
    pub fn verifier_args(&self) -> [String; 4] {
        [
            self.number.to_string(),
            format!("{:#x}", self.hash),
            format!("{:#x}", self.state_root),
            format!("{:#x}", self.receipts_root),
        ]
    }
}

/// Decodes an RLP encoded block from raw bytes.
pub fn decode_block(raw: &[u8]) -> Result<DecodedBlock, BlockDecodeError> {
    let mut buf = raw;
    let block = Block::<TxEnvelope>::decode(&mut buf)?;
    if !buf.is_empty() {
        return Err(BlockDecodeError::TrailingBytes(buf.len()));
    }

    Ok(DecodedBlock {
        number: block.header.number,
        hash: block.header.hash_slow(),
        state_root: block.header.state_root,
        receipts_root: block.header.receipts_root,
    })
}

/// Decodes the first `test_importRawBlock` parameter: a hex string, `0x`
/// prefix optional.
pub fn decode_block_param(param: &Value) -> Result<DecodedBlock, BlockDecodeError> {
    let raw_hex = param.as_str().ok_or(BlockDecodeError::NotAString)?;
    let raw = hex::decode(raw_hex)?;
    decode_block(&raw)
}
