//! ERC-20 `approve(address,uint256)` calldata handling

use super::StepKind;

use ethers::types::{Address, Bytes, U256};

/// keccak256("approve(address,uint256)")[:4]
pub const ERC20_APPROVE_SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

const APPROVE_CALLDATA_LEN: usize = 4 + 32 + 32;

/// Decoded arguments of an approve call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApproveCall {
    pub spender: Address,
    pub amount: U256,
}

/// Decode approve calldata. Returns `None` for anything that is not an approve call.
pub fn parse_erc20_approve_calldata(data: &[u8]) -> Option<ApproveCall> {
    if data.len() < APPROVE_CALLDATA_LEN || data[..4] != ERC20_APPROVE_SELECTOR {
        return None;
    }

    // Address word must be left-padded with zeros
    if data[4..16].iter().any(|b| *b != 0) {
        return None;
    }

    Some(ApproveCall {
        spender: Address::from_slice(&data[16..36]),
        amount: U256::from_big_endian(&data[36..68]),
    })
}

/// Encode approve calldata
pub fn encode_erc20_approve(spender: Address, amount: U256) -> Bytes {
    let mut data = Vec::with_capacity(APPROVE_CALLDATA_LEN);
    data.extend_from_slice(&ERC20_APPROVE_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(spender.as_bytes());

    let mut amount_word = [0u8; 32];
    amount.to_big_endian(&mut amount_word);
    data.extend_from_slice(&amount_word);

    Bytes::from(data)
}

/// Whether an approval that landed on-chain falls short of what the step required.
/// A revocation is insufficient unless it approved exactly zero.
pub fn is_insufficient_approval(kind: StepKind, approved: U256, required: U256) -> bool {
    match kind {
        StepKind::TokenRevocationTransaction => !approved.is_zero(),
        _ => approved < required,
    }
}
