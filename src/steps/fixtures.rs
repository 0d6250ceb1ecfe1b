//! Shared test fixtures

use super::approval::encode_erc20_approve;
use super::{Token, TxRequest};

use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Bytes, U256};
use serde_json::json;

pub const MAINNET: u64 = 1;
pub const BASE: u64 = 8453;

pub fn permit2_address() -> Address {
    "0x000000000022d473030f116ddee9f6b43ac78ba3"
        .parse()
        .unwrap()
}

pub fn router_address() -> Address {
    "0x66a9893cc07d91d95644aedd05d03f95e1dba8af"
        .parse()
        .unwrap()
}

pub fn account() -> Address {
    "0x18d058a7e0486e632f7dfc473bc76d72cd201cad"
        .parse()
        .unwrap()
}

pub fn usdc() -> Token {
    Token::new(
        MAINNET,
        "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".parse().unwrap(),
        "USDC",
        6,
    )
}

pub fn input_amount() -> U256 {
    U256::from(1_000_000u64)
}

pub fn tx_request(chain_id: u64, data: Bytes) -> TxRequest {
    TxRequest::new()
        .from(account())
        .to(router_address())
        .data(data)
        .value(U256::zero())
        .chain_id(chain_id)
}

pub fn swap_request(chain_id: u64) -> TxRequest {
    tx_request(chain_id, Bytes::from(vec![0x35, 0x93, 0x56, 0x4c, 0x00]))
}

pub fn approve_request(chain_id: u64, amount: U256) -> TxRequest {
    TxRequest::new()
        .from(account())
        .to(usdc().address)
        .data(encode_erc20_approve(permit2_address(), amount))
        .chain_id(chain_id)
}

pub fn revoke_request(chain_id: u64) -> TxRequest {
    approve_request(chain_id, U256::zero())
}

pub fn wrap_request(chain_id: u64) -> TxRequest {
    // WETH.deposit()
    tx_request(chain_id, Bytes::from(vec![0xd0, 0xe3, 0x0d, 0xb0]))
}

pub fn typed_data(primary_type: &str, chain_id: u64) -> TypedData {
    serde_json::from_value(json!({
        "types": {
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" }
            ],
            primary_type: [
                { "name": "spender", "type": "address" },
                { "name": "nonce", "type": "uint256" }
            ]
        },
        "primaryType": primary_type,
        "domain": {
            "name": "Permit2",
            "chainId": chain_id,
            "verifyingContract": "0x000000000022d473030f116ddee9f6b43ac78ba3"
        },
        "message": {
            "spender": "0x66a9893cc07d91d95644aedd05d03f95e1dba8af",
            "nonce": "0"
        }
    }))
    .unwrap()
}

pub fn permit_payload() -> TypedData {
    typed_data("PermitSingle", MAINNET)
}

pub fn order_payload() -> TypedData {
    typed_data("ExclusiveDutchOrder", MAINNET)
}
