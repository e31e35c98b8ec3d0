//! JSON-RPC response shapes (`jsonParsed` encoding) and their conversion into
//! the crate's own types.

use super::LedgerError;
use crate::types::{ParsedTransaction, TokenBalanceEntry, TokenHolder, TokenInfo};
use serde::Deserialize;
use serde_json::Value;
use solana_account_decoder_client_types::token::UiTokenAmount;

#[derive(Debug, Deserialize)]
pub struct RpcEnvelope<T> {
    #[serde(default = "Option::default")]
    pub result: Option<T>,
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

impl<T> RpcEnvelope<T> {
    pub fn into_result(self) -> Result<Option<T>, LedgerError> {
        match self.error {
            Some(err) => Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result),
        }
    }
}

/// `getProgramAccounts` entry
#[derive(Debug, Deserialize)]
pub struct KeyedTokenAccount {
    pub pubkey: String,
    pub account: TokenAccountWire,
}

#[derive(Debug, Deserialize)]
pub struct TokenAccountWire {
    pub data: AccountDataWire,
}

/// Accounts the node could not parse come back as `[data, encoding]`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AccountDataWire {
    Parsed { parsed: ParsedTokenAccount },
    Raw(Value),
}

#[derive(Debug, Deserialize)]
pub struct ParsedTokenAccount {
    pub info: TokenAccountInfo,
}

#[derive(Debug, Deserialize)]
pub struct TokenAccountInfo {
    pub owner: String,
    #[serde(rename = "tokenAmount")]
    pub token_amount: UiTokenAmount,
}

impl KeyedTokenAccount {
    pub fn into_holder(self) -> Option<TokenHolder> {
        match self.account.data {
            AccountDataWire::Parsed { parsed } => Some(TokenHolder {
                owner: parsed.info.owner,
                balance: parsed.info.token_amount.ui_amount.unwrap_or(0.0),
                raw_quantity: parsed.info.token_amount.amount,
            }),
            AccountDataWire::Raw(_) => {
                log::debug!("Skipping unparsed token account {}", self.pubkey);
                None
            }
        }
    }
}

/// `getSignaturesForAddress` entry
#[derive(Debug, Deserialize)]
pub struct SignatureInfoWire {
    pub signature: String,
    #[serde(rename = "blockTime")]
    pub block_time: Option<i64>,
}

/// `getTransaction` result
#[derive(Debug, Deserialize)]
pub struct TransactionResultWire {
    #[serde(rename = "blockTime")]
    pub block_time: Option<i64>,
    pub meta: Option<TransactionMetaWire>,
    pub transaction: TransactionWire,
}

#[derive(Debug, Deserialize)]
pub struct TransactionMetaWire {
    #[serde(rename = "preTokenBalances", default)]
    pub pre_token_balances: Option<Vec<TokenBalanceWire>>,
    #[serde(rename = "postTokenBalances", default)]
    pub post_token_balances: Option<Vec<TokenBalanceWire>>,
}

#[derive(Debug, Deserialize)]
pub struct TokenBalanceWire {
    #[serde(rename = "accountIndex")]
    pub account_index: u32,
    pub mint: String,
    pub owner: Option<String>,
    #[serde(rename = "uiTokenAmount")]
    pub ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Deserialize)]
pub struct TransactionWire {
    pub message: MessageWire,
}

#[derive(Debug, Deserialize)]
pub struct MessageWire {
    #[serde(default)]
    pub instructions: Vec<InstructionWire>,
}

#[derive(Debug, Deserialize)]
pub struct InstructionWire {
    #[serde(rename = "programId")]
    pub program_id: Option<String>,
}

impl From<TokenBalanceWire> for TokenBalanceEntry {
    fn from(wire: TokenBalanceWire) -> Self {
        TokenBalanceEntry {
            account_index: wire.account_index,
            mint: wire.mint,
            owner: wire.owner,
            ui_amount: wire.ui_token_amount.ui_amount,
            amount: wire.ui_token_amount.amount,
            decimals: wire.ui_token_amount.decimals,
        }
    }
}

impl TransactionResultWire {
    /// `None` when the node returned no status meta (nothing to classify)
    pub fn into_parsed(self, signature: &str) -> Option<ParsedTransaction> {
        let meta = self.meta?;

        Some(ParsedTransaction {
            signature: signature.to_string(),
            block_time: self.block_time,
            program_ids: self
                .transaction
                .message
                .instructions
                .into_iter()
                .filter_map(|ix| ix.program_id)
                .collect(),
            pre_token_balances: meta
                .pre_token_balances
                .unwrap_or_default()
                .into_iter()
                .map(TokenBalanceEntry::from)
                .collect(),
            post_token_balances: meta
                .post_token_balances
                .unwrap_or_default()
                .into_iter()
                .map(TokenBalanceEntry::from)
                .collect(),
        })
    }
}

/// `getAccountInfo` result for the mint account
#[derive(Debug, Deserialize)]
pub struct MintAccountResult {
    pub value: Option<MintAccountWire>,
}

#[derive(Debug, Deserialize)]
pub struct MintAccountWire {
    pub data: MintDataWire,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MintDataWire {
    Parsed { parsed: ParsedMint },
    Raw(Value),
}

#[derive(Debug, Deserialize)]
pub struct ParsedMint {
    pub info: MintInfo,
}

#[derive(Debug, Deserialize)]
pub struct MintInfo {
    pub decimals: u8,
    pub supply: String,
}

impl MintAccountResult {
    pub fn into_token_info(self, mint: &str) -> Result<TokenInfo, LedgerError> {
        let account = self
            .value
            .ok_or_else(|| LedgerError::Decode(format!("Mint account {} not found", mint)))?;

        match account.data {
            MintDataWire::Parsed { parsed } => Ok(TokenInfo {
                address: mint.to_string(),
                decimals: parsed.info.decimals,
                supply: parsed.info.supply,
            }),
            MintDataWire::Raw(_) => Err(LedgerError::Decode(format!(
                "Account {} is not a parsed token mint",
                mint
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_accounts_decode() {
        let body = r#"{
            "jsonrpc": "2.0",
            "id": 1,
            "result": [
                {
                    "pubkey": "3emsAVdmGKERbHjmGfQ6oZ1e35dkf5iYcS6U4CPKFVaa",
                    "account": {
                        "data": {
                            "program": "spl-token",
                            "parsed": {
                                "type": "account",
                                "info": {
                                    "isNative": false,
                                    "mint": "9BB6NFEcjBCtnNLFko2FqVQBq8HHM13kCyYcdQbgpump",
                                    "owner": "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1",
                                    "state": "initialized",
                                    "tokenAmount": {
                                        "amount": "1250000000",
                                        "decimals": 6,
                                        "uiAmount": 1250.0,
                                        "uiAmountString": "1250"
                                    }
                                }
                            },
                            "space": 165
                        },
                        "executable": false,
                        "lamports": 2039280,
                        "owner": "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
                        "rentEpoch": 0
                    }
                },
                {
                    "pubkey": "7Np41oeYqPefeNQEHSv1UDhYrehxin3NStELsSKCT4K2",
                    "account": { "data": ["AAAA", "base64"] }
                }
            ]
        }"#;

        let envelope: RpcEnvelope<Vec<KeyedTokenAccount>> = serde_json::from_str(body).unwrap();
        let holders: Vec<TokenHolder> = envelope
            .into_result()
            .unwrap()
            .unwrap()
            .into_iter()
            .filter_map(KeyedTokenAccount::into_holder)
            .collect();

        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].owner, "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1");
        assert_eq!(holders[0].balance, 1250.0);
        assert_eq!(holders[0].raw_quantity, "1250000000");
    }

    #[test]
    fn test_rpc_error_surfaces() {
        let body = r#"{"jsonrpc":"2.0","id":7,"error":{"code":-32005,"message":"Node is behind"}}"#;
        let envelope: RpcEnvelope<Vec<SignatureInfoWire>> = serde_json::from_str(body).unwrap();

        match envelope.into_result() {
            Err(LedgerError::Rpc { code, message }) => {
                assert_eq!(code, -32005);
                assert_eq!(message, "Node is behind");
            }
            other => panic!("expected rpc error, got {:?}", other),
        }
    }

    #[test]
    fn test_transaction_decode() {
        let body = r#"{
            "jsonrpc": "2.0",
            "id": 3,
            "result": {
                "blockTime": 1718000000,
                "slot": 270000000,
                "meta": {
                    "err": null,
                    "fee": 5000,
                    "preTokenBalances": [
                        {
                            "accountIndex": 2,
                            "mint": "9BB6NFEcjBCtnNLFko2FqVQBq8HHM13kCyYcdQbgpump",
                            "owner": "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1",
                            "programId": "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
                            "uiTokenAmount": {"amount": "100000000", "decimals": 6, "uiAmount": 100.0, "uiAmountString": "100"}
                        }
                    ],
                    "postTokenBalances": [
                        {
                            "accountIndex": 2,
                            "mint": "9BB6NFEcjBCtnNLFko2FqVQBq8HHM13kCyYcdQbgpump",
                            "owner": "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1",
                            "programId": "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
                            "uiTokenAmount": {"amount": "90000000", "decimals": 6, "uiAmount": 90.0, "uiAmountString": "90"}
                        }
                    ]
                },
                "transaction": {
                    "signatures": ["5h6xBEauJ3PK6SWCZ1PGjBvj8vDdWG3KpwATGy1ARAXFSDwt8GFXM7W5Ncn16wmqokgpiKRLuS83KUxyZyv2sUYv"],
                    "message": {
                        "accountKeys": [],
                        "instructions": [
                            {"programId": "ComputeBudget111111111111111111111111111111", "data": "3DTZbgwsozUF", "accounts": []},
                            {"programId": "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8", "data": "abc", "accounts": []}
                        ]
                    }
                }
            }
        }"#;

        let envelope: RpcEnvelope<TransactionResultWire> = serde_json::from_str(body).unwrap();
        let parsed = envelope
            .into_result()
            .unwrap()
            .unwrap()
            .into_parsed("sig-1")
            .unwrap();

        assert_eq!(parsed.signature, "sig-1");
        assert_eq!(parsed.block_time, Some(1718000000));
        assert_eq!(parsed.program_ids.len(), 2);
        assert_eq!(parsed.program_ids[1], "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");
        assert_eq!(parsed.pre_token_balances[0].ui_amount, Some(100.0));
        assert_eq!(parsed.post_token_balances[0].amount, "90000000");
    }

    #[test]
    fn test_missing_transaction_is_none() {
        let body = r#"{"jsonrpc":"2.0","id":4,"result":null}"#;
        let envelope: RpcEnvelope<TransactionResultWire> = serde_json::from_str(body).unwrap();
        assert!(envelope.into_result().unwrap().is_none());
    }

    #[test]
    fn test_mint_info_decode() {
        let body = r#"{
            "context": {"slot": 1},
            "value": {
                "data": {
                    "program": "spl-token",
                    "parsed": {
                        "type": "mint",
                        "info": {"decimals": 6, "freezeAuthority": null, "isInitialized": true, "mintAuthority": null, "supply": "999999999000000"}
                    },
                    "space": 82
                },
                "executable": false,
                "lamports": 1461600,
                "owner": "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"
            }
        }"#;

        let result: MintAccountResult = serde_json::from_str(body).unwrap();
        let info = result.into_token_info("mint-a").unwrap();
        assert_eq!(info.decimals, 6);
        assert_eq!(info.supply, "999999999000000");
    }
}
