//! Chained back-fill phases for databases created by older releases.
//!
//! Each `migrate_old_data` call advances by exactly one unit so the
//! scheduler can interleave migration work with everything else; a phase
//! transition resets the cursor for the next phase.

use log::{info, warn};

use chaindex_daemon::NodeRpc;

use crate::service::Service;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Mutations,
    AddressScripts,
    BlockTotalFee,
    CoinbaseNewcoins,
    Done,
}

pub(crate) struct Migration {
    pub(crate) phase: Phase,
    pub(crate) cursor: i64,
}

impl Default for Migration {
    fn default() -> Migration {
        Migration {
            phase: Phase::Mutations,
            cursor: 0,
        }
    }
}

impl<N: NodeRpc> Service<N> {
    /// One unit of back-fill work. Returns false only when every phase has
    /// run dry.
    pub async fn migrate_old_data(&mut self) -> Result<bool> {
        match self.migration.phase {
            Phase::Mutations => {
                match self.session.next_tx_without_mutations(self.migration.cursor).await? {
                    Some(tx_id) => {
                        self.session.add_tx_mutations(tx_id).await?;
                        self.session.commit().await?;
                        self.migration.cursor = tx_id;
                        Ok(true)
                    }
                    None => self.advance_phase(),
                }
            }
            Phase::AddressScripts => {
                match self
                    .session
                    .next_address_without_script(self.migration.cursor)
                    .await?
                {
                    Some(address) => {
                        self.migration.cursor = address.id;
                        let encoded = address.address.clone().unwrap_or_default();
                        match self.fetch_script_text(&encoded).await {
                            Some(asm) => {
                                self.session.set_address_raw(address.id, &asm).await?;
                                self.session.commit().await?;
                            }
                            None => warn!("could not backfill script for {encoded}"),
                        }
                        Ok(true)
                    }
                    None => self.advance_phase(),
                }
            }
            Phase::BlockTotalFee => {
                match self
                    .session
                    .next_block_without_totalfee(self.migration.cursor)
                    .await?
                {
                    Some(block_id) => {
                        self.session.backfill_block_totalfee(block_id).await?;
                        self.session.commit().await?;
                        self.migration.cursor = block_id;
                        Ok(true)
                    }
                    None => self.advance_phase(),
                }
            }
            Phase::CoinbaseNewcoins => {
                match self
                    .session
                    .next_coinbase_without_newcoins(self.migration.cursor)
                    .await?
                {
                    Some(block_id) => {
                        self.session.backfill_coinbase_newcoins(block_id).await?;
                        self.session.commit().await?;
                        self.migration.cursor = block_id;
                        Ok(true)
                    }
                    None => self.advance_phase(),
                }
            }
            Phase::Done => Ok(false),
        }
    }

    /// The node renders the script for us: `validateaddress` yields the hex
    /// script, `decodescript` disassembles it. The script text passes
    /// through untouched.
    async fn fetch_script_text(&self, address: &str) -> Option<String> {
        let validated = self.node.validate_address(address).await.ok()?;
        let script_hex = validated.script_pub_key?;
        let decoded = self.node.decode_script(&script_hex).await.ok()?;
        Some(decoded.asm)
    }

    fn advance_phase(&mut self) -> Result<bool> {
        let next = match self.migration.phase {
            Phase::Mutations => Phase::AddressScripts,
            Phase::AddressScripts => Phase::BlockTotalFee,
            Phase::BlockTotalFee => Phase::CoinbaseNewcoins,
            Phase::CoinbaseNewcoins => Phase::Done,
            Phase::Done => return Ok(false),
        };
        info!("migration phase {:?} complete, next up {:?}", self.migration.phase, next);
        self.migration.phase = next;
        self.migration.cursor = 0;
        Ok(true)
    }
}
