//! Mempool polling and double-spend linking.

use log::info;

use chaindex_daemon::{NodeResolver, NodeRpc};
use chaindex_types::Hash256;

use crate::service::Service;
use crate::Result;

impl<N: NodeRpc> Service<N> {
    /// Imports every mempool txid not seen recently. Returns whether new
    /// transactions arrived.
    pub async fn query_mempool(&mut self) -> Result<bool> {
        let txids = self.node.raw_mempool().await?;
        let fresh: Vec<Hash256> = txids
            .into_iter()
            .filter(|txid| !self.mempool_seen.contains(txid))
            .collect();
        if fresh.is_empty() {
            return Ok(false);
        }
        for txid in fresh {
            self.session
                .check_need_import_transaction(&txid, Some(&NodeResolver(&self.node)), None, true)
                .await?;
            self.mempool_seen.insert(txid);
        }
        Ok(true)
    }

    /// Links unconfirmed transactions that can no longer make it on chain to
    /// the transaction that beat them. Runs once per chain advance: the tip
    /// hash is remembered so an unchanged chain costs nothing.
    pub async fn check_mempool_for_doublespends(&mut self) -> Result<bool> {
        let tip = match self.session.chaintip().await? {
            Some(tip) => tip,
            None => return Ok(false),
        };
        if self.last_doublespend_tip == Some(tip.hash) {
            return Ok(false);
        }

        let mut marked = 0;
        if let Some(tip_coinbase) = self.session.coinbase_tx_of_block(tip.id).await? {
            marked += self.session.mark_coinbase_doublespends(tip_coinbase).await?;
        }
        marked += self.session.mark_spent_input_doublespends().await?;
        marked += self.session.propagate_doublespends().await?;
        self.session.commit().await?;

        self.last_doublespend_tip = Some(tip.hash);
        if marked > 0 {
            info!("linked {marked} double-spent mempool transactions");
        }
        Ok(marked > 0)
    }
}
