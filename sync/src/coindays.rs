//! Coin-days-destroyed accumulation.

use log::debug;

use chaindex_daemon::NodeRpc;

use crate::service::Service;
use crate::Result;

const BATCH_SIZE: i64 = 50;
const SECONDS_PER_DAY: f64 = 86_400.0;

impl<N: NodeRpc> Service<N> {
    /// Computes coin-days-destroyed for the next batch of confirmed
    /// transactions that do not have a value yet, oldest blocks first.
    /// Inputs older than the spending transaction contribute positively;
    /// out-of-order timestamps clamp at zero.
    pub async fn update_coindays_destroyed(&mut self) -> Result<bool> {
        let batch = self
            .session
            .next_transactions_without_coindays(BATCH_SIZE)
            .await?;
        if batch.is_empty() {
            return Ok(false);
        }

        for candidate in &batch {
            let tx_time = candidate.firstseen.unwrap_or(candidate.block_time);
            let inputs = self.session.input_ages(candidate.tx_id).await?;
            let coindays: f64 = inputs
                .iter()
                .map(|(amount, source_time)| {
                    amount.as_coins() * ((tx_time - source_time).max(0) as f64) / SECONDS_PER_DAY
                })
                .sum();
            self.session.insert_coindays(candidate.tx_id, coindays).await?;
        }
        self.session.commit().await?;
        debug!("recorded coin-days for {} transactions", batch.len());
        Ok(true)
    }
}
