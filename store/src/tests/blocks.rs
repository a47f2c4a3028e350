use super::*;

use chaindex_types::Amount;

use crate::CounterId;

#[tokio::test]
async fn genesis_imports_without_transactions() {
    let (pool, mut session) = setup(true).await;
    let resolver = MapResolver::new([]);

    let genesis = block_info(block_hash(0), 0, 1_700_000_000, &[txid(9)], None);
    session.import_block(&genesis, &resolver, true).await.unwrap();

    assert_eq!(1, pool.fetch_count("block").await.unwrap());
    assert_eq!(0, pool.fetch_count("tx").await.unwrap());
    assert_eq!(0, pool.fetch_count("coinbase").await.unwrap());

    let tip = session.chaintip().await.unwrap().unwrap();
    assert_eq!(tip.height, Some(0));
    assert_eq!(tip.totalfee, Amount::ZERO);

    assert_eq!(session.counter(CounterId::TotalBlocks).await.unwrap(), 1);
    assert_eq!(session.counter(CounterId::TotalTransactions).await.unwrap(), 0);
    assert_eq!(session.counter(CounterId::TotalFees).await.unwrap(), 0);
    assert_eq!(
        session.counter(CounterId::TotalCoinsReleased).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn single_coinbase_block_mints_coins() {
    let (pool, mut session) = setup(true).await;
    seed_chain_b1(&mut session).await;

    assert_eq!(2, pool.fetch_count("block").await.unwrap());
    assert_eq!(1, pool.fetch_count("tx").await.unwrap());
    assert_eq!(1, pool.fetch_count("coinbase").await.unwrap());

    // coinbase is excluded from the transaction counter
    assert_eq!(session.counter(CounterId::TotalBlocks).await.unwrap(), 2);
    assert_eq!(session.counter(CounterId::TotalTransactions).await.unwrap(), 0);
    assert_eq!(
        session.counter(CounterId::TotalCoinsReleased).await.unwrap(),
        Amount::from_coins(50.0).sats()
    );

    let t1 = session.transaction_by_txid(&txid(1)).await.unwrap().unwrap();
    assert!(t1.confirmed());
    assert_eq!(t1.totalvalue, Amount::from_coins(50.0));
    assert_eq!(t1.fee, Amount::ZERO);

    // the payout address is queued for reconciliation, then settles at 50
    let dirty = session.next_dirty_address(1, false).await.unwrap().unwrap();
    assert_eq!(dirty.address.as_deref(), Some("GaddrA"));
    session.update_address_balance(&dirty).await.unwrap();
    let clean = session.next_dirty_address(1, false).await.unwrap();
    assert!(clean.is_none());
    assert_eq!(
        session.confirmed_unspent_balance(dirty.id).await.unwrap(),
        Amount::from_coins(50.0)
    );
}

#[tokio::test]
async fn regular_spend_settles_fees_and_mutations() {
    let (pool, mut session) = setup(true).await;
    seed_chain_b1(&mut session).await;

    let c2 = coinbase_tx(txid(2), "03abc124", &[(0, "GpoolPayout", 50.05)]);
    let t2 = spend_tx(
        txid(3),
        &[(txid(1), 0)],
        &[(0, "GaddrB", 49.9), (1, "GaddrA", 0.05)],
    );
    let resolver = MapResolver::new([c2, t2]);
    let b2 = block_info(
        block_hash(2),
        2,
        1_700_000_120,
        &[txid(2), txid(3)],
        Some(block_hash(1)),
    );
    session.import_block(&b2, &resolver, true).await.unwrap();

    let t2 = session.transaction_by_txid(&txid(3)).await.unwrap().unwrap();
    assert!(t2.confirmed());
    assert_eq!(t2.totalvalue, Amount::from_coins(50.0));
    assert_eq!(t2.fee, Amount::from_coins(0.05));

    let b2 = session.block_by_hash(&block_hash(2)).await.unwrap().unwrap();
    assert_eq!(b2.totalfee, Amount::from_coins(0.05));

    // subsidy = coinbase outputs - block fees
    let mut conn = pool.acquire().await.unwrap();
    let coinbase = crate::queries::coinbase_for_block(&mut conn, b2.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coinbase.newcoins, Amount::from_coins(50.0));
    drop(conn);

    // spent-link symmetry on the consumed output
    let t1_id = session.transaction_internal_id(&txid(1)).await.unwrap().unwrap();
    let mut conn = pool.acquire().await.unwrap();
    let spent = crate::queries::output_of(&mut conn, t1_id, 0)
        .await
        .unwrap()
        .unwrap();
    assert!(spent.spentby.is_some());
    drop(conn);

    // mutations: A nets -49.95, B nets +49.9
    let reader = crate::Reader::new(pool.clone());
    let mutations = reader.transaction_mutations(t2.id).await.unwrap();
    let mut by_address: std::collections::HashMap<String, Amount> = Default::default();
    for mutation in mutations {
        by_address.insert(mutation.address.unwrap(), mutation.amount);
    }
    assert_eq!(by_address["GaddrA"], Amount::from_coins(-49.95));
    assert_eq!(by_address["GaddrB"], Amount::from_coins(49.9));

    assert_eq!(session.counter(CounterId::TotalTransactions).await.unwrap(), 1);
    assert_eq!(
        session.counter(CounterId::TotalFees).await.unwrap(),
        Amount::from_coins(0.05).sats()
    );
}

#[tokio::test]
async fn reimporting_a_known_block_adds_nothing() {
    let (pool, mut session) = setup(true).await;
    let resolver = seed_chain_b1(&mut session).await;

    let blocks = pool.fetch_count("block").await.unwrap();
    let txs = pool.fetch_count("tx").await.unwrap();
    let blocktxs = pool.fetch_count("blocktx").await.unwrap();

    let b1 = block_info(
        block_hash(1),
        1,
        1_700_000_060,
        &[txid(1)],
        Some(block_hash(0)),
    );
    session.import_block(&b1, &resolver, true).await.unwrap();

    assert_eq!(blocks, pool.fetch_count("block").await.unwrap());
    assert_eq!(txs, pool.fetch_count("tx").await.unwrap());
    assert_eq!(blocktxs, pool.fetch_count("blocktx").await.unwrap());

    let b1 = session.block_by_hash(&block_hash(1)).await.unwrap().unwrap();
    assert_eq!(b1.height, Some(1));

    // the skipped confirmations force a counter rebuild
    assert!(!session.counters_valid(&CounterId::ALL).await.unwrap());
    session.revalidate_counters().await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(session.counter(CounterId::TotalBlocks).await.unwrap(), 2);
}

#[tokio::test]
async fn orphaning_unconfirms_and_reimport_restores() {
    let (pool, mut session) = setup(true).await;
    seed_chain_b1(&mut session).await;

    let c2 = coinbase_tx(txid(2), "03abc124", &[(0, "GpoolPayout", 50.05)]);
    let t2 = spend_tx(txid(3), &[(txid(1), 0)], &[(0, "GaddrB", 49.95)]);
    let resolver = MapResolver::new([c2, t2]);
    let b2 = block_info(
        block_hash(2),
        2,
        1_700_000_120,
        &[txid(2), txid(3)],
        Some(block_hash(1)),
    );
    session.import_block(&b2, &resolver, true).await.unwrap();

    session.orphan_blocks(2).await.unwrap();

    let b2_row = session.block_by_hash(&block_hash(2)).await.unwrap().unwrap();
    assert_eq!(b2_row.height, None);
    let t2_row = session.transaction_by_txid(&txid(3)).await.unwrap().unwrap();
    assert!(!t2_row.confirmed());

    // the consumed output is unspent again
    let t1_id = session.transaction_internal_id(&txid(1)).await.unwrap().unwrap();
    let mut conn = pool.acquire().await.unwrap();
    let utxo = crate::queries::output_of(&mut conn, t1_id, 0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(utxo.spentby, None);
    drop(conn);

    assert!(!session.counters_valid(&CounterId::ALL).await.unwrap());

    // a replacement block spends the same output differently
    let c2b = coinbase_tx(txid(4), "03abc125", &[(0, "GpoolPayout", 50.01)]);
    let t2b = spend_tx(txid(5), &[(txid(1), 0)], &[(0, "GaddrC", 49.99)]);
    let resolver = MapResolver::new([c2b, t2b]);
    let b2b = block_info(
        block_hash(3),
        2,
        1_700_000_150,
        &[txid(4), txid(5)],
        Some(block_hash(1)),
    );
    session.import_block(&b2b, &resolver, true).await.unwrap();

    let tip = session.chaintip().await.unwrap().unwrap();
    assert_eq!(tip.hash, block_hash(3));
    assert_eq!(tip.height, Some(2));

    // the output now belongs to the replacement spender
    let mut conn = pool.acquire().await.unwrap();
    let utxo = crate::queries::output_of(&mut conn, t1_id, 0)
        .await
        .unwrap()
        .unwrap();
    drop(conn);
    let t2b_row = session.transaction_by_txid(&txid(5)).await.unwrap().unwrap();
    assert!(t2b_row.confirmed());
    assert!(utxo.spentby.is_some());

    // counters were rebuilt during the import and match the store again
    assert!(session.counters_valid(&CounterId::ALL).await.unwrap());
    assert_eq!(session.counter(CounterId::TotalBlocks).await.unwrap(), 3);
    assert_eq!(session.counter(CounterId::TotalTransactions).await.unwrap(), 1);
}

#[tokio::test]
async fn verifying_state_repairs_a_half_committed_block() {
    let (pool, mut session) = setup(true).await;
    seed_chain_b1(&mut session).await;

    // simulate a crash between the block commit and its coinbase data
    let mut conn = pool.acquire().await.unwrap();
    sqlx::query("DELETE FROM coinbase")
        .execute(&mut *conn)
        .await
        .unwrap();
    drop(conn);

    session.remove_blocks_without_coinbase().await.unwrap();

    assert!(session.block_by_hash(&block_hash(1)).await.unwrap().is_none());
    let t1 = session.transaction_by_txid(&txid(1)).await.unwrap().unwrap();
    assert!(!t1.confirmed());

    // genesis has no coinbase data either, but is exempt
    assert!(session.block_by_hash(&block_hash(0)).await.unwrap().is_some());
}

#[tokio::test]
async fn verifying_state_reconciles_confirmation_links() {
    let (pool, mut session) = setup(true).await;
    seed_chain_b1(&mut session).await;

    // break the link the way an aborted confirm would leave it
    let mut conn = pool.acquire().await.unwrap();
    sqlx::query("UPDATE tx SET confirmation = NULL")
        .execute(&mut *conn)
        .await
        .unwrap();
    drop(conn);

    session.verify_confirmed_transactions_state().await.unwrap();
    let t1 = session.transaction_by_txid(&txid(1)).await.unwrap().unwrap();
    assert!(t1.confirmed());
    session.reset().await.unwrap();

    // and the reverse: a confirmation pointing into an orphaned block
    let mut conn = pool.acquire().await.unwrap();
    sqlx::query("UPDATE block SET height = NULL WHERE height = 1")
        .execute(&mut *conn)
        .await
        .unwrap();
    drop(conn);

    session.verify_unconfirmed_transactions_state().await.unwrap();
    let t1 = session.transaction_by_txid(&txid(1)).await.unwrap().unwrap();
    assert!(!t1.confirmed());
}
