//! Received-block pipeline behavior.

use super::Harness;
use crate::chain::Repository as _;
use crate::consensus::ConsensusError;
use crate::node::error::ProcessError;
use crate::node::future_blocks::FutureBlocks;
use crate::node::handle_process_failure;
use crate::node::stats::BlockStats;
use crate::node::unix_now;
use crate::testing::{authority_key, build_child, build_child_at, signed_tx};
use assert_matches::assert_matches;
use std::sync::Arc;

#[tokio::test]
async fn valid_child_of_genesis_becomes_best() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let tx = signed_tx(&authority_key(9), 1);
    let b1 = h.chain.extend_with(vec![tx]);

    assert!(h.process(&b1).await?);
    assert_eq!(h.repo.best_id(), b1.id());
    assert!(h.log_db.contains(&b1.id()));
    // The block is over a day old, so the log plan ran in the catch-up
    // regime with fsync disabled.
    assert_eq!(h.log_db.sync_off_writer_count(), 1);
    assert_eq!(h.log_db.writer_count(), 0);
    // Nothing touched the pool on a plain extension.
    assert!(h.pool.is_empty());
    Ok(())
}

#[tokio::test]
async fn known_block_is_a_noop() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let b1 = h.chain.extend_empty();

    assert!(h.process(&b1).await?);
    assert_eq!(h.repo.append_count(), 1);

    // Feeding the same block again neither errors nor writes.
    assert!(!h.process(&b1).await?);
    assert_eq!(h.repo.append_count(), 1);
    assert_eq!(h.log_db.entries().len(), 1);
    Ok(())
}

#[tokio::test]
async fn far_ahead_blocks_are_gated_without_side_effects() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let b1 = h.chain.extend_empty();
    let b2 = h.chain.extend_empty();
    let b3 = h.chain.extend_empty();

    assert_matches!(
        h.process(&b2).await,
        Err(ProcessError::TemporarilyUnprocessable)
    );
    assert_matches!(
        h.process(&b3).await,
        Err(ProcessError::TemporarilyUnprocessable)
    );
    assert_eq!(h.repo.append_count(), 0);
    assert!(h.log_db.entries().is_empty());

    // In order they all go through, and the guard follows along.
    assert!(h.process(&b1).await?);
    assert!(h.process(&b2).await?);
    assert!(h.process(&b3).await?);
    assert_eq!(h.repo.best_id(), b3.id());
    Ok(())
}

#[tokio::test]
async fn missing_parent_at_admissible_height_is_reported() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let b1 = h.chain.extend_empty();
    assert!(h.process(&b1).await?);

    // A sibling branch whose height-1 block we never saw.
    let other = authority_key(2);
    let b1_alt = build_child(&h.chain.genesis().header, &other, vec![], 2);
    let b2_alt = build_child(&b1_alt.header, &other, vec![], 1);

    assert_matches!(h.process(&b2_alt).await, Err(ProcessError::ParentMissing));
    Ok(())
}

#[tokio::test]
async fn unresolvable_blocks_queue_only_behind_a_parked_parent() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let b1 = h.chain.extend_empty();
    assert!(h.process(&b1).await?);

    let future_blocks = FutureBlocks::new(16);
    let mut stats = BlockStats::default();

    // b2 carries a timestamp ahead of wall time; b3 builds on it.
    let b2 = build_child_at(h.chain.head(), h.chain.key(), vec![], 1, unix_now() + 1_000);
    let b3 = build_child(&b2.header, h.chain.key(), vec![], 1);

    // b3 first: number too far ahead, parent unknown and not parked.
    let err = h.process(&b3).await.unwrap_err();
    assert_matches!(&err, ProcessError::TemporarilyUnprocessable);
    handle_process_failure(&Arc::new(b3.clone()), err, &future_blocks, &mut stats);
    assert!(!future_blocks.contains(&b3.id()));

    // b2 is a future block; it parks unconditionally.
    let err = h.process(&b2).await.unwrap_err();
    assert_matches!(&err, ProcessError::FutureBlock);
    handle_process_failure(&Arc::new(b2.clone()), err, &future_blocks, &mut stats);
    assert!(future_blocks.contains(&b2.id()));

    // Now b3 queues behind its parked parent, and the drain order is by
    // ascending number.
    let err = h.process(&b3).await.unwrap_err();
    handle_process_failure(&Arc::new(b3.clone()), err, &future_blocks, &mut stats);
    assert!(future_blocks.contains(&b3.id()));
    let drained: Vec<_> = future_blocks
        .drain_ordered()
        .iter()
        .map(|b| b.id())
        .collect();
    assert_eq!(drained, vec![b2.id(), b3.id()]);
    Ok(())
}

#[tokio::test]
async fn parked_blocks_replay_in_order_once_parent_lands() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let b1 = h.chain.extend_empty();
    let b2 = h.chain.extend_empty();
    let b3 = h.chain.extend_empty();
    assert!(h.process(&b1).await?);

    let future_blocks = FutureBlocks::new(16);
    future_blocks.set(Arc::new(b3.clone()));
    future_blocks.set(Arc::new(b2.clone()));

    // The drain path: ascending replay; successes leave the cache.
    for block in future_blocks.drain_ordered() {
        let mut stats = BlockStats::default();
        if h.processor.process_block(&block, &mut stats).await.is_ok() {
            future_blocks.remove(&block.id());
        }
    }
    assert_eq!(h.repo.best_id(), b3.id());
    assert_eq!(future_blocks.len(), 0);
    Ok(())
}

#[tokio::test]
async fn heavier_sibling_takes_over_best_and_repopulates_pool() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let tx = signed_tx(&authority_key(9), 7);
    let b1 = h.chain.extend_empty();
    let b2 = h.chain.extend_with(vec![tx.clone()]);
    assert!(h.process(&b1).await?);
    assert!(h.process(&b2).await?);
    assert_eq!(
        h.log_db.entries(),
        vec![(1, b1.id()), (2, b2.id())]
    );

    // A heavier block at the same height on top of b1.
    let b2_alt = build_child(&b1.header, &authority_key(2), vec![], 2);
    assert!(h.process(&b2_alt).await?);

    assert_eq!(h.repo.best_id(), b2_alt.id());
    // The log index followed the reorg: b2's entry was truncated away.
    assert_eq!(
        h.log_db.entries(),
        vec![(1, b1.id()), (2, b2_alt.id())]
    );
    // b2's transaction went back to the pool, exactly once.
    assert_eq!(h.pool.times_added(&tx.hash()), 1);
    assert!(h.pool.contains_hash(&tx.hash()));
    Ok(())
}

#[tokio::test]
async fn lighter_sibling_is_stored_without_switching_best() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let b1 = h.chain.extend_empty();
    let b2 = h.chain.extend_with(vec![signed_tx(&authority_key(9), 1)]);
    assert!(h.process(&b1).await?);
    assert!(h.process(&b2).await?);

    // Same height, same score: b2 stays best, the sibling is stored.
    let b2_alt = build_child(&b1.header, &authority_key(2), vec![], 1);
    let became_best = h.process(&b2_alt).await?;

    assert_eq!(h.repo.scan_conflicts(2)?, 2);
    if became_best {
        assert_eq!(h.repo.best_id(), b2_alt.id());
    } else {
        assert_eq!(h.repo.best_id(), b2.id());
        // The losing side must not touch the pool.
        assert!(h.pool.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn log_db_failure_is_isolated_and_latched() -> anyhow::Result<()> {
    let mut h = Harness::new();
    h.log_db.fail_writes(true);

    let b1 = h.chain.extend_empty();
    assert!(h.process(&b1).await?);
    // The chain commit went through even though the log write failed.
    assert_eq!(h.repo.best_id(), b1.id());
    assert!(h.processor.log_db_failed());
    assert!(h.log_db.entries().is_empty());

    // Healing the log db does not matter: the latch holds for the
    // process lifetime and no further writers are opened.
    h.log_db.fail_writes(false);
    let b2 = h.chain.extend_empty();
    assert!(h.process(&b2).await?);
    assert!(h.log_db.entries().is_empty());
    assert_eq!(h.log_db.writer_count() + h.log_db.sync_off_writer_count(), 1);
    Ok(())
}

#[tokio::test]
async fn double_signing_at_one_height_is_tolerated() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let b1 = h.chain.extend_empty();
    assert!(h.process(&b1).await?);

    // The same authority signs a heavier sibling of b1.
    let b1_alt = build_child(&h.chain.genesis().header, h.chain.key(), vec![], 2);
    assert!(h.process(&b1_alt).await?);

    // Detection is observability only: both blocks stay stored.
    assert_eq!(h.repo.scan_conflicts(1)?, 2);
    assert_eq!(h.repo.best_id(), b1_alt.id());
    Ok(())
}

#[tokio::test]
async fn bft_select_decides_best_past_finality() -> anyhow::Result<()> {
    let mut h = Harness::with_finality(0);
    h.bft.set_select_result(false);

    let b1 = h.chain.extend_empty();
    // Stored, but the finality engine refused to make it best.
    assert!(!h.process(&b1).await?);
    assert_ne!(h.repo.best_id(), b1.id());
    assert_eq!(h.repo.append_count(), 1);
    // The engine still learned about the commit, as a received block.
    assert_eq!(h.bft.committed(), vec![(b1.id(), false)]);
    Ok(())
}

#[tokio::test]
async fn bft_rejected_parent_stops_processing() -> anyhow::Result<()> {
    let mut h = Harness::with_finality(0);
    let b1 = h.chain.extend_empty();
    assert!(h.process(&b1).await?);

    h.bft.set_accepts(false);
    let b2 = h.chain.extend_empty();
    assert_matches!(h.process(&b2).await, Err(ProcessError::BftRejected));
    assert_eq!(h.repo.append_count(), 1);
    Ok(())
}

#[tokio::test]
async fn critical_consensus_failure_drops_the_block() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let b1 = h.chain.extend_empty();

    h.consensus
        .fail_next(ConsensusError::Critical("score out of schedule".into()));
    assert_matches!(h.process(&b1).await, Err(ProcessError::Critical(_)));
    assert_eq!(h.repo.append_count(), 0);

    // The block itself was fine; it goes through on a clean retry.
    assert!(h.process(&b1).await?);
    Ok(())
}

#[tokio::test]
async fn concurrent_feeds_commit_each_block_exactly_once() -> anyhow::Result<()> {
    let mut h = Harness::new();
    let blocks: Vec<_> = (0..6).map(|_| Arc::new(h.chain.extend_empty())).collect();
    let last = blocks.last().expect("non-empty").id();

    let h = Arc::new(h);
    let mut feeders = Vec::new();
    for _ in 0..2 {
        let h = h.clone();
        let blocks = blocks.clone();
        feeders.push(tokio::spawn(async move {
            for block in blocks {
                loop {
                    let mut stats = BlockStats::default();
                    match h.processor.process_block(&block, &mut stats).await {
                        Ok(_) => break,
                        Err(err) if err.is_queueable() => tokio::task::yield_now().await,
                        Err(err) => panic!("unexpected processing error: {err}"),
                    }
                }
            }
        }));
    }
    for feeder in feeders {
        feeder.await?;
    }

    // Both feeders pushed all six blocks; the serialized processor saw
    // through the duplicates.
    assert_eq!(h.repo.append_count(), 6);
    assert_eq!(h.repo.best_id(), last);
    Ok(())
}
