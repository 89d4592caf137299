
use std::time::Duration;

use harness::{block, block_hash, chain, fixture, ip, ok_reply, wait_until, with_ledger};
use mochimap_indexer::chain::sync::CheckOutcome;
use mochimap_indexer::chain::{IndexEvent, SyncJob};
use mochimap_indexer::protocol::BlockType;
use mochimap_indexer::storage::{ids, Collection, Storage, UpdateMode};

fn tip_job(peer: std::net::Ipv4Addr, height: u64, hash: &str) -> SyncJob {
    SyncJob {
        peer,
        height,
        hash: hash.to_string(),
        extension: false,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tip_walks_back_to_genesis() {
    let fx = fixture(false);
    let peer = ip("8.8.4.4");
    let blocks = chain(5, 0);
    fx.client.serve_chain(peer, &blocks);

    let _dispatcher = fx.sync.spawn().expect("dispatcher");
    assert!(fx.sync.spawn().is_none(), "dispatcher starts once");
    fx.sync.check(peer, 5, &blocks[5].hash);

    let store = fx.store.clone();
    assert!(
        wait_until(|| store.len(Collection::Block) == 6, Duration::from_secs(5)).await,
        "every ancestor should be stored"
    );
    for b in &blocks {
        let id = ids::block_id(b.height, &b.hash);
        assert!(fx.store.has(Collection::Block, &id).unwrap(), "missing {}", id);
    }
    // one mining reward per normal block
    assert_eq!(fx.store.len(Collection::Transaction), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_never_cuts_the_parent_walk_short() {
    let fx = fixture(true);
    let (slow, fast) = (ip("9.9.9.9"), ip("1.1.1.1"));
    let blocks = chain(12, 0);
    for peer in [slow, fast] {
        fx.client.serve_chain(peer, &blocks);
        fx.directory
            .apply_probe(peer, &ok_reply(12, &blocks[12].hash, &[]), 0);
    }
    // the sweep repairs from the fast peer while the walk crawls the slow one
    fx.client.set_latency(slow, Duration::from_millis(50));

    let _dispatcher = fx.sync.spawn().unwrap();
    fx.sync.check(slow, 12, &blocks[12].hash);

    let store = fx.store.clone();
    let complete = wait_until(|| store.len(Collection::Block) == 13, Duration::from_secs(10)).await;
    let missing: Vec<u64> = blocks
        .iter()
        .filter(|b| {
            !fx.store
                .has(Collection::Block, &ids::block_id(b.height, &b.hash))
                .unwrap()
        })
        .map(|b| b.height)
        .collect();
    assert!(complete, "heights never indexed: {:?}", missing);
}

#[tokio::test]
async fn test_non_hex_hash_rejected_before_download() {
    let fx = fixture(false);
    let peer = ip("8.8.4.4");
    let mut events = fx.sync.subscribe();

    let job = tip_job(peer, 3, "aaaaaaaaaaaaaaa\u{e9}");
    assert!(fx.sync.run_job(job).await.is_none());
    assert_eq!(fx.client.downloads(), 0);
    assert_eq!(fx.store.len(Collection::Block), 0);
    assert!(matches!(
        events.try_recv(),
        Ok(IndexEvent::Rejected { height: 3, .. })
    ));
}

#[tokio::test]
async fn test_height_mismatch_is_never_stored() {
    let fx = fixture(false);
    let peer = ip("8.8.4.4");
    fx.client.serve_as(peer, 10, block(9, 0));
    let mut events = fx.sync.subscribe();

    let outcome = fx.sync.run_job(tip_job(peer, 10, &block_hash(10, 0))).await;
    assert!(outcome.is_none());
    assert_eq!(fx.store.len(Collection::Block), 0);
    assert_eq!(fx.store.len(Collection::Transaction), 0);

    match events.try_recv() {
        Ok(IndexEvent::Rejected { peer: p, height, .. }) => {
            assert_eq!(p, peer);
            assert_eq!(height, 10);
        }
        other => panic!("expected a rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hash_and_type_mismatches_rejected() {
    let fx = fixture(false);
    let peer = ip("8.8.4.4");

    // peer advertises one chain but serves a competing block
    fx.client.serve(peer, block(4, 1));
    let err = fx.sync.download(peer, 4, &block_hash(4, 0)).await.unwrap_err();
    assert!(err.to_string().contains("does not match"), "{}", err);

    // a normal block where a neogenesis block belongs
    let mut wrong = block(256, 0);
    wrong.block_type = BlockType::Normal;
    fx.client.serve(peer, wrong);
    assert!(fx.sync.download(peer, 256, &block_hash(256, 0)).await.is_err());

    let mut invalid = block(7, 0);
    invalid.block_type = BlockType::Invalid;
    fx.client.serve(peer, invalid);
    assert!(fx.sync.download(peer, 7, &block_hash(7, 0)).await.is_err());

    // hash comparison ignores case
    fx.client.serve(peer, block(5, 0));
    let upper = block_hash(5, 0).to_uppercase();
    assert!(fx.sync.download(peer, 5, &upper).await.is_ok());
}

#[tokio::test]
async fn test_repeat_advertisement_is_gated() {
    let fx = fixture(false);
    let peer = ip("8.8.4.4");
    fx.client.serve(peer, block(1, 0));
    let job = tip_job(peer, 1, &block_hash(1, 0));

    assert_eq!(fx.sync.check_now(&job).await.unwrap(), CheckOutcome::Indexed);
    assert_eq!(fx.sync.check_now(&job).await.unwrap(), CheckOutcome::Gated);
    assert_eq!(fx.client.downloads(), 1);
}

#[tokio::test]
async fn test_neogenesis_diff_against_stored_prior() {
    let fx = fixture(false);
    let peer = ip("8.8.4.4");
    let (aa, bb, cc) = (
        "0000000000000000000000aa",
        "0000000000000000000000bb",
        "0000000000000000000000cc",
    );
    fx.client.serve(peer, block(0, 0));

    let epoch1 = with_ledger(block(256, 0), &[(aa, 80), (cc, 20)]);
    let epoch2 = with_ledger(block(512, 0), &[(aa, 100), (bb, 50)]);
    fx.sync.process_block(&epoch1, peer, false).await.unwrap();
    fx.sync.process_block(&epoch2, peer, false).await.unwrap();

    // 256 diffs against the downloaded genesis, 512 against the stored rich-list
    assert_eq!(fx.client.downloads(), 1);

    let delta = |key: &str| {
        fx.store
            .find_one(Collection::Ledger, &ids::ledger_id(512, &epoch2.hash, key))
            .unwrap()
            .unwrap_or_else(|| panic!("no delta for {}", key))
    };
    assert_eq!(delta(aa)["delta"].as_i64(), Some(20));
    assert_eq!(delta(aa)["balance"].as_u64(), Some(100));
    assert_eq!(delta(bb)["delta"].as_i64(), Some(50));
    assert_eq!(delta(cc)["delta"].as_i64(), Some(-20));
    assert_eq!(delta(cc)["balance"].as_u64(), Some(0));

    let prefix = format!("{}-", ids::block_id(512, &epoch2.hash));
    assert_eq!(fx.store.find(Collection::Ledger, &prefix).unwrap().len(), 3);

    let top = fx
        .store
        .find_one(Collection::Richlist, &ids::richlist_id(512, &epoch2.hash, 1))
        .unwrap()
        .unwrap();
    assert_eq!(top["key"], aa);
    assert_eq!(top["balance"].as_u64(), Some(100));
    assert_eq!(fx.store.find(Collection::Richlist, &prefix).unwrap().len(), 2);
}

#[tokio::test]
async fn test_damaged_prior_richlist_falls_back_to_download() {
    let fx = fixture(false);
    let peer = ip("8.8.4.4");
    let (aa, bb) = ("0000000000000000000000aa", "0000000000000000000000bb");
    let epoch1 = with_ledger(block(256, 0), &[(aa, 80), (bb, 20)]);
    let epoch2 = with_ledger(block(512, 0), &[(aa, 100), (bb, 20)]);
    fx.client.serve(peer, block(0, 0));
    fx.client.serve(peer, epoch1.clone());

    fx.sync.process_block(&epoch1, peer, false).await.unwrap();
    let damaged = fx
        .store
        .update(
            Collection::Richlist,
            &ids::richlist_id(256, &epoch1.hash, 2),
            &serde_json::json!({ "balance": "twenty" }),
            UpdateMode::Merge,
        )
        .unwrap();
    assert_eq!(damaged, 1);

    fx.sync.process_block(&epoch2, peer, false).await.unwrap();
    // genesis for 256, then the 256 ledger itself for 512
    assert_eq!(fx.client.downloads(), 2);

    let prefix = format!("{}-", ids::block_id(512, &epoch2.hash));
    let deltas = fx.store.find(Collection::Ledger, &prefix).unwrap();
    assert_eq!(deltas.len(), 1, "only aa changed");
    assert_eq!(deltas[0].body["delta"].as_i64(), Some(20));
}

#[tokio::test]
async fn test_integrity_sweep_repairs_gaps() {
    let fx = fixture(false);
    let peer = ip("8.8.4.4");
    let blocks = chain(4, 0);
    fx.client.serve_chain(peer, &blocks);
    fx.directory
        .apply_probe(peer, &ok_reply(4, &blocks[4].hash, &[]), 0);

    // twice the lowest set bit of 4 is 8, capped at 4: heights 4..=1
    assert_eq!(fx.sync.verify_integrity(4, &blocks[4].hash).await.unwrap(), 4);
    assert_eq!(fx.store.len(Collection::Block), 4);
    assert!(!fx
        .store
        .has(Collection::Block, &ids::block_id(0, &blocks[0].hash))
        .unwrap());

    assert_eq!(fx.sync.verify_integrity(4, &blocks[4].hash).await.unwrap(), 0);
}

#[tokio::test]
async fn test_integrity_sweep_without_peers_fails() {
    let fx = fixture(false);
    assert!(fx.sync.verify_integrity(3, &block_hash(3, 0)).await.is_err());
    assert_eq!(fx.store.len(Collection::Block), 0);
}
