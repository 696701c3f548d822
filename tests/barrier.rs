mod common;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{CONNECT_TIMEOUT, LOCALHOST, form_group, form_group_at, free_port};
use futures::future;
use stateless_group::GroupErr;
use store::{StoreClient, StoreServer};
use tokio::task::JoinSet;

async fn inspect(addr: &str) -> StoreClient {
    let (host, port) = addr.rsplit_once(':').unwrap();
    StoreClient::connect(host, port.parse().unwrap(), CONNECT_TIMEOUT)
        .await
        .unwrap()
}

#[tokio::test]
async fn every_member_passes() {
    for world_size in 1..=4 {
        let group = form_group(world_size).await;

        let passed = future::join_all(group.iter().map(|member| member.barrier())).await;

        assert_eq!(passed.len(), world_size);
        for ret in passed {
            ret.unwrap();
        }
        assert!(group.iter().all(|member| member.rounds() == 1));
    }
}

#[tokio::test]
async fn rounds_of_a_single_member_use_disjoint_keys() {
    let group = form_group(1).await;
    let member = &group[0];

    member.barrier().await.unwrap();
    member.barrier().await.unwrap();
    assert_eq!(member.rounds(), 2);

    let mut store = inspect(member.store_addr()).await;
    assert!(store.check("barrier/0/0").await.unwrap());
    assert!(store.check("barrier/1/0").await.unwrap());
    assert!(!store.check("barrier/2/0").await.unwrap());
}

#[tokio::test]
async fn late_member_holds_everyone_back() {
    const DELAY: Duration = Duration::from_secs(2);

    let group = form_group(3).await;
    let started = Instant::now();

    let on_time = |rank: usize| {
        let member = &group[rank];
        async move {
            member.barrier().await.unwrap();
            started.elapsed()
        }
    };

    let late = async {
        tokio::time::sleep(DELAY).await;
        group[2].barrier().await.unwrap();
        started.elapsed()
    };

    let (first, second, late) = tokio::join!(on_time(0), on_time(1), late);

    assert!(late >= DELAY);
    assert!(first >= DELAY, "rank 0 passed after {first:?}");
    assert!(second >= DELAY, "rank 1 passed after {second:?}");
}

#[tokio::test]
async fn extra_round_is_not_satisfied_by_a_lagging_member() {
    let group = form_group(2).await;
    let (eager, lagging) = (&group[0], &group[1]);

    let eager_rounds = async {
        eager.barrier().await.unwrap();
        eager.barrier_within(Duration::from_millis(500)).await
    };

    let (second_round, single_round) = tokio::join!(eager_rounds, lagging.barrier());

    single_round.unwrap();
    match second_round {
        Err(GroupErr::BarrierTimeout { round, key }) => {
            assert_eq!(round, 1);
            assert_eq!(key, "barrier/1/1");
        }
        other => panic!("expected round 1 to time out, got {other:?}"),
    }

    let mut store = inspect(eager.store_addr()).await;
    assert!(store.check("barrier/1/0").await.unwrap());
    assert!(!store.check("barrier/1/1").await.unwrap());
    assert_eq!(eager.rounds(), 2);
    assert_eq!(lagging.rounds(), 1);
}

#[tokio::test]
async fn timed_out_round_is_abandoned_for_a_fresh_one() {
    let group = form_group(2).await;

    let err = group[0]
        .barrier_within(Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, GroupErr::BarrierTimeout { round: 0, .. }));

    // Rank 1 joins round 0 while rank 0 already moved on to round 1.
    let (retry, late) = tokio::join!(
        group[0].barrier_within(Duration::from_millis(200)),
        group[1].barrier()
    );

    late.unwrap();
    assert!(matches!(retry, Err(GroupErr::BarrierTimeout { round: 1, .. })));
}

#[tokio::test]
async fn groups_on_different_stores_do_not_interact() {
    let first = form_group(2).await;
    let second = form_group(2).await;

    let (passed, alone) = tokio::join!(
        future::try_join_all(first.iter().map(|member| member.barrier())),
        second[0].barrier_within(Duration::from_millis(300)),
    );

    passed.unwrap();
    assert!(matches!(alone, Err(GroupErr::BarrierTimeout { round: 0, .. })));
    assert_eq!(second[1].rounds(), 0);
}

#[tokio::test]
async fn namespaced_groups_share_a_store() {
    let server = StoreServer::bind((LOCALHOST, 0))
        .await
        .unwrap()
        .spawn()
        .unwrap();
    let port = server.local_addr().port();

    let ours = form_group_at(port, 2, |builder| builder.host_store(false).namespace("ours")).await;
    let theirs =
        form_group_at(port, 2, |builder| builder.host_store(false).namespace("theirs")).await;

    let (passed, alone) = tokio::join!(
        future::try_join_all(ours.iter().map(|member| member.barrier())),
        theirs[0].barrier_within(Duration::from_millis(300)),
    );

    passed.unwrap();
    assert!(matches!(alone, Err(GroupErr::BarrierTimeout { .. })));
    assert_eq!(
        server.store().keys("ours/barrier/"),
        ["ours/barrier/0/0", "ours/barrier/0/1"]
    );
    assert_eq!(server.store().keys("theirs/barrier/"), ["theirs/barrier/0/0"]);
}

#[tokio::test]
async fn finished_rounds_expire_after_the_data_expiration() {
    const TTL_AND_SOME: Duration = Duration::from_millis(1500);

    let server = StoreServer::bind((LOCALHOST, 0))
        .await
        .unwrap()
        .spawn()
        .unwrap();
    let port = server.local_addr().port();

    let mut group = form_group_at(port, 1, |builder| {
        builder.host_store(false).data_expiration_seconds(1)
    })
    .await;
    let member = group.pop().unwrap();

    member.barrier().await.unwrap();
    member.barrier().await.unwrap();
    tokio::time::sleep(TTL_AND_SOME).await;

    // Round 1 passed, so round 0 is over for everyone. Round 1 may still be read.
    assert!(!server.store().check("barrier/0/0"));
    assert!(server.store().check("barrier/1/0"));

    member.close().await.unwrap();
    tokio::time::sleep(TTL_AND_SOME).await;

    assert!(!server.store().check("barrier/1/0"));
}

#[tokio::test]
async fn member_later_than_the_data_expiration_still_passes() {
    let group = common::form_group_with(2, |builder| builder.data_expiration_seconds(1)).await;

    let late = async {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        group[1].barrier_within(Duration::from_secs(3)).await
    };

    let (early, late) = tokio::join!(group[0].barrier(), late);

    early.unwrap();
    late.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_handles_pass_concurrent_barriers() {
    const CALLS: usize = 8;

    let group: Vec<_> = form_group(2).await.into_iter().map(Arc::new).collect();

    let mut calls = JoinSet::new();
    for member in &group {
        for _ in 0..CALLS {
            let member = Arc::clone(member);
            calls.spawn(async move { member.barrier_within(Duration::from_secs(10)).await });
        }
    }

    while let Some(ret) = calls.join_next().await {
        ret.unwrap().unwrap();
    }
    assert!(group.iter().all(|member| member.rounds() == CALLS as u64));
}

#[tokio::test]
async fn dropped_store_fails_pending_barriers() {
    let port = free_port();
    let mut group = form_group_at(port, 2, |builder| builder).await;
    let joiner = group.pop().unwrap();
    let host = group.pop().unwrap();

    let pending = tokio::spawn(async move { joiner.barrier().await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    drop(host);

    let err = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("barrier should fail once the store is gone")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, GroupErr::StoreUnavailable(_)), "{err}");
}
