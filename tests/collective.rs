mod common;

use std::time::Duration;

use common::{form_group, form_group_with};
use futures::future;
use serde::{Deserialize, Serialize};
use stateless_group::GroupErr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WeightsReady {
    step: u64,
    names: Vec<String>,
}

#[tokio::test]
async fn sent_objects_arrive_in_order() {
    let group = form_group(2).await;

    for step in 0..3u64 {
        group[0].send_obj(&step, 1).await.unwrap();
    }

    for step in 0..3u64 {
        let received: u64 = group[1].recv_obj(0).await.unwrap();
        assert_eq!(received, step);
    }
}

#[tokio::test]
async fn senders_to_the_same_member_do_not_collide() {
    let group = form_group(3).await;

    group[1].send_obj("from one", 0).await.unwrap();
    group[2].send_obj("from two", 0).await.unwrap();

    let from_two: String = group[0].recv_obj(2).await.unwrap();
    let from_one: String = group[0].recv_obj(1).await.unwrap();

    assert_eq!(from_one, "from one");
    assert_eq!(from_two, "from two");
}

#[tokio::test]
async fn broadcast_reaches_every_member() {
    let group = form_group(3).await;
    let sent = WeightsReady {
        step: 42,
        names: vec!["lm_head".to_string(), "embed".to_string()],
    };

    let received = future::try_join_all(group.iter().map(|member| {
        let obj = (member.rank() == 1).then(|| sent.clone());
        member.broadcast_obj(obj, 1)
    }))
    .await
    .unwrap();

    assert!(received.iter().all(|obj| *obj == sent));
}

#[tokio::test]
async fn broadcast_source_must_send_something() {
    let group = form_group(1).await;

    let err = group[0].broadcast_obj::<u32>(None, 0).await.unwrap_err();
    assert!(matches!(err, GroupErr::NothingToBroadcast { rank: 0 }));
}

#[tokio::test]
async fn all_gather_orders_by_rank() {
    let group = form_group(3).await;

    let labels: Vec<String> = (0..3).map(|rank| format!("rank-{rank}")).collect();
    let gathered = future::try_join_all(
        group
            .iter()
            .map(|member| member.all_gather_obj(&labels[member.rank()])),
    )
    .await
    .unwrap();

    for view in gathered {
        assert_eq!(view, labels);
    }
}

#[tokio::test]
async fn timed_out_receive_can_be_retried() {
    let group = form_group_with(2, |builder| builder.wait_timeout(Duration::from_millis(200))).await;

    let err = group[1].recv_obj::<u32>(0).await.unwrap_err();
    assert!(matches!(err, GroupErr::RecvTimeout { ref key } if key == "send_to/1/0/0"));

    group[0].send_obj(&7u32, 1).await.unwrap();
    assert_eq!(group[1].recv_obj::<u32>(0).await.unwrap(), 7);
}

#[tokio::test]
async fn out_of_range_ranks_are_rejected() {
    let group = form_group(2).await;

    let err = group[0].send_obj(&1, 2).await.unwrap_err();
    assert!(matches!(err, GroupErr::InvalidRank { rank: 2, world_size: 2 }));

    let err = group[0].recv_obj::<u32>(5).await.unwrap_err();
    assert!(matches!(err, GroupErr::InvalidRank { rank: 5, .. }));
}

#[tokio::test]
async fn malformed_payload_is_a_codec_error() {
    let group = form_group(2).await;

    group[0].send_obj("not a number", 1).await.unwrap();
    let err = group[1].recv_obj::<u32>(0).await.unwrap_err();

    assert!(matches!(err, GroupErr::Codec(_)));
}
