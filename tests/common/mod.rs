#![allow(dead_code)]

use std::time::Duration;

use futures::future;
use stateless_group::{GroupBuilder, GroupHandle};

pub const LOCALHOST: &str = "127.0.0.1";
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Returns a port nobody is listening at right now.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind((LOCALHOST, 0)).unwrap();
    listener.local_addr().unwrap().port()
}

/// Forms a group of `world_size` members on a fresh port, tweaking every builder with `configure`.
pub async fn form_group_with<F>(world_size: usize, configure: F) -> Vec<GroupHandle>
where
    F: Fn(GroupBuilder) -> GroupBuilder,
{
    let port = free_port();
    form_group_at(port, world_size, configure).await
}

pub async fn form_group_at<F>(port: u16, world_size: usize, configure: F) -> Vec<GroupHandle>
where
    F: Fn(GroupBuilder) -> GroupBuilder,
{
    let members = (0..world_size).map(|rank| {
        let builder = GroupBuilder::new(LOCALHOST, port, rank, world_size)
            .store_connect_timeout(CONNECT_TIMEOUT);
        configure(builder).create()
    });

    future::try_join_all(members).await.unwrap()
}

pub async fn form_group(world_size: usize) -> Vec<GroupHandle> {
    form_group_with(world_size, |builder| builder).await
}
