use std::{env, fs};

use anyhow::Context;
use log::info;
use stateless_group::{GroupBuilder, GroupConfig, GroupHandle};
use tokio::signal;

const DEFAULT_ROUNDS: u64 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::var("GROUP_CONFIG") {
        Ok(path) => {
            let json = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            GroupConfig::from_json(&json)?
        }
        Err(_) => GroupConfig::from_env()?,
    };

    let rounds = match env::var("ROUNDS") {
        Ok(rounds) => rounds.parse().context("ROUNDS must be a number")?,
        Err(_) => DEFAULT_ROUNDS,
    };

    let group = GroupBuilder::from_config(&config).create().await?;

    tokio::select! {
        ret = run(&group, rounds) => {
            ret?;
            info!("wrapping up, leaving group...");
        }
        _ = signal::ctrl_c() => {
            info!("received SIGINT");
            return Ok(());
        }
    }

    group.close().await?;
    Ok(())
}

/// Passes `rounds` barriers, shares every member's pid and makes sure nobody is
/// still talking to the store before rank 0 stops serving it.
async fn run(group: &GroupHandle, rounds: u64) -> stateless_group::Result<()> {
    for round in 0..rounds {
        group.barrier().await?;
        info!(round = round; "barrier passed");
    }

    let pids = group.all_gather_obj(&std::process::id()).await?;
    info!("member pids: {pids:?}");

    if group.rank() == 0 {
        for src in 1..group.world_size() {
            let _: String = group.recv_obj(src).await?;
        }
    } else {
        group.send_obj("done", 0).await?;
    }

    Ok(())
}
