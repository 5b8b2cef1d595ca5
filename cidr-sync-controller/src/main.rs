use std::{process::exit, sync::Arc};

use anyhow::Context;
use cidr_sync_core::config::ControllerConfig;
use kube::Client;
use log::info;

use crate::{
    controller::{
        run_controllers,
        shutdown::{self, trigger_on_signal, wait_for_signal},
    },
    events::KubeEventRecorder,
    reconciler::context::ControllerContext,
    store::KubeStore,
};

mod cache;
mod controller;
mod events;
mod helpers;
mod pool;
mod queue;
mod reconciler;
mod store;
#[cfg(test)]
mod testing;

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    configure_logger();

    let config = get_config();
    let client = create_client().await;

    info!(
        "Starting CIDR sync (pool version {}, {} workers per controller)...",
        config.pool_version, config.workers
    );

    let context = ControllerContext {
        config,
        store: KubeStore::new(client.clone()),
        recorder: Arc::new(KubeEventRecorder::new(client.clone())),
        client,
    };

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(trigger_on_signal(wait_for_signal(), trigger));

    run_controllers(&context, shutdown)
        .await
        .context("Controllers have failed")?;

    info!("CIDR sync stopped");

    Ok(())
}

async fn create_client() -> Client {
    match Client::try_default().await {
        Ok(client) => client,
        Err(error) => {
            log::error!("Couldn't create client! {error:?}");
            exit(6)
        }
    }
}

fn get_config() -> ControllerConfig {
    match ControllerConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            log::error!("Couldn't load controller configuration! {error}");
            exit(7)
        }
    }
}

fn configure_logger() {
    env_logger::builder()
        .default_format()
        .format_module_path(false)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init()
}
