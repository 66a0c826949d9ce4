use std::{sync::Arc, time::Duration};

use rand::Rng;
use serde_json::json;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use volley::{
    CapacityParams, Robot, Scene,
    action::FnAction,
    error::BoxError,
    report::{StdoutReporter, report_task},
};

/// Pretend checkout backend whose latency climbs with load.
async fn checkout(batch: usize) -> Result<serde_json::Value, BoxError> {
    let base = 20 + 5 * batch as u64;
    let latency = rand::thread_rng().gen_range(base..base * 2);
    tokio::time::sleep(Duration::from_millis(latency)).await;
    if rand::thread_rng().gen_ratio(1, 500) {
        return Err("payment gateway unavailable".into());
    }
    Ok(json!({ "latencyMs": latency }))
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut buyer = Robot::builder().name("buyer").build();
    buyer
        .add_action(FnAction::new("browse").on_execute(|_, _, _| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(json!("catalog"))
        }))
        .add_action(FnAction::new("checkout").on_execute(|_, _, batch| checkout(batch)));

    let scene = Scene::builder()
        .name("storefront")
        .default_robot(buyer)
        .action_timeout(Duration::from_secs(2))
        .before(Arc::new(|s: &Scene| -> Result<(), BoxError> {
            tracing::info!("warming up {}", s.name());
            Ok(())
        }))
        .build();

    let params = CapacityParams {
        num_init: 20,
        num_step: 20,
        batch_max: 8,
        fail_perf: 1.5,
        period_action: 200,
        period_scene: 1000,
        ..Default::default()
    };

    let (tx, rx) = mpsc::channel(8);
    let reporter = tokio::spawn(async move { report_task(rx, &StdoutReporter).await });

    if let Err(err) = scene.run_capacity(params, Some(tx)).await {
        eprintln!("scene failed: {err}");
        return;
    }
    match reporter.await {
        Ok(Ok(reports)) => {
            if let Some(last) = reports.last() {
                println!("stopped after round {} with {:?}", last.batch, last.status);
            }
        }
        Ok(Err(err)) => eprintln!("reporter failed: {err}"),
        Err(err) => eprintln!("reporter task failed: {err}"),
    }
}
