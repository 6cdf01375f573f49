use std::sync::Arc;
use std::time::Duration;

use codehive_relay::agent::AgentClient;
use codehive_relay::config::AgentConfig;
use codehive_relay::watcher::FileWatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::from_env();
    let client = AgentClient::new(config.clone());

    let (watcher, mut changes) = FileWatcher::new(
        config.project_dir.clone(),
        config.dev_name.clone(),
        client.device_id().to_string(),
    );
    watcher.start().await?;

    let forwarder = Arc::clone(&client);
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            forwarder.report_file_change(change).await;
        }
    });

    let runner_handle = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.run().await })
    };

    if let Ok(code) = std::env::var("ROOM_CODE") {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let password = std::env::var("ROOM_PASSWORD").ok();
        match client
            .join_room(code.clone(), config.dev_name.clone(), password, None)
            .await
        {
            Ok(_) => println!("🔗 joined room {code}"),
            Err(err) => eprintln!("⚠️  failed to join room {code}: {err}"),
        }
    }

    tokio::signal::ctrl_c().await?;
    client.disconnect().await;
    runner_handle.abort();
    Ok(())
}
