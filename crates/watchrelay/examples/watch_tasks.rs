//! Produce tasks on one side, watch them on the other.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use watchrelay::{Meta, VersionedResource, WatchRelay};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Task {
    #[serde(flatten)]
    meta: Meta,
    uuid: String,
}

impl VersionedResource for Task {
    fn resource_version(&self) -> u64 {
        self.meta.resource_version
    }
    fn set_resource_version(&mut self, version: u64) {
        self.meta.resource_version = version;
    }
    fn resource_key(&self) -> String {
        self.uuid.clone()
    }
}

#[tokio::main]
async fn main() -> watchrelay::Result<()> {
    let dir = tempfile::tempdir()?;
    let conn = rusqlite::Connection::open(dir.path().join("tasks.db"))
        .map_err(|e| watchrelay::WatchRelayError::Database(e.to_string()))?;

    let relay = std::sync::Arc::new(WatchRelay::new(conn)?);
    relay.register_resource::<Task>()?;
    relay.start().await?;

    let producer = {
        let relay = std::sync::Arc::clone(&relay);
        tokio::task::spawn_blocking(move || {
            for i in 0..10 {
                let mut tasks = vec![Task {
                    meta: Meta::default(),
                    uuid: format!("task-{i}"),
                }];
                relay.create(None, None, &mut tasks)?;
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
            watchrelay::Result::Ok(())
        })
    };

    let mut watch = relay.watch::<Task>(CancellationToken::new(), None, 0).await?;
    let mut received = 0;
    while received < 10 {
        let Some(batch) = watch.events.recv().await else {
            break;
        };
        for event in batch {
            received += 1;
            println!(
                "rev {} {:?} {}",
                event.revision,
                event.action,
                event.value.map(|t| t.uuid).unwrap_or_default()
            );
        }
    }

    producer
        .await
        .map_err(|e| watchrelay::WatchRelayError::InvalidState(e.to_string()))??;
    relay.close();
    Ok(())
}
