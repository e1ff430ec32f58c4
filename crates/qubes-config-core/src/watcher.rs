// ── Debounced device watcher ──
//
// Background task that turns bursts of admin device events into one
// store refresh: the first device event opens a debounce window, every
// event queued by the end of it is folded into the same batch.

use std::sync::Arc;
use std::time::Duration;

use qubes_admin::{AdminClient, AdminEvent, DevClass};
use strum::IntoEnumIterator;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::store::DeviceStore;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

pub struct DeviceWatcher {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl DeviceWatcher {
    /// Subscribe to the client's events and start the watcher task.
    ///
    /// Must be called inside a tokio runtime. Fails if the client cannot
    /// push events.
    pub fn spawn(
        client: Arc<dyn AdminClient>,
        store: Arc<DeviceStore>,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, CoreError> {
        let events = client.subscribe().ok_or_else(|| {
            CoreError::Internal("admin client does not publish device events".into())
        })?;
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = store.refresh(client.as_ref(), &all_classes()) {
                warn!(error = %e, "initial device refresh failed");
            }
            watch_task(client, store, events, debounce, task_cancel).await;
        });
        Ok(Self { handle, cancel })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "device watcher task failed");
        }
    }
}

fn all_classes() -> Vec<DevClass> {
    DevClass::iter().collect()
}

fn add_class(classes: &mut Vec<DevClass>, event: &AdminEvent) {
    if let Some(class) = event.devclass() {
        if !classes.contains(&class) {
            classes.push(class);
        }
    }
}

async fn watch_task(
    client: Arc<dyn AdminClient>,
    store: Arc<DeviceStore>,
    mut events: broadcast::Receiver<AdminEvent>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    loop {
        let mut classes = Vec::new();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => add_class(&mut classes, &event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "device events lagged, refreshing everything");
                    classes = all_classes();
                }
                Err(RecvError::Closed) => break,
            },
        }
        if classes.is_empty() {
            continue;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(debounce) => {}
        }

        let mut coalesced = 1usize;
        loop {
            match events.try_recv() {
                Ok(event) => {
                    coalesced += 1;
                    add_class(&mut classes, &event);
                }
                Err(TryRecvError::Lagged(_)) => classes = all_classes(),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }

        debug!(events = coalesced, classes = ?classes, "refreshing devices");
        if let Err(e) = store.refresh(client.as_ref(), &classes) {
            warn!(error = %e, "device refresh failed");
        }
    }
    debug!("device watcher stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use qubes_admin::{Domain, DomainClass, MemoryQubes, Port};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cancelled_watcher_exits() {
        let qubes = MemoryQubes::new();
        qubes.insert_domain(Domain::new("sys-usb", DomainClass::AppVM));
        let client: Arc<dyn AdminClient> = Arc::new(qubes);
        let store = Arc::new(DeviceStore::new());

        let watcher =
            DeviceWatcher::spawn(client, Arc::clone(&store), DEFAULT_DEBOUNCE, CancellationToken::new())
                .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.refresh_count(), 1);
        watcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn non_device_events_do_not_refresh() {
        let qubes = Arc::new(MemoryQubes::new());
        qubes.insert_domain(Domain::new("work", DomainClass::AppVM));
        let store = Arc::new(DeviceStore::new());
        let watcher = DeviceWatcher::spawn(
            Arc::clone(&qubes) as Arc<dyn AdminClient>,
            Arc::clone(&store),
            DEFAULT_DEBOUNCE,
            CancellationToken::new(),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        qubes.emit(AdminEvent::DomainStarted { name: "work".into() });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.refresh_count(), 1);

        qubes.emit(AdminEvent::DeviceRemoved {
            port: Port::new("sys-usb", "2-1", DevClass::Usb),
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.refresh_count(), 2);
        watcher.shutdown().await;
    }
}
