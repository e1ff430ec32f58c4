//! Bridges from the core's change sources into the action channel.
//!
//! Row edits arrive through the per-handler event buses, which call their
//! listeners synchronously; device refreshes arrive through the store's
//! watch channel and are forwarded by a background task.

use std::sync::Arc;

use qubes_config_core::{DeviceStore, Page, PagePart, RowChanged};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::action::Action;

/// Forward row changes of every list on the page. Returns the number of
/// buses subscribed to.
pub fn subscribe_rows(page: &mut Page, action_tx: &UnboundedSender<Action>) -> usize {
    let mut subscribed = 0;
    for part in page.parts_mut() {
        let bus = match part {
            PagePart::Policy(handler) => handler.event_bus(),
            PagePart::Devices(handler) => handler.event_bus(),
            PagePart::Feature(_) | PagePart::UpdateCheck(_) => continue,
        };
        let tx = action_tx.clone();
        bus.subscribe(move |event: &RowChanged| {
            let _ = tx.send(Action::RowChanged(event.clone()));
        });
        subscribed += 1;
    }
    debug!(page = %page.id(), subscribed, "row listeners attached");
    subscribed
}

/// Send a device snapshot after every store refresh until cancelled.
pub async fn device_bridge(
    store: Arc<DeviceStore>,
    action_tx: UnboundedSender<Action>,
    cancel: CancellationToken,
) {
    let mut refreshes = store.subscribe_refreshes();
    // A refresh may have landed before this task ran
    if *refreshes.borrow_and_update() > 0 {
        let _ = action_tx.send(Action::DevicesRefreshed(store.devices()));
    }

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            changed = refreshes.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *refreshes.borrow_and_update();
                debug!(refresh = count, devices = store.len(), "device store refreshed");
                if action_tx.send(Action::DevicesRefreshed(store.devices())).is_err() {
                    break;
                }
            }
        }
    }
    debug!("device bridge stopped");
}
