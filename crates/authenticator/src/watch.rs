//! Background watch on the destination Secret, feeding the supervisor's notification channel.
use std::pin::pin;

use futures::StreamExt as _;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Api, Client,
    runtime::{
        WatchStreamExt as _,
        watcher::{self, Event, watcher},
    },
};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::settings::NamespacedName;

/// Watches a single Secret and sends `true` whenever it changed.
///
/// Notifications carry no data, the receiver is expected to read the current state. The
/// channel holds one pending notification, further changes are coalesced into it.
pub struct ChangeNotifier {
    api: Api<Secret>,
    secret: NamespacedName,
}

impl ChangeNotifier {
    pub fn new(client: Client, secret: NamespacedName) -> Self {
        Self {
            api: Api::namespaced(client, &secret.namespace),
            secret,
        }
    }

    /// Spawns the watch task. The returned channel closes when the task ends.
    pub fn spawn(self) -> mpsc::Receiver<bool> {
        let (notifications_tx, notifications_rx) = mpsc::channel(1);
        tokio::spawn(self.run(notifications_tx));
        notifications_rx
    }

    #[tracing::instrument(skip_all, fields(k8s.secret.name = %self.secret))]
    async fn run(self, notifications: mpsc::Sender<bool>) {
        let config = watcher::Config::default().fields(&format!("metadata.name={}", self.secret.name));
        let mut events = pin!(watcher(self.api, config).default_backoff());

        tracing::info!("watching Secret for changes");

        while let Some(event) = events.next().await {
            match event {
                Ok(event) if is_change(&event) => {
                    if !notify(&notifications) {
                        tracing::debug!("notification channel closed, stopping watch");
                        return;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        "failed to watch Secret"
                    );
                }
            }
        }
    }
}

/// Whether a watch event may carry a change.
///
/// Objects replayed during a (re)list are only reported once the list is done, so changes
/// missed while the watch was disconnected are still noticed.
fn is_change(event: &Event<Secret>) -> bool {
    match event {
        Event::Apply(_) | Event::Delete(_) | Event::InitDone => true,
        Event::Init | Event::InitApply(_) => false,
    }
}

/// Queues a notification unless one is already pending. Returns `false` if the receiver is
/// gone.
fn notify(notifications: &mpsc::Sender<bool>) -> bool {
    match notifications.try_send(true) {
        Ok(()) | Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Closed(_)) => false,
    }
}
