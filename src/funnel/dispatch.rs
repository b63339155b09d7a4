//! Ordered event dispatch: one queue and one worker task per active user.
//!
//! A user's events are handled strictly in arrival order while different
//! users proceed in parallel. A worker whose queue stays empty for
//! `idle_after` retires and removes its queue; the next event for that user
//! starts a fresh worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::funnel::events::InboundEvent;
use crate::funnel::orchestrator::Funnel;

/// How long a worker waits for another event before retiring.
const DEFAULT_IDLE_AFTER: Duration = Duration::from_secs(60);

type Queues = Arc<Mutex<HashMap<String, UnboundedSender<InboundEvent>>>>;

/// Routes inbound events to per-user workers.
pub struct Dispatcher {
    funnel: Arc<Funnel>,
    queues: Queues,
    idle_after: Duration,
}

impl Dispatcher {
    pub fn new(funnel: Arc<Funnel>) -> Self {
        Self::with_idle_timeout(funnel, DEFAULT_IDLE_AFTER)
    }

    pub fn with_idle_timeout(funnel: Arc<Funnel>, idle_after: Duration) -> Self {
        Self {
            funnel,
            queues: Arc::new(Mutex::new(HashMap::new())),
            idle_after,
        }
    }

    /// Queue `event` behind any earlier events from the same user.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, event: InboundEvent) {
        let mut queues = lock(&self.queues);
        let user_id = event.user_id().to_string();

        let event = match queues.get(&user_id) {
            Some(tx) => match tx.send(event) {
                Ok(()) => return,
                // The worker died; start a new one below
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        queues.insert(user_id.clone(), tx);
        debug!(user_id = %user_id, "Starting event worker");

        tokio::spawn(run_worker(
            Arc::clone(&self.funnel),
            Arc::clone(&self.queues),
            user_id,
            event,
            rx,
            self.idle_after,
        ));
    }

    /// Number of users with a live worker.
    pub fn active_users(&self) -> usize {
        lock(&self.queues).len()
    }
}

fn lock(queues: &Queues) -> MutexGuard<'_, HashMap<String, UnboundedSender<InboundEvent>>> {
    queues.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_worker(
    funnel: Arc<Funnel>,
    queues: Queues,
    user_id: String,
    first: InboundEvent,
    mut rx: UnboundedReceiver<InboundEvent>,
    idle_after: Duration,
) {
    funnel.handle(first).await;

    loop {
        match tokio::time::timeout(idle_after, rx.recv()).await {
            Ok(Some(event)) => funnel.handle(event).await,
            Ok(None) => break,
            Err(_) => {
                if retire(&queues, &user_id, &rx) {
                    debug!(user_id = %user_id, "Event worker retired");
                    break;
                }
            }
        }
    }
}

/// Remove the user's queue if nothing is waiting in it.
///
/// `dispatch` sends under the same lock, so once the queue is gone no event
/// can be left behind in `rx`.
fn retire(queues: &Queues, user_id: &str, rx: &UnboundedReceiver<InboundEvent>) -> bool {
    let mut queues = lock(queues);
    if !rx.is_empty() {
        return false;
    }
    queues.remove(user_id);
    true
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;

    use super::*;
    use crate::channels::{EventStream, OutgoingMessage, Transport};
    use crate::error::ChannelError;
    use crate::funnel::events::{ButtonTag, EventKind};
    use crate::funnel::orchestrator::FunnelSettings;
    use crate::intake::IntakeState;
    use crate::store::{LibSqlBackend, UserIdentity};

    /// Transport that drops every message.
    struct Silent;

    #[async_trait]
    impl Transport for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        async fn start(&self) -> Result<EventStream, ChannelError> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn send(&self, _chat_id: &str, _message: OutgoingMessage) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    async fn funnel() -> Arc<Funnel> {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let settings = FunnelSettings {
            guide_path: PathBuf::from("/nonexistent/guide.pdf"),
            welcome_image_path: PathBuf::from("/nonexistent/welcome.jpg"),
            ..FunnelSettings::default()
        };
        Arc::new(Funnel::new(settings, store, Arc::new(Silent)))
    }

    fn event(user: &str, kind: EventKind) -> InboundEvent {
        InboundEvent::new(UserIdentity::new(user), user, kind)
    }

    async fn drained(dispatcher: &Dispatcher) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while dispatcher.active_users() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("workers did not retire");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn events_for_one_user_keep_arrival_order() {
        let funnel = funnel().await;
        let dispatcher = Dispatcher::with_idle_timeout(Arc::clone(&funnel), Duration::from_millis(50));

        let users: Vec<String> = (0..100).map(|i| format!("u{i}")).collect();
        for user in &users {
            dispatcher.dispatch(event(user, EventKind::ButtonPress(ButtonTag::Signup)));
        }
        for user in &users {
            dispatcher.dispatch(event(user, EventKind::FreeText("Anna".into())));
        }
        for user in &users {
            dispatcher.dispatch(event(user, EventKind::FreeText("29".into())));
        }
        drained(&dispatcher).await;

        for user in &users {
            assert_eq!(
                funnel.sessions().current(user).await,
                IntakeState::ContactEntry {
                    name: "Anna".into(),
                    age: 29
                },
                "{user}"
            );
        }
    }

    #[tokio::test]
    async fn idle_workers_retire_and_restart() {
        let funnel = funnel().await;
        let dispatcher = Dispatcher::with_idle_timeout(Arc::clone(&funnel), Duration::from_millis(20));

        dispatcher.dispatch(event("1", EventKind::ButtonPress(ButtonTag::Signup)));
        assert_eq!(dispatcher.active_users(), 1);
        drained(&dispatcher).await;
        assert_eq!(funnel.sessions().current("1").await, IntakeState::NameEntry);

        // A retired user gets a new worker and continues where they left off
        dispatcher.dispatch(event("1", EventKind::FreeText("Anna".into())));
        drained(&dispatcher).await;
        assert!(matches!(
            funnel.sessions().current("1").await,
            IntakeState::AgeEntry { .. }
        ));
    }
}
