//! End-to-end funnel scenarios over an in-memory store and a recording
//! transport. No network access.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use lead_funnel::channels::{EventStream, OutgoingMessage, Transport};
use lead_funnel::error::ChannelError;
use lead_funnel::funnel::templates;
use lead_funnel::funnel::{
    ButtonTag, Command, Dispatcher, EventKind, Funnel, FunnelSettings, InboundEvent, MenuChoice,
};
use lead_funnel::intake::IntakeState;
use lead_funnel::reporting::{self, ExportOutcome};
use lead_funnel::store::{LibSqlBackend, ProblemCategory, RecordStore, UserIdentity};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const OPERATOR: &str = "900";

/// Transport that keeps every outbound message.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, OutgoingMessage)>>,
}

impl RecordingTransport {
    fn texts_to(&self, chat: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == chat)
            .filter_map(|(_, m)| match m {
                OutgoingMessage::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn last_text_to(&self, chat: &str) -> String {
        self.texts_to(chat).pop().unwrap_or_default()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn send(&self, chat_id: &str, message: OutgoingMessage) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_string(), message));
        Ok(())
    }
}

async fn setup() -> (Arc<Funnel>, Arc<LibSqlBackend>, Arc<RecordingTransport>) {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let transport = Arc::new(RecordingTransport::default());
    let settings = FunnelSettings {
        operator_id: Some(OPERATOR.to_string()),
        guide_path: PathBuf::from("/nonexistent/guide.pdf"),
        welcome_image_path: PathBuf::from("/nonexistent/welcome.jpg"),
        ..FunnelSettings::default()
    };
    let funnel = Arc::new(Funnel::new(settings, store.clone(), transport.clone()));
    (funnel, store, transport)
}

fn user(id: &str) -> UserIdentity {
    UserIdentity::new(id)
        .with_display_name("Anna T")
        .with_handle("anna_tg")
}

fn text(id: &str, s: &str) -> InboundEvent {
    InboundEvent::new(user(id), id, EventKind::from_text(s))
}

fn button(id: &str, tag: ButtonTag) -> InboundEvent {
    InboundEvent::new(user(id), id, EventKind::ButtonPress(tag))
}

#[tokio::test]
async fn custom_problem_signup_completes_record() {
    timeout(TEST_TIMEOUT, async {
        let (funnel, store, transport) = setup().await;

        funnel.handle(text("U1", "/start")).await;
        let record = store.get_record("U1").await.unwrap().unwrap();
        assert_eq!(record.display_name.as_deref(), Some("Anna T"));
        assert_eq!(record.problem_category, None);
        assert_eq!(record.contact_name, None);
        assert!(!record.is_complete());

        funnel.handle(button("U1", ButtonTag::CustomProblem)).await;
        assert_eq!(
            funnel.sessions().current("U1").await,
            IntakeState::CustomProblemEntry
        );

        funnel
            .handle(text("U1", "Feeling exhausted all the time and losing interest"))
            .await;
        let record = store.get_record("U1").await.unwrap().unwrap();
        assert_eq!(record.problem_category, Some(ProblemCategory::Custom));
        assert_eq!(
            record.custom_problem_text.as_deref(),
            Some("Feeling exhausted all the time and losing interest")
        );

        funnel.handle(button("U1", ButtonTag::Signup)).await;
        funnel.handle(text("U1", "Anna")).await;
        funnel.handle(text("U1", "29")).await;
        funnel.handle(text("U1", "@anna_t")).await;

        let record = store.get_record("U1").await.unwrap().unwrap();
        assert!(record.is_complete());
        assert_eq!(record.contact_name.as_deref(), Some("Anna"));
        assert_eq!(record.age, Some(29));
        assert_eq!(record.contact_handle.as_deref(), Some("anna_t"));
        assert_eq!(funnel.sessions().current("U1").await, IntakeState::Idle);

        let stats = store.aggregate_stats(5).await.unwrap();
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.complete_records, 1);

        let notification = transport.last_text_to(OPERATOR);
        assert!(notification.contains("Anna"));
        assert!(notification.contains("@anna_t"));
        assert!(notification.contains("Own problem: Feeling exhausted"));
        assert!(notification.contains("U1"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn invalid_answers_reprompt_without_advancing() {
    timeout(TEST_TIMEOUT, async {
        let (funnel, store, transport) = setup().await;

        funnel.handle(button("U2", ButtonTag::Signup)).await;
        funnel.handle(text("U2", "A")).await;
        assert_eq!(funnel.sessions().current("U2").await, IntakeState::NameEntry);

        funnel.handle(text("U2", "Boris")).await;
        funnel.handle(text("U2", "twenty")).await;
        funnel.handle(text("U2", "150")).await;
        assert_eq!(
            funnel.sessions().current("U2").await,
            IntakeState::AgeEntry {
                name: "Boris".into()
            }
        );

        funnel.handle(text("U2", "40")).await;
        funnel.handle(text("U2", "@b")).await;
        assert!(matches!(
            funnel.sessions().current("U2").await,
            IntakeState::ContactEntry { age: 40, .. }
        ));

        let record = store.get_record("U2").await.unwrap().unwrap();
        assert_eq!(record.contact_name, None);
        assert!(transport.texts_to(OPERATOR).is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn fixed_category_from_problem_menu() {
    let (funnel, store, transport) = setup().await;

    funnel
        .handle(InboundEvent::new(
            user("U3"),
            "U3",
            EventKind::MenuChoice(MenuChoice::BookConsultation),
        ))
        .await;
    assert_eq!(funnel.sessions().current("U3").await, IntakeState::ProblemMenu);

    funnel
        .handle(button("U3", ButtonTag::Category(ProblemCategory::Anxiety)))
        .await;

    let record = store.get_record("U3").await.unwrap().unwrap();
    assert_eq!(record.problem_category, Some(ProblemCategory::Anxiety));
    assert_eq!(record.custom_problem_text, None);
    assert_eq!(funnel.sessions().current("U3").await, IntakeState::Idle);
    assert!(
        transport
            .texts_to("U3")
            .iter()
            .any(|t| t == templates::category_response(ProblemCategory::Anxiety))
    );
}

#[tokio::test]
async fn admin_commands_are_gated() {
    let (funnel, store, transport) = setup().await;

    funnel.handle(text("U4", "/stats")).await;
    funnel.handle(text("U4", "/export")).await;
    let replies = transport.texts_to("U4");
    assert_eq!(replies.len(), 2);
    assert!(replies.iter().all(|t| t == templates::permission_denied()));

    // Admin commands never create a record
    assert!(!store.exists("U4").await.unwrap());
    assert_eq!(
        EventKind::from_text("/export"),
        EventKind::Command(Command::Export)
    );
}

#[tokio::test]
async fn operator_export_on_empty_store() {
    let (funnel, store, transport) = setup().await;

    let outcome = reporting::export_leads(store.as_ref(), &std::env::temp_dir(), chrono::Utc::now())
        .await
        .unwrap();
    assert!(matches!(outcome, ExportOutcome::Empty));

    funnel.handle(text(OPERATOR, "/export")).await;
    assert_eq!(transport.last_text_to(OPERATOR), templates::export_empty());
    assert!(
        !transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .any(|(_, m)| matches!(m, OutgoingMessage::Document { .. }))
    );
}

#[tokio::test]
async fn concurrent_users_do_not_share_state() {
    timeout(TEST_TIMEOUT, async {
        let (funnel, store, _transport) = setup().await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let funnel = Arc::clone(&funnel);
            handles.push(tokio::spawn(async move {
                let id = format!("C{i}");
                funnel.handle(button(&id, ButtonTag::Signup)).await;
                funnel.handle(text(&id, &format!("Name{i}"))).await;
                funnel.handle(text(&id, "30")).await;
                funnel.handle(text(&id, &format!("handle_{i}"))).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = store.aggregate_stats(10).await.unwrap();
        assert_eq!(stats.total_users, 8);
        assert_eq!(stats.complete_records, 8);
        let record = store.get_record("C3").await.unwrap().unwrap();
        assert_eq!(record.contact_name.as_deref(), Some("Name3"));
        assert_eq!(record.contact_handle.as_deref(), Some("handle_3"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispatcher_keeps_each_users_answers_in_order() {
    let (funnel, store, _transport) = setup().await;
    let dispatcher = Dispatcher::with_idle_timeout(Arc::clone(&funnel), Duration::from_millis(50));

    let users: Vec<String> = (0..200).map(|i| format!("u{i}")).collect();
    for id in &users {
        dispatcher.dispatch(button(id, ButtonTag::Signup));
    }
    for id in &users {
        dispatcher.dispatch(text(id, "Anna"));
    }
    for id in &users {
        dispatcher.dispatch(text(id, "29"));
    }
    for id in &users {
        dispatcher.dispatch(text(id, "@anna_t"));
    }

    timeout(Duration::from_secs(20), async {
        while dispatcher.active_users() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dispatch did not drain");

    for id in &users {
        let record = store.get_record(id).await.unwrap().unwrap();
        assert_eq!(record.contact_name.as_deref(), Some("Anna"), "{id}");
        assert_eq!(record.age, Some(29), "{id}");
        assert_eq!(record.contact_handle.as_deref(), Some("anna_t"), "{id}");
    }
    assert_eq!(store.aggregate_stats(5).await.unwrap().complete_records, 200);
    // Every conversation is back in Idle, so no slots are left behind
    assert!(funnel.sessions().is_empty().await);
}
