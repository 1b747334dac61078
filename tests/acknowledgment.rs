use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use edubus::{
    of_types,
    protocol::{LeaderboardEntry, LeaderboardUpdate, SystemNotification, UserMessage},
    BusClient, BusError, ClientConfig, Delivery, MemoryHub, Message, MessageType, Payload,
    SendOptions,
};
use parking_lot::Mutex;

fn question(text: &str) -> UserMessage {
    UserMessage {
        from_user_id: "student-1".into(),
        to_user_id: Some("tutor".into()),
        text: text.into(),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn connected(hub: &MemoryHub) -> BusClient {
    let client = BusClient::new(ClientConfig::default(), hub.transport());
    client.connect().await.unwrap();
    client
}

/// Сервис, который запоминает входящие запросы и может ответить на них
/// серверной публикацией.
struct Service {
    hub: MemoryHub,
    client: BusClient,
    requests: Arc<Mutex<Vec<Message>>>,
}

impl Service {
    async fn start(
        hub: &MemoryHub,
        auto_reply: bool,
    ) -> Self {
        let client = connected(hub).await;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        let responder = hub.clone();
        client.subscribe(
            "public",
            move |msg: &Message| {
                seen.lock().push(msg.clone());
                if auto_reply {
                    let reply = msg.reply(Payload::SystemNotification(SystemNotification {
                        title: "received".into(),
                        message: "answer is on the way".into(),
                        level: Default::default(),
                    }));
                    responder.publish("public", reply);
                }
                Ok(())
            },
            Some(of_types([MessageType::UserMessage])),
        );
        Self {
            hub: hub.clone(),
            client,
            requests,
        }
    }

    fn last_request(&self) -> Message {
        self.requests.lock().last().cloned().unwrap()
    }
}

/// Тест проверяет round-trip: подтверждение с тем же correlation id
/// разрешает отправку и всё равно доставляется подписчикам.
#[tokio::test(start_paused = true)]
async fn test_ack_round_trip() {
    let hub = MemoryHub::new();
    let _service = Service::start(&hub, true).await;
    let client = connected(&hub).await;

    let notifications = Arc::new(AtomicUsize::new(0));
    let n = notifications.clone();
    let _guard = client.on(MessageType::SystemNotification, move |_: &Message| {
        n.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let delivery = client
        .send(question("what is a borrow?"), SendOptions::acknowledged())
        .await
        .unwrap();
    let Delivery::Acknowledged(ack) = delivery else {
        panic!("expected acknowledgment");
    };
    assert_eq!(ack.kind(), MessageType::SystemNotification);
    assert!(ack.correlation_id.is_some());
    settle().await;

    assert_eq!(notifications.load(Ordering::SeqCst), 1);
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.stats().acks_received, 1);
}

/// Тест проверяет таймаут подтверждения: 50 мс, ошибка Timeout, запись
/// снята.
#[tokio::test(start_paused = true)]
async fn test_ack_timeout() {
    let hub = MemoryHub::new();
    let service = Service::start(&hub, false).await;
    let client = connected(&hub).await;

    let started = tokio::time::Instant::now();
    let result = client
        .send(
            question("anyone?"),
            SendOptions::acknowledged().with_timeout(Duration::from_millis(50)),
        )
        .await;

    let correlation_id = service.last_request().correlation_id.unwrap();
    assert_eq!(
        result,
        Err(BusError::Timeout {
            correlation_id,
            after_ms: 50
        })
    );
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.stats().ack_timeouts, 1);
}

/// Тест проверяет, что позднее подтверждение ничего не разрешает, но
/// доходит до подписчиков и учитывается в статистике.
#[tokio::test(start_paused = true)]
async fn test_late_ack_is_ignored() {
    let hub = MemoryHub::new();
    let service = Service::start(&hub, false).await;
    let client = connected(&hub).await;

    let seen = Arc::new(AtomicUsize::new(0));
    let s = seen.clone();
    client.subscribe(
        "public",
        move |_: &Message| {
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        None,
    );

    let result = client
        .send(
            question("late?"),
            SendOptions::acknowledged().with_timeout(Duration::from_millis(50)),
        )
        .await;
    assert!(result.unwrap_err().is_timeout());

    let late = service.last_request().reply(Payload::SystemNotification(SystemNotification {
        title: "sorry".into(),
        message: "too late".into(),
        level: Default::default(),
    }));
    service.hub.publish("public", late);
    settle().await;

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    let stats = client.stats();
    assert_eq!(stats.late_acks, 1);
    assert_eq!(stats.acks_received, 0);
}

/// Тест проверяет, что disconnect сразу отклоняет ожидающие запросы.
#[tokio::test(start_paused = true)]
async fn test_disconnect_rejects_pending_immediately() {
    let hub = MemoryHub::new();
    let _service = Service::start(&hub, false).await;
    let client = connected(&hub).await;

    let waiter = client.clone();
    let started = tokio::time::Instant::now();
    let pending = tokio::spawn(async move {
        waiter
            .send(question("still there?"), SendOptions::acknowledged())
            .await
    });
    settle().await;
    assert_eq!(client.pending_count(), 1);

    client.disconnect("logout").await;
    let result = pending.await.unwrap();

    assert_eq!(
        result,
        Err(BusError::Disconnected {
            reason: "logout".into()
        })
    );
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(client.pending_count(), 0);
}

/// Тест проверяет отмену ожидания по correlation id.
#[tokio::test(start_paused = true)]
async fn test_cancel_pending_request() {
    let hub = MemoryHub::new();
    let service = Service::start(&hub, false).await;
    let client = connected(&hub).await;

    let waiter = client.clone();
    let pending = tokio::spawn(async move {
        waiter
            .send(question("never mind"), SendOptions::acknowledged())
            .await
    });
    settle().await;

    let correlation_id = service.last_request().correlation_id.unwrap();
    assert!(client.cancel(&correlation_id));
    assert!(!client.cancel(&correlation_id));
    assert_eq!(pending.await.unwrap(), Err(BusError::Cancelled));
}

/// Тест проверяет, что брошенное ожидание снимает запись.
#[tokio::test(start_paused = true)]
async fn test_dropped_future_removes_pending() {
    let hub = MemoryHub::new();
    let _service = Service::start(&hub, false).await;
    let client = connected(&hub).await;

    let waiter = client.clone();
    let pending = tokio::spawn(async move {
        waiter
            .send(question("bye"), SendOptions::acknowledged())
            .await
    });
    settle().await;
    assert_eq!(client.pending_count(), 1);

    pending.abort();
    let _ = pending.await;
    assert_eq!(client.pending_count(), 0);
}

/// Тест проверяет ping: другой клиент автоматически отвечает PONG, задержка
/// попадает в статистику.
#[tokio::test(start_paused = true)]
async fn test_ping_measures_latency() {
    let hub = MemoryHub::new();
    let _peer = connected(&hub).await;
    let client = connected(&hub).await;

    let rtt = client.ping().await.unwrap();
    assert!(rtt < Duration::from_secs(1));

    let stats = client.stats();
    assert_eq!(stats.latency_samples, 1);
    assert!(stats.last_latency_ms.is_some());
}

/// Тест проверяет ping без собеседника: таймаут подтверждения.
#[tokio::test(start_paused = true)]
async fn test_ping_without_peer_times_out() {
    let hub = MemoryHub::new();
    let client = BusClient::new(
        ClientConfig::default().with_ack_timeout(Duration::from_millis(100)),
        hub.transport(),
    );
    client.connect().await.unwrap();

    assert!(client.ping().await.unwrap_err().is_timeout());
    assert_eq!(client.stats().latency_samples, 0);
}

/// Тест проверяет запрос таблицы лидеров и отказ при чужом типе ответа.
#[tokio::test(start_paused = true)]
async fn test_request_leaderboard() {
    let hub = MemoryHub::new();
    let service = connected(&hub).await;
    let responder = hub.clone();
    service.subscribe(
        "public",
        move |msg: &Message| {
            let Payload::RequestLeaderboard(request) = &msg.payload else {
                return Ok(());
            };
            let reply = if request.limit == Some(0) {
                msg.reply(Payload::UserMessage(question("wrong type")))
            } else {
                msg.reply(Payload::LeaderboardUpdate(LeaderboardUpdate {
                    entries: vec![LeaderboardEntry {
                        user_id: "u-7".into(),
                        display_name: "Ada".into(),
                        xp: 4200,
                        rank: 1,
                    }],
                }))
            };
            responder.publish("public", reply);
            Ok(())
        },
        None,
    );
    let client = connected(&hub).await;

    let board = client.request_leaderboard("public", Some(10)).await.unwrap();
    assert_eq!(board.entry_for("u-7").map(|e| e.rank), Some(1));

    let err = client.request_leaderboard("public", Some(0)).await.unwrap_err();
    assert_eq!(
        err,
        BusError::UnexpectedAck {
            expected: "LEADERBOARD_UPDATE".into(),
            actual: "USER_MESSAGE".into()
        }
    );
}

/// Тест проверяет отправку с ожиданием без соединения.
#[tokio::test]
async fn test_ack_send_while_disconnected() {
    let hub = MemoryHub::new();
    let client = BusClient::new(ClientConfig::default(), hub.transport());

    let result = client
        .send(question("hello?"), SendOptions::acknowledged())
        .await;
    assert_eq!(result, Err(BusError::NotConnected));
    assert_eq!(client.pending_count(), 0);
}
