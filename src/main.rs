//! CLI edubus
//!
//! `demo` поднимает внутрипроцессный хаб с имитацией сервиса таблицы
//! лидеров и печатает полученные события. `listen` подключается к
//! Pusher-совместимому сервису и логирует события на выбранных каналах.

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{Parser, Subcommand};
use edubus::{
    error::{EdubusResult, ResultExt, StackError, StatusCode},
    logging::LogFormat,
    protocol::{
        BadgeEarned, ContentProgress, LeaderboardEntry, LeaderboardUpdate, SystemNotification,
        NotificationLevel, XpGained,
    },
    BusClient, BusError, MemoryHub, Message, MessageType, Payload, SendOptions, Settings,
    TransportKind, WebSocketTransport,
};
use edubus_error::{bail, ensure};
use tracing::{info, warn};

/// Аргументы командной строки.
#[derive(Parser)]
#[command(name = "edubus")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Typed real-time event bus client", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Путь к TOML-файлу настроек
    #[arg(short, long, env = "EDUBUS_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// Подробный вывод (debug)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Формат логов: json, pretty, compact
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
    /// Печатать ошибку завершения как json-отчёт
    #[arg(long, global = true)]
    json_errors: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Демо на внутрипроцессном хабе
    Demo {
        /// Сколько событий прогресса опубликовать
        #[arg(short = 'n', long, default_value = "5")]
        events: u32,
        /// Интервал между событиями (мс)
        #[arg(short, long, default_value = "200")]
        interval: u64,
    },
    /// Слушать события сервиса по WebSocket
    Listen {
        /// Каналы (по умолчанию канал из настроек)
        #[arg(short = 'C', long = "channel")]
        channels: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_errors = cli.json_errors;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", failure_report(&err, json_errors));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> EdubusResult<()> {
    let mut settings = load_settings(cli.config.as_ref())?;
    if cli.verbose {
        settings.logging.level = "debug".into();
    }
    if let Some(format) = cli.log_format {
        settings.logging.console.format = format;
    }
    let logging = edubus::init_logging(settings.logging.clone())
        .context("initializing logging")?;

    let outcome = match cli.command {
        Commands::Demo { events, interval } => {
            run_demo(&settings, events, Duration::from_millis(interval))
                .await
                .context("running demo")
        }
        Commands::Listen { channels } => run_listen(&settings, channels)
            .await
            .context("listening"),
    };

    logging.shutdown();
    outcome
}

fn load_settings(path: Option<&PathBuf>) -> EdubusResult<Settings> {
    Settings::load_from(path).with_context(|| match path {
        Some(p) => format!("loading settings from {}", p.display()),
        None => "loading settings".to_string(),
    })
}

/// Текст ошибки завершения: строка с цепочкой контекстов или json-отчёт
/// с кодом статуса.
fn failure_report(
    err: &StackError,
    json: bool,
) -> String {
    if json {
        if let Ok(report) = serde_json::to_string(&err.report()) {
            return report;
        }
    }
    format!("edubus: {err} [{}]", err.status_code())
}

fn to_json_pretty<T: serde::Serialize>(value: &T) -> EdubusResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| BusError::codec(e.to_string()))
        .context("encoding output")
}

/// Демо: клиент и имитация сервиса на одном хабе.
async fn run_demo(
    settings: &Settings,
    events: u32,
    interval: Duration,
) -> EdubusResult<()> {
    ensure!(events > 0, StatusCode::InvalidArgs, "--events must be positive");
    let hub = MemoryHub::new();
    let config = settings.client_config();
    let channel = config.default_channel.clone();

    let service = BusClient::new(config.clone(), hub.transport());
    let responder = hub.clone();
    let _service_sub = service.subscribe_guard(
        channel.clone(),
        move |msg: &Message| {
            let Payload::RequestLeaderboard(request) = &msg.payload else {
                return Ok(());
            };
            let limit = request.limit.unwrap_or(3) as usize;
            let entries = demo_leaderboard().into_iter().take(limit).collect();
            let reply = msg.reply(Payload::LeaderboardUpdate(LeaderboardUpdate { entries }));
            if let Some(ch) = msg.channel.clone() {
                responder.publish(ch, reply);
            }
            Ok(())
        },
        Some(edubus::of_types([MessageType::RequestLeaderboard])),
    );
    service.connect().await?;

    let client = BusClient::new(config, hub.transport());
    let _events = client.subscribe_guard(
        channel.clone(),
        |msg: &Message| {
            println!("{} {}", msg.kind(), serde_json::to_string(&msg.payload)?);
            Ok(())
        },
        None,
    );
    let _connected = client.on(MessageType::Connect, |msg: &Message| {
        info!(event = %msg.kind(), "demo client online");
        Ok(())
    });
    client.connect().await?;

    let rtt = client.ping().await?;
    info!(rtt_us = rtt.as_micros() as u64, "service reachable");

    let board = client.request_leaderboard(channel.clone(), Some(3)).await?;
    for entry in &board.entries {
        println!("#{} {} ({} xp)", entry.rank, entry.display_name, entry.xp);
    }

    hub.publish(
        channel.clone(),
        Message::new(SystemNotification {
            title: "Lesson started".into(),
            message: "Rust ownership, part 2".into(),
            level: NotificationLevel::Info,
        }),
    );
    for step in 1..=events {
        tokio::time::sleep(interval).await;
        let progress = (step * 100 / events).min(100) as u8;
        hub.publish(
            channel.clone(),
            Message::new(ContentProgress {
                content_id: "lesson-42".into(),
                stage: "generating".into(),
                progress,
                message: None,
            }),
        );
    }
    hub.publish(
        channel.clone(),
        Message::new(XpGained {
            user_id: "u-1".into(),
            amount: 50,
            total_xp: 1250,
            source: Some("lesson-42".into()),
        }),
    );
    hub.publish(
        channel,
        Message::new(BadgeEarned {
            user_id: "u-1".into(),
            badge_id: "finisher".into(),
            badge_name: "Lesson finisher".into(),
        }),
    );

    client
        .send(
            Payload::SystemNotification(SystemNotification {
                title: "Demo finished".into(),
                message: "bye".into(),
                level: NotificationLevel::Success,
            }),
            SendOptions::default(),
        )
        .await?;
    tokio::time::sleep(interval).await;

    println!("{}", to_json_pretty(&client.stats())?);
    client.shutdown().await;
    service.shutdown().await;
    Ok(())
}

/// Подключается к сервису и логирует события до Ctrl-C.
async fn run_listen(
    settings: &Settings,
    channels: Vec<String>,
) -> EdubusResult<()> {
    if settings.transport.kind != TransportKind::Websocket {
        bail!(
            StatusCode::ConfigInvalid,
            "listen requires transport.kind = \"websocket\" in settings"
        );
    }
    let transport = WebSocketTransport::new(&settings.websocket_config())
        .context("building websocket transport")?;
    let client = BusClient::new(settings.client_config(), transport);

    let channels = if channels.is_empty() {
        vec![client.config().default_channel.to_string()]
    } else {
        channels
    };
    let _subs: Vec<_> = channels
        .iter()
        .map(|ch| {
            client.subscribe_guard(
                ch.as_str(),
                |msg: &Message| {
                    let payload = serde_json::to_string(&msg.payload)?;
                    info!(
                        kind = %msg.kind(),
                        channel = msg.channel().map(|c| c.as_str()).unwrap_or("-"),
                        payload = %payload,
                        "event"
                    );
                    Ok(())
                },
                None,
            )
        })
        .collect();

    if let Err(err) = client.connect().await {
        warn!(error = %err, "initial connect failed, retrying in background");
    }

    let mut states = client.state_changes();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!(%state, "connection state");
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn demo_leaderboard() -> Vec<LeaderboardEntry> {
    [("u-7", "Ada", 4200), ("u-3", "Linus", 3900), ("u-1", "Grace", 1250), ("u-9", "Ken", 800)]
        .into_iter()
        .enumerate()
        .map(|(i, (id, name, xp))| LeaderboardEntry {
            user_id: id.into(),
            display_name: name.into(),
            xp,
            rank: i as u32 + 1,
        })
        .collect()
}
