//! FarmHub CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示同步层：
//! 启动时通过命令行参数指定用户和 token，激活所有控制器，打印收到的事件。

use anyhow::Result;
use clap::Parser;
use farmhub_sdk_core_rust::sdk::alert::AlertListener;
use farmhub_sdk_core_rust::sdk::chat::ChatListener;
use farmhub_sdk_core_rust::sdk::farm::FarmListener;
use farmhub_sdk_core_rust::{ClientConfig, FarmClient, SyncState, WeatherLocation};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// FarmHub CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "farmhub-cli")]
#[command(about = "FarmHub CLI 客户端 - 用于测试和展示数据同步", long_about = None)]
struct Args {
    /// 用户 ID
    #[arg(short, long)]
    user: String,

    /// 认证 token
    #[arg(short, long, default_value = "")]
    token: String,

    /// HTTP API 基础地址
    #[arg(long, default_value = "http://localhost:10002")]
    api_url: String,

    /// WebSocket 地址
    #[arg(long, default_value = "ws://localhost:10001")]
    ws_url: String,

    /// 本地缓存数据库
    #[arg(long, default_value = "sqlite://farmhub.db?mode=rwc")]
    db_url: String,

    /// 补全服务 API key（也可通过 OPENAI_API_KEY 设置）
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_key: Option<String>,

    /// 天气 API key（也可通过 OPENWEATHER_API_KEY 设置）
    #[arg(long, env = "OPENWEATHER_API_KEY", default_value = "")]
    weather_key: String,

    /// 预报地点纬度
    #[arg(long, default_value_t = 36.7378, allow_hyphen_values = true)]
    lat: f64,

    /// 预报地点经度
    #[arg(long, default_value_t = -119.7871, allow_hyphen_values = true)]
    lon: f64,

    /// 启动后向助手提一个问题
    #[arg(long)]
    ask: Option<String>,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,farmhub_sdk_core_rust=debug）
    #[arg(long, default_value = "info,farmhub_sdk_core_rust=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 文件不需要颜色
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

/// 设置监听器（输出所有接收到的事件）
fn setup_listeners(client: &mut FarmClient) {
    struct CliFarmListener;
    #[async_trait::async_trait]
    impl FarmListener for CliFarmListener {
        async fn on_farm_list_changed(&self, farms_json: String) {
            info!("[CLI/Farm] 🌾 农场列表变更: {}", farms_json);
        }

        async fn on_selected_farm_changed(&self, farm_id: Option<String>) {
            info!("[CLI/Farm] 📍 当前农场: {:?}", farm_id);
        }

        async fn on_sync_state_changed(&self, state: SyncState) {
            log_state("Farm", state);
        }

        async fn on_mutation_failed(&self, failure_json: String) {
            error!("[CLI/Farm] ❌ 变更失败: {}", failure_json);
        }
    }
    client.set_farm_listener(Arc::new(CliFarmListener));

    struct CliAlertListener;
    #[async_trait::async_trait]
    impl AlertListener for CliAlertListener {
        async fn on_alert_list_changed(&self, alerts_json: String) {
            info!("[CLI/Alert] 🔔 告警列表变更: {}", alerts_json);
        }

        async fn on_unread_count_changed(&self, count: usize) {
            info!("[CLI/Alert] 📬 未读告警: {}", count);
        }

        async fn on_sync_state_changed(&self, state: SyncState) {
            log_state("Alert", state);
        }

        async fn on_mutation_failed(&self, failure_json: String) {
            error!("[CLI/Alert] ❌ 变更失败: {}", failure_json);
        }
    }
    client.set_alert_listener(Arc::new(CliAlertListener));

    struct CliChatListener;
    #[async_trait::async_trait]
    impl ChatListener for CliChatListener {
        async fn on_message_list_changed(&self, messages_json: String) {
            info!("[CLI/Chat] 💬 消息列表变更: {}", messages_json);
        }

        async fn on_sending_changed(&self, sending: bool) {
            info!("[CLI/Chat] ⏳ 发送中: {}", sending);
        }
    }
    client.set_chat_listener(Arc::new(CliChatListener));
}

fn log_state(family: &str, state: SyncState) {
    match state {
        SyncState::Degraded => warn!("[CLI/{}] ⚠️ 同步降级，正在使用本地缓存", family),
        _ => info!("[CLI/{}] 🔄 同步状态: {}", family, state),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(&args.log_level);

    info!("[CLI] 🚀 FarmHub CLI 客户端（测试模式）");
    info!("[CLI] 👤 用户: {}", args.user);
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    let mut config = ClientConfig::new(args.token.clone());
    config.api_base_url = args.api_url.clone();
    config.ws_url = args.ws_url.clone();
    config.db_url = args.db_url.clone();
    config.completion.api_key = args.openai_key.clone();
    config.weather.api_key = args.weather_key.clone();
    config.weather.location = WeatherLocation {
        name: format!("{:.2},{:.2}", args.lat, args.lon),
        latitude: args.lat,
        longitude: args.lon,
    };

    let mut client = FarmClient::new(config);
    setup_listeners(&mut client);

    info!("[CLI] 🔗 正在连接...");
    client
        .connect()
        .await
        .map_err(|e| anyhow::anyhow!("连接失败: {}", e))?;

    if let Err(e) = client.set_current_user(Some(&args.user)).await {
        error!("[CLI] ❌ 激活控制器失败: {}", e);
    }

    // 显示初始信息
    if let Some(farms) = client.farms() {
        let list = farms.farms().await;
        info!(
            "[CLI] 🌾 农场列表（共 {} 个，{:.1} 英亩）:",
            list.len(),
            farms.total_acreage().await
        );
        for farm in list.iter().take(5) {
            info!(
                "[CLI]   - {} | {} | {:?} | 作物: {}",
                farm.name,
                farm.location,
                farm.status,
                farm.crops.join(",")
            );
        }
    }

    if let Some(alerts) = client.alerts() {
        info!("[CLI] 📬 未读告警: {}", alerts.unread_count().await);
    }

    if let Some(weather) = client.weather() {
        match weather.get_forecast(true).await {
            Some(snapshot) => {
                info!(
                    "[CLI] 🌤️ {}: {:.1}℃ {}（{} 天预报，获取于 {}）",
                    snapshot.location.name,
                    snapshot.current.temperature,
                    snapshot.current.description,
                    snapshot.daily.len(),
                    snapshot.fetched_at
                );
            }
            None => warn!("[CLI] 🌤️ 暂无天气数据"),
        }
    }

    if let (Some(question), Some(chat)) = (&args.ask, client.chat()) {
        info!("[CLI] 🤖 提问: {}", question);
        match chat.send_message(question).await {
            Ok(reply) if reply.error => warn!("[CLI] 🤖 助手出错: {}", reply.text),
            Ok(reply) => info!("[CLI] 🤖 回答: {}", reply.text),
            Err(e) => error!("[CLI] ❌ 发送失败: {}", e),
        }
    }

    info!("[CLI] 📥 开始监听数据变更...");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        tokio::signal::ctrl_c().await?;
    }

    client.teardown().await;
    info!("[CLI] 👋 程序退出");
    Ok(())
}
