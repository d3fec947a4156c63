//! 基于 WebSocket 的集合订阅
//!
//! 服务端每次集合变化都推送一帧完整快照。读取任务在 `on_data` 返回之后
//! 才读取下一帧，保证控制器按推送顺序逐个提交。

use crate::sdk::remote::{Subscription, SubscriptionSink};
use crate::sdk::serialization::{decompress_gzip, is_gzip};
use crate::sdk::types::{frame_type, SubscriptionFrame, WebSocketConnectResp};
use anyhow::Result;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// WebSocket 读取端
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// 心跳间隔
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// 订阅连接参数
#[derive(Clone, Debug)]
pub struct SubscriptionEndpoint {
    pub ws_url: String,
    pub collection: String,
    pub token: String,
    pub user_id: String,
    pub compression: String,
}

impl SubscriptionEndpoint {
    /// 构建 WebSocket 订阅 URL
    pub fn build_url(&self, operation_id: &str) -> String {
        let compression_param = if self.compression.is_empty() {
            String::new()
        } else {
            format!("&compression={}", self.compression)
        };

        format!(
            "{}/{}/subscribe?token={}&userID={}&operationID={}{}",
            self.ws_url.trim_end_matches('/'),
            self.collection,
            self.token,
            self.user_id,
            operation_id,
            compression_param,
        )
    }
}

/// 连接订阅通道并启动读取、心跳任务
pub async fn spawn_subscription<T>(
    endpoint: SubscriptionEndpoint,
    sink: Arc<dyn SubscriptionSink<T>>,
) -> Result<Subscription>
where
    T: DeserializeOwned + Send + 'static,
{
    let operation_id = format!("{}", chrono::Utc::now().timestamp_millis());
    let url = endpoint.build_url(&operation_id);

    info!(
        "[Subscription] 🔗 订阅 {} (user={})",
        endpoint.collection, endpoint.user_id
    );

    let (ws_stream, response) = connect_async(&url).await?;
    debug!(
        "[Subscription] WebSocket 连接成功, 状态: {}",
        response.status()
    );

    let (write, mut read) = ws_stream.split();

    // 等待鉴权响应
    match read.next().await {
        Some(Ok(WsMessage::Text(text))) => {
            let resp: WebSocketConnectResp = serde_json::from_str(&text).map_err(|e| {
                anyhow::anyhow!("订阅响应解析失败: {}, 原始响应: {}", e, text)
            })?;
            if resp.err_code != 0 {
                let detail = if resp.err_dlt.is_empty() {
                    resp.err_msg.clone()
                } else {
                    format!("{} (详情: {})", resp.err_msg, resp.err_dlt)
                };
                error!(
                    "[Subscription] ❌ 订阅鉴权失败，错误码: {}, 错误信息: {}",
                    resp.err_code, detail
                );
                return Err(anyhow::anyhow!(
                    "订阅鉴权失败，错误码: {}, 错误信息: {}",
                    resp.err_code,
                    detail
                ));
            }
        }
        other => {
            error!("[Subscription] ❌ 未收到订阅鉴权响应: {:?}", other);
            return Err(anyhow::anyhow!("未收到订阅鉴权响应"));
        }
    }

    let writer = Arc::new(Mutex::new(write));

    let heartbeat = tokio::spawn(async move {
        let mut ticker = interval(HEARTBEAT_INTERVAL);
        loop {
            ticker.tick().await;
            let mut w = writer.lock().await;
            if w.send(WsMessage::Ping(vec![])).await.is_err() {
                break;
            }
        }
    });

    let collection = endpoint.collection.clone();
    let reader = tokio::spawn(async move {
        read_frames(&collection, read, sink).await;
    });

    let heartbeat_abort = heartbeat.abort_handle();
    let reader_abort = reader.abort_handle();
    let sub_id = format!("{}:{}:{}", endpoint.collection, endpoint.user_id, operation_id);
    let log_id = sub_id.clone();
    Ok(Subscription::new(sub_id, move || {
        info!("[Subscription] 取消订阅 {}", log_id);
        reader_abort.abort();
        heartbeat_abort.abort();
    }))
}

/// 读取循环：每帧处理完毕（回调返回）后才读取下一帧
async fn read_frames<T>(collection: &str, mut read: WsReader, sink: Arc<dyn SubscriptionSink<T>>)
where
    T: DeserializeOwned + Send + 'static,
{
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(WsMessage::Binary(data)) => handle_frame(collection, data, &sink).await,
            Ok(WsMessage::Text(text)) => handle_frame(collection, text.into_bytes(), &sink).await,
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
            Ok(WsMessage::Close(frame)) => {
                warn!("[Subscription] 👋 {} 订阅连接关闭: {:?}", collection, frame);
                sink.on_error(format!("subscription closed: {:?}", frame))
                    .await;
                return;
            }
            Err(e) => {
                error!("[Subscription] {} WebSocket 错误: {}", collection, e);
                sink.on_error(format!("subscription transport error: {}", e))
                    .await;
                return;
            }
            _ => {}
        }
    }
    warn!("[Subscription] {} 订阅流已结束", collection);
    sink.on_error("subscription stream ended".to_string()).await;
}

async fn handle_frame<T>(collection: &str, data: Vec<u8>, sink: &Arc<dyn SubscriptionSink<T>>)
where
    T: DeserializeOwned + Send + 'static,
{
    let raw = if is_gzip(&data) {
        match decompress_gzip(&data) {
            Ok(d) => d,
            Err(e) => {
                error!("[Subscription] 解压失败: {}", e);
                sink.on_error(format!("undecodable frame: {}", e)).await;
                return;
            }
        }
    } else {
        data
    };

    let frame = match serde_json::from_slice::<SubscriptionFrame>(&raw) {
        Ok(f) => f,
        Err(e) => {
            error!(
                "[Subscription] 帧解析失败: {}, 原始数据: {}",
                e,
                String::from_utf8_lossy(&raw)
            );
            sink.on_error(format!("malformed frame: {}", e)).await;
            return;
        }
    };

    match frame.req_identifier {
        frame_type::PUSH_SNAPSHOT if frame.err_code == 0 => {
            match serde_json::from_slice::<Vec<T>>(&frame.data) {
                Ok(items) => {
                    debug!(
                        "[Subscription] {} 收到快照，共 {} 条",
                        collection,
                        items.len()
                    );
                    sink.on_data(items).await;
                }
                Err(e) => {
                    error!("[Subscription] {} 快照解析失败: {}", collection, e);
                    sink.on_error(format!("malformed snapshot: {}", e)).await;
                }
            }
        }
        frame_type::PUSH_SNAPSHOT | frame_type::PUSH_ERROR => {
            warn!(
                "[Subscription] {} 服务端错误，错误码: {}, 错误信息: {}",
                collection, frame.err_code, frame.err_msg
            );
            sink.on_error(format!("server error {}: {}", frame.err_code, frame.err_msg))
                .await;
        }
        other => {
            debug!("[Subscription] 未知帧类型: {}", other);
        }
    }
}
