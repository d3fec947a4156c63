//! 远端集合 HTTP API 客户端
//!
//! 负责一个命名集合（farms / alerts）的所有 HTTP 请求，订阅走 WebSocket，
//! 见 [`crate::sdk::remote::subscription`]。

use crate::sdk::remote::subscription::{spawn_subscription, SubscriptionEndpoint};
use crate::sdk::remote::{CollectionFilter, RemoteCollection, Subscription, SubscriptionSink};
use crate::sdk::types::handle_http_response;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// 远端集合客户端配置
#[derive(Clone, Debug)]
pub struct CollectionEndpoint {
    /// 集合名称，例如 "farms"
    pub collection: String,
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// WebSocket 基础地址
    pub ws_url: String,
    /// 认证 token
    pub token: String,
    /// 压缩方式，"gzip" 或空字符串
    pub compression: String,
}

/// 基于 HTTP + WebSocket 的远端集合
pub struct HttpCollectionSource<T> {
    client: reqwest::Client,
    endpoint: CollectionEndpoint,
    _marker: PhantomData<fn() -> T>,
}

#[derive(Deserialize)]
struct ListData<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct CreateData {
    id: String,
}

impl<T> HttpCollectionSource<T> {
    /// 创建新的集合客户端
    ///
    /// `client` 应该已经在外部配置好认证头
    pub fn new(client: reqwest::Client, endpoint: CollectionEndpoint) -> Self {
        Self {
            client,
            endpoint,
            _marker: PhantomData,
        }
    }

    fn url(&self, action: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint.api_base_url.trim_end_matches('/'),
            self.endpoint.collection,
            action
        )
    }

    async fn post<R: DeserializeOwned>(
        &self,
        action: &str,
        body: serde_json::Value,
    ) -> Result<Option<R>> {
        let operation_id = Uuid::new_v4().to_string();
        let url = self.url(action);
        debug!(
            "[RemoteAPI] 📡 {} {} (operationID={})",
            self.endpoint.collection, action, operation_id
        );

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("operationID", &operation_id)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("请求失败: {}", url))?;

        let operation = format!("{}/{}", self.endpoint.collection, action);
        let api_resp = handle_http_response::<R>(response, &operation).await?;
        Ok(api_resp.data)
    }
}

#[async_trait]
impl<T> RemoteCollection<T> for HttpCollectionSource<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn fetch_all(&self, filter: &CollectionFilter) -> Result<Vec<T>> {
        let data: Option<ListData<T>> = self
            .post(
                "list",
                serde_json::json!({ "ownerUserID": filter.owner_user_id }),
            )
            .await?;
        let items = data.map(|d| d.items).unwrap_or_default();
        info!(
            "[RemoteAPI] {} 全量拉取完成，共 {} 条",
            self.endpoint.collection,
            items.len()
        );
        Ok(items)
    }

    async fn subscribe(
        &self,
        filter: &CollectionFilter,
        sink: Arc<dyn SubscriptionSink<T>>,
    ) -> Result<Subscription> {
        let endpoint = SubscriptionEndpoint {
            ws_url: self.endpoint.ws_url.clone(),
            collection: self.endpoint.collection.clone(),
            token: self.endpoint.token.clone(),
            user_id: filter.owner_user_id.clone(),
            compression: self.endpoint.compression.clone(),
        };
        spawn_subscription(endpoint, sink).await
    }

    async fn create(&self, item: &T) -> Result<String> {
        let body = serde_json::to_value(item).context("序列化实体失败")?;
        let data: Option<CreateData> = self.post("create", body).await?;
        let id = data
            .map(|d| d.id)
            .ok_or_else(|| anyhow::anyhow!("响应中缺少 data.id 字段"))?;
        info!("[RemoteAPI] {} 创建成功: {}", self.endpoint.collection, id);
        Ok(id)
    }

    async fn update(&self, id: &str, patch: &serde_json::Value) -> Result<()> {
        let _: Option<serde_json::Value> = self
            .post("update", serde_json::json!({ "id": id, "fields": patch }))
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let _: Option<serde_json::Value> = self
            .post("delete", serde_json::json!({ "id": id }))
            .await?;
        Ok(())
    }
}

/// 创建带认证头的 HTTP 客户端（token 通过 default_headers 自动添加）
pub fn build_authenticated_client(token: &str) -> Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .default_headers({
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                reqwest::header::HeaderName::from_static("token"),
                reqwest::header::HeaderValue::from_str(token).context("无效的 token")?,
            );
            headers
        })
        .build()
        .context("创建 HTTP 客户端失败")
}
