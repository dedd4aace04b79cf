//! 应用根对象
//! 显式持有存储、事件总线、API 客户端与认证会话，由调用方创建并销毁

use std::sync::Arc;

use crate::{
    auth::{RetentionPolicy, TokenStore},
    client::ApiClient,
    config::AppConfig,
    error::{AppError, Result},
    realtime::EventBus,
    services::{AuthSession, ExamFlow, Session},
    storage::{self, KeyValueStore},
};

pub struct AppContext {
    pub config: AppConfig,
    pub events: EventBus,
    pub storage: Arc<dyn KeyValueStore>,
    pub client: Arc<ApiClient>,
    pub auth: AuthSession,
}

impl AppContext {
    /// 按配置创建存储后端并组装各组件
    pub fn init(config: AppConfig) -> Result<Self> {
        let storage = storage::from_config(&config.storage)?;
        Self::with_storage(config, storage)
    }

    /// 使用给定存储组装各组件，并启动会话事件监听
    pub fn with_storage(config: AppConfig, storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let events = EventBus::default();
        let tokens = TokenStore::new(storage.clone(), RetentionPolicy::from(&config.storage));
        let client = Arc::new(ApiClient::new(
            &config.api,
            config.session.clone(),
            tokens,
            events.clone(),
        )?);
        let auth = AuthSession::new(client.clone(), config.session.login_path.clone());
        auth.start();

        tracing::debug!(
            base_url = %config.api.base_url,
            backend = %config.storage.backend,
            "Application context initialized"
        );

        Ok(Self {
            config,
            events,
            storage,
            client,
            auth,
        })
    }

    /// 启动恢复会话
    pub async fn boot(&self) -> Session {
        self.auth.restore().await
    }

    /// 为当前登录用户创建考试流程
    pub fn exam_flow(&self) -> Result<ExamFlow> {
        let user = self.auth.current().user.ok_or(AppError::Unauthorized)?;
        Ok(ExamFlow::new(self.storage.clone(), user.id))
    }

    pub fn teardown(&self) {
        self.auth.shutdown();
        tracing::debug!("Application context torn down");
    }
}
