//! 外部工具后端契约
//!
//! 天气、地点、汇率均为第三方 HTTP API，由宿主服务实现并注入；编排器只依赖这些 trait。
//! 实现必须无状态或内部自行同步，可在多个线程的对话间共享。

use async_trait::async_trait;

use crate::tools::PlaceCategory;

#[async_trait]
pub trait WeatherService: Send + Sync {
    /// 当前天气（摄氏度），返回给模型的可读文本
    async fn current_weather(&self, city: &str) -> Result<String, String>;

    /// 5 天预报
    async fn forecast(&self, city: &str) -> Result<String, String>;
}

#[async_trait]
pub trait PlaceService: Send + Sync {
    async fn search(&self, place: &str, category: PlaceCategory) -> Result<String, String>;
}

#[async_trait]
pub trait CurrencyService: Send + Sync {
    /// 把 amount 从 from 换算为 to（ISO 4217 代码）
    async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64, String>;
}
