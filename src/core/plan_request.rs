//! 生成计划的请求参数
//!
//! 对应首次规划：把目的地、天数、预算、偏好、人数拼成一条自然语言提问交给 Agent。

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlanRequest {
    pub destination: String,
    pub duration_days: u32,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default = "default_group_size")]
    pub group_size: u32,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_group_size() -> u32 {
    1
}

impl PlanRequest {
    pub fn new(destination: impl Into<String>, duration_days: u32) -> Self {
        Self {
            destination: destination.into(),
            duration_days,
            budget: None,
            currency: default_currency(),
            preferences: Vec::new(),
            group_size: default_group_size(),
        }
    }

    pub fn with_budget(mut self, amount: f64, currency: impl Into<String>) -> Self {
        self.budget = Some(amount);
        self.currency = currency.into();
        self
    }

    pub fn with_preferences(mut self, preferences: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.preferences = preferences.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_group_size(mut self, group_size: u32) -> Self {
        self.group_size = group_size;
        self
    }

    /// 交给 Agent 的首条用户提问
    pub fn query(&self) -> String {
        let mut parts = vec![format!(
            "Plan a {}-day trip to {}",
            self.duration_days, self.destination
        )];
        if let Some(budget) = self.budget {
            parts.push(format!("with a budget of {} {}", self.currency, budget));
        }
        if !self.preferences.is_empty() {
            parts.push(format!("focusing on {} activities", self.preferences.join(", ")));
        }
        if self.group_size > 1 {
            parts.push(format!("for {} people", self.group_size));
        }
        parts.join(" ")
    }
}
