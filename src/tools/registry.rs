//! 工具注册表
//!
//! 工具集合是封闭的：ToolKind 列出全部名称，ToolRequest 是按名称打标签、参数强类型的调用。
//! 模型给出的 {"tool", "args"} 先经 parse 解析为 ToolRequest（未知工具、参数不符均为错误），
//! 再分派到注入的后端或本地计算器。

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::react::ToolCall;
use crate::tools::calculator;
use crate::tools::{CurrencyService, PlaceService, WeatherService};

/// 全部工具名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ToolKind {
    GetCurrentWeather,
    GetWeatherForecast,
    SearchAttractions,
    SearchRestaurants,
    SearchActivities,
    SearchTransportation,
    ConvertCurrency,
    EstimateTotalHotelCost,
    CalculateTotalExpense,
    CalculateDailyExpenseBudget,
}

impl ToolKind {
    pub const ALL: [ToolKind; 10] = [
        ToolKind::GetCurrentWeather,
        ToolKind::GetWeatherForecast,
        ToolKind::SearchAttractions,
        ToolKind::SearchRestaurants,
        ToolKind::SearchActivities,
        ToolKind::SearchTransportation,
        ToolKind::ConvertCurrency,
        ToolKind::EstimateTotalHotelCost,
        ToolKind::CalculateTotalExpense,
        ToolKind::CalculateDailyExpenseBudget,
    ];

    /// 工具名称（即模型 JSON 中的 "tool" 字段）
    pub fn name(self) -> &'static str {
        match self {
            ToolKind::GetCurrentWeather => "get_current_weather",
            ToolKind::GetWeatherForecast => "get_weather_forecast",
            ToolKind::SearchAttractions => "search_attractions",
            ToolKind::SearchRestaurants => "search_restaurants",
            ToolKind::SearchActivities => "search_activities",
            ToolKind::SearchTransportation => "search_transportation",
            ToolKind::ConvertCurrency => "convert_currency",
            ToolKind::EstimateTotalHotelCost => "estimate_total_hotel_cost",
            ToolKind::CalculateTotalExpense => "calculate_total_expense",
            ToolKind::CalculateDailyExpenseBudget => "calculate_daily_expense_budget",
        }
    }

    pub fn from_name(name: &str) -> Option<ToolKind> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::GetCurrentWeather => "Get current weather for a city with temperature in Celsius",
            ToolKind::GetWeatherForecast => "Get 5-day weather forecast for a city",
            ToolKind::SearchAttractions => "Search attractions of a place",
            ToolKind::SearchRestaurants => "Search restaurants of a place",
            ToolKind::SearchActivities => "Search activities of a place",
            ToolKind::SearchTransportation => "Search transportation of a place",
            ToolKind::ConvertCurrency => "Convert an amount from one currency to another",
            ToolKind::EstimateTotalHotelCost => "Calculate total hotel cost from price per night and number of days",
            ToolKind::CalculateTotalExpense => "Sum a list of expense amounts",
            ToolKind::CalculateDailyExpenseBudget => "Divide a total cost evenly across the trip days",
        }
    }

    /// 参数 JSON Schema（供模型生成正确的参数格式）
    pub fn parameters_schema(self) -> Value {
        let schema = match self {
            ToolKind::GetCurrentWeather | ToolKind::GetWeatherForecast => {
                schemars::schema_for!(CityArgs)
            }
            ToolKind::SearchAttractions
            | ToolKind::SearchRestaurants
            | ToolKind::SearchActivities
            | ToolKind::SearchTransportation => schemars::schema_for!(PlaceArgs),
            ToolKind::ConvertCurrency => schemars::schema_for!(CurrencyArgs),
            ToolKind::EstimateTotalHotelCost => schemars::schema_for!(HotelCostArgs),
            ToolKind::CalculateTotalExpense => schemars::schema_for!(ExpenseArgs),
            ToolKind::CalculateDailyExpenseBudget => schemars::schema_for!(DailyBudgetArgs),
        };
        serde_json::to_value(schema).unwrap_or(Value::Null)
    }

    fn is_local(self) -> bool {
        matches!(
            self,
            ToolKind::EstimateTotalHotelCost
                | ToolKind::CalculateTotalExpense
                | ToolKind::CalculateDailyExpenseBudget
        )
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 地点搜索类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceCategory {
    Attractions,
    Restaurants,
    Activities,
    Transportation,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct CityArgs {
    pub city: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct PlaceArgs {
    pub place: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct CurrencyArgs {
    pub amount: f64,
    pub from_currency: String,
    pub to_currency: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct HotelCostArgs {
    pub price_per_night: f64,
    pub total_days: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct ExpenseArgs {
    pub costs: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct DailyBudgetArgs {
    pub total_cost: f64,
    pub days: u32,
}

/// 强类型的工具调用
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolRequest {
    GetCurrentWeather(CityArgs),
    GetWeatherForecast(CityArgs),
    SearchAttractions(PlaceArgs),
    SearchRestaurants(PlaceArgs),
    SearchActivities(PlaceArgs),
    SearchTransportation(PlaceArgs),
    ConvertCurrency(CurrencyArgs),
    EstimateTotalHotelCost(HotelCostArgs),
    CalculateTotalExpense(ExpenseArgs),
    CalculateDailyExpenseBudget(DailyBudgetArgs),
}

impl ToolRequest {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolRequest::GetCurrentWeather(_) => ToolKind::GetCurrentWeather,
            ToolRequest::GetWeatherForecast(_) => ToolKind::GetWeatherForecast,
            ToolRequest::SearchAttractions(_) => ToolKind::SearchAttractions,
            ToolRequest::SearchRestaurants(_) => ToolKind::SearchRestaurants,
            ToolRequest::SearchActivities(_) => ToolKind::SearchActivities,
            ToolRequest::SearchTransportation(_) => ToolKind::SearchTransportation,
            ToolRequest::ConvertCurrency(_) => ToolKind::ConvertCurrency,
            ToolRequest::EstimateTotalHotelCost(_) => ToolKind::EstimateTotalHotelCost,
            ToolRequest::CalculateTotalExpense(_) => ToolKind::CalculateTotalExpense,
            ToolRequest::CalculateDailyExpenseBudget(_) => ToolKind::CalculateDailyExpenseBudget,
        }
    }
}

/// 工具注册表：持有外部后端与可选的工具白名单；无内部可变状态，可跨线程共享
#[derive(Default, Clone)]
pub struct ToolRegistry {
    weather: Option<Arc<dyn WeatherService>>,
    places: Option<Arc<dyn PlaceService>>,
    currency: Option<Arc<dyn CurrencyService>>,
    allowed: Option<BTreeSet<ToolKind>>,
}

impl ToolRegistry {
    /// 只含本地计算器工具
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weather(mut self, service: Arc<dyn WeatherService>) -> Self {
        self.weather = Some(service);
        self
    }

    pub fn with_places(mut self, service: Arc<dyn PlaceService>) -> Self {
        self.places = Some(service);
        self
    }

    pub fn with_currency(mut self, service: Arc<dyn CurrencyService>) -> Self {
        self.currency = Some(service);
        self
    }

    /// 限制可用工具；不调用则后端齐备的工具全部可用
    pub fn with_allowed(mut self, kinds: impl IntoIterator<Item = ToolKind>) -> Self {
        self.allowed = Some(kinds.into_iter().collect());
        self
    }

    pub fn is_available(&self, kind: ToolKind) -> bool {
        let backed = match kind {
            ToolKind::GetCurrentWeather | ToolKind::GetWeatherForecast => self.weather.is_some(),
            ToolKind::SearchAttractions
            | ToolKind::SearchRestaurants
            | ToolKind::SearchActivities
            | ToolKind::SearchTransportation => self.places.is_some(),
            ToolKind::ConvertCurrency => self.currency.is_some(),
            k => k.is_local(),
        };
        backed && self.allowed.as_ref().map_or(true, |a| a.contains(&kind))
    }

    pub fn available(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|k| self.is_available(*k))
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.available().iter().map(|k| k.name().to_string()).collect()
    }

    /// 按名称解析模型给出的调用
    pub fn parse(&self, call: &ToolCall) -> Result<ToolRequest, String> {
        let kind = ToolKind::from_name(&call.tool)
            .ok_or_else(|| format!("Unknown tool: {}", call.tool))?;
        if !self.is_available(kind) {
            return Err(format!("Tool not enabled: {}", kind));
        }
        serde_json::from_value(serde_json::json!({
            "tool": call.tool,
            "args": call.args,
        }))
        .map_err(|e| format!("Invalid arguments for {}: {}", kind, e))
    }

    pub async fn execute(&self, request: ToolRequest) -> Result<String, String> {
        match request {
            ToolRequest::GetCurrentWeather(a) => self.weather()?.current_weather(&a.city).await,
            ToolRequest::GetWeatherForecast(a) => self.weather()?.forecast(&a.city).await,
            ToolRequest::SearchAttractions(a) => {
                self.places()?.search(&a.place, PlaceCategory::Attractions).await
            }
            ToolRequest::SearchRestaurants(a) => {
                self.places()?.search(&a.place, PlaceCategory::Restaurants).await
            }
            ToolRequest::SearchActivities(a) => {
                self.places()?.search(&a.place, PlaceCategory::Activities).await
            }
            ToolRequest::SearchTransportation(a) => {
                self.places()?.search(&a.place, PlaceCategory::Transportation).await
            }
            ToolRequest::ConvertCurrency(a) => {
                let converted = self
                    .currency()?
                    .convert(a.amount, &a.from_currency, &a.to_currency)
                    .await?;
                Ok(format!(
                    "{:.2} {} = {:.2} {}",
                    a.amount, a.from_currency, converted, a.to_currency
                ))
            }
            ToolRequest::EstimateTotalHotelCost(a) => {
                calculator::hotel_cost(a.price_per_night, a.total_days).map(|v| format!("{v:.2}"))
            }
            ToolRequest::CalculateTotalExpense(a) => {
                calculator::total_expense(&a.costs).map(|v| format!("{v:.2}"))
            }
            ToolRequest::CalculateDailyExpenseBudget(a) => {
                calculator::daily_budget(a.total_cost, a.days).map(|v| format!("{v:.2}"))
            }
        }
    }

    /// 可用工具的 name / description / parameters 列表，拼入 system prompt
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .available()
            .into_iter()
            .map(|k| {
                serde_json::json!({
                    "name": k.name(),
                    "description": k.description(),
                    "parameters": k.parameters_schema(),
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }

    fn weather(&self) -> Result<&Arc<dyn WeatherService>, String> {
        self.weather.as_ref().ok_or_else(|| "weather service not configured".to_string())
    }

    fn places(&self) -> Result<&Arc<dyn PlaceService>, String> {
        self.places.as_ref().ok_or_else(|| "place service not configured".to_string())
    }

    fn currency(&self) -> Result<&Arc<dyn CurrencyService>, String> {
        self.currency.as_ref().ok_or_else(|| "currency service not configured".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedRate(f64);

    #[async_trait]
    impl CurrencyService for FixedRate {
        async fn convert(&self, amount: f64, _from: &str, _to: &str) -> Result<f64, String> {
            Ok(amount * self.0)
        }
    }

    fn call(tool: &str, args: Value) -> ToolCall {
        ToolCall {
            tool: tool.to_string(),
            args,
        }
    }

    #[test]
    fn test_names_roundtrip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("shell"), None);
    }

    #[test]
    fn test_calculator_available_without_backends() {
        let registry = ToolRegistry::new();
        assert_eq!(
            registry.available(),
            vec![
                ToolKind::EstimateTotalHotelCost,
                ToolKind::CalculateTotalExpense,
                ToolKind::CalculateDailyExpenseBudget,
            ]
        );
        let err = registry
            .parse(&call("get_current_weather", serde_json::json!({"city": "Paris"})))
            .unwrap_err();
        assert!(err.contains("not enabled"));
    }

    #[test]
    fn test_parse_rejects_bad_args() {
        let registry = ToolRegistry::new();
        let err = registry
            .parse(&call("estimate_total_hotel_cost", serde_json::json!({"nights": 2})))
            .unwrap_err();
        assert!(err.contains("Invalid arguments"));
        assert!(registry.parse(&call("teleport", Value::Null)).is_err());
    }

    #[test]
    fn test_allowlist_restricts_tools() {
        let registry = ToolRegistry::new()
            .with_currency(Arc::new(FixedRate(2.0)))
            .with_allowed([ToolKind::ConvertCurrency]);
        assert_eq!(registry.available(), vec![ToolKind::ConvertCurrency]);
    }

    #[tokio::test]
    async fn test_execute_currency_and_calculator() {
        let registry = ToolRegistry::new().with_currency(Arc::new(FixedRate(90.0)));
        let req = registry
            .parse(&call(
                "convert_currency",
                serde_json::json!({"amount": 10.0, "from_currency": "EUR", "to_currency": "INR"}),
            ))
            .unwrap();
        assert_eq!(req.kind(), ToolKind::ConvertCurrency);
        assert_eq!(registry.execute(req).await.unwrap(), "10.00 EUR = 900.00 INR");

        let req = registry
            .parse(&call(
                "calculate_daily_expense_budget",
                serde_json::json!({"total_cost": 700.0, "days": 7}),
            ))
            .unwrap();
        assert_eq!(registry.execute(req).await.unwrap(), "100.00");
    }

    #[test]
    fn test_schema_lists_only_available_tools() {
        let schema = ToolRegistry::new().to_schema_json();
        assert!(schema.contains("calculate_total_expense"));
        assert!(!schema.contains("get_current_weather"));
    }
}
