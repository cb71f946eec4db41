//! 工具箱：封闭的工具集合（天气、地点、汇率、费用计算）、外部后端契约与执行器

pub mod calculator;
pub mod executor;
pub mod registry;
pub mod services;

pub use executor::ToolExecutor;
pub use registry::{PlaceCategory, ToolKind, ToolRegistry, ToolRequest};
pub use services::{CurrencyService, PlaceService, WeatherService};
