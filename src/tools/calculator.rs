//! 费用计算器：本地算术工具，无外部依赖

/// 酒店总价 = 每晚价格 × 天数
pub fn hotel_cost(price_per_night: f64, total_days: u32) -> Result<f64, String> {
    if price_per_night < 0.0 {
        return Err(format!("price_per_night must be non-negative, got {price_per_night}"));
    }
    Ok(price_per_night * f64::from(total_days))
}

/// 多项费用求和
pub fn total_expense(costs: &[f64]) -> Result<f64, String> {
    if costs.iter().any(|c| !c.is_finite()) {
        return Err("costs must be finite numbers".to_string());
    }
    Ok(costs.iter().sum())
}

/// 日均预算 = 总费用 / 天数
pub fn daily_budget(total_cost: f64, days: u32) -> Result<f64, String> {
    if days == 0 {
        return Err("days must be greater than zero".to_string());
    }
    Ok(total_cost / f64::from(days))
}
