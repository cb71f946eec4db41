//! Wayfarer - 旅行规划多轮对话编排器
//!
//! 入口：加载配置、初始化日志、打开 SQLite，然后在标准输入上对一个计划进行追问。
//! 用法：`wayfarer <plan_id>` 继续已有计划；`wayfarer [destination] [days]` 先生成新计划（默认 Lisbon 3 天）。

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use wayfarer::config::load_config;
use wayfarer::core::{create_llm_from_config, ConversationOrchestrator, PlanRequest};
use wayfarer::memory::{PlanId, SqliteConversationStore};
use wayfarer::observability;
use wayfarer::tools::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let orch_cfg = cfg.orchestrator_config().context("Invalid agent config")?;

    let store = SqliteConversationStore::open(&cfg.app.db_path)
        .with_context(|| format!("Failed to open {}", cfg.app.db_path.display()))?;

    let llm = create_llm_from_config(&cfg);
    // 外部天气/地点/汇率后端未接入时，只有费用计算工具可用
    let orchestrator = ConversationOrchestrator::new(orch_cfg, llm, ToolRegistry::new(), Arc::new(store));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let plan_id: PlanId = match args.first().map(|a| a.parse::<PlanId>()) {
        Some(Ok(plan_id)) => plan_id,
        _ => {
            let destination = args.first().map(String::as_str).unwrap_or("Lisbon");
            let days = match args.get(1) {
                Some(arg) => arg.parse().context("days must be a positive integer")?,
                None => 3,
            };
            let generated = orchestrator
                .generate_plan(1, &PlanRequest::new(destination, days))
                .await
                .with_context(|| format!("Failed to plan a trip to {destination}"))?;
            println!("Created plan {} for {destination}\n{}", generated.plan_id, generated.content);
            generated.plan_id
        }
    };
    let thread_id = orchestrator.thread_id_for(plan_id).await?;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => {
                for message in orchestrator.get_history(&thread_id).await? {
                    println!("[{:?}] {}", message.role, message.content);
                }
            }
            question => match orchestrator.continue_thread(&thread_id, plan_id, question).await {
                Ok(reply) => println!("{reply}"),
                Err(e) if e.is_retryable() => eprintln!("Busy, try again: {e}"),
                Err(e) => eprintln!("Error: {e}"),
            },
        }
    }

    orchestrator.shutdown();
    Ok(())
}
