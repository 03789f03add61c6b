//! Hive 演示入口
//!
//! 用 Mock 模型跑一个「需求分析 -> 方案生成」的顺序工作流：
//! 初始化日志与配置、安装信号处理、按配置创建检查点存储，然后逐个打印事件。
//!
//! 用法：`hive [需求文本] [checkpoint-id]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hive::{
    checkpoint::store_from_config,
    config::{load_config, AppConfig},
    core::ShutdownSignal,
    llm::{LlmClient, MockLlmClient, RetryingLlmClient},
    observability, Agent, AgentEvent, ChatModelAgent, EventOutput, RunOptions, Runner, RunnerConfig,
    SequentialAgent,
};

const DEFAULT_QUERY: &str = "I need a development plan for an online shop with multi-language support and mobile layouts.";

fn build_workflow(cfg: &AppConfig, model: Arc<dyn LlmClient>) -> anyhow::Result<Arc<dyn Agent>> {
    let timeout = Duration::from_secs(cfg.agent.tool_timeout_secs);

    let mut analyzer = ChatModelAgent::builder("Analyzer")
        .description("Extracts the key requirements from the user's request")
        .instruction("You are a requirements analyst. Extract the key facts and needs from the user's input.")
        .model(Arc::clone(&model))
        .tool_timeout(timeout)
        .output_key("analysis");
    let mut generator = ChatModelAgent::builder("SolutionGenerator")
        .description("Turns the analysis into a concrete plan")
        .instruction("You are a solution architect. Write a detailed plan based on this analysis: {analysis}")
        .model(model)
        .tool_timeout(timeout)
        .output_key("solution");
    if let Some(max) = cfg.agent.max_iterations {
        analyzer = analyzer.max_iterations(max);
        generator = generator.max_iterations(max);
    }

    let workflow = SequentialAgent::new(
        "AnalysisWorkflow",
        "Analyzes the request first, then generates a plan",
        vec![Arc::new(analyzer.build()?), Arc::new(generator.build()?)],
    )?;
    Ok(Arc::new(workflow))
}

async fn print_event(event: AgentEvent) -> anyhow::Result<()> {
    if let Some(err) = event.err {
        anyhow::bail!("agent '{}' failed: {}", event.agent_name, err);
    }
    match event.output {
        Some(EventOutput::Message(msg)) => println!("[{}] {}", event.agent_name, msg.content),
        Some(EventOutput::Stream(mut stream)) => {
            print!("[{}] ", event.agent_name);
            while let Some(chunk) = stream.recv().await {
                let chunk = chunk.map_err(|e| anyhow::anyhow!("stream from '{}' failed: {e}", event.agent_name))?;
                print!("{}", chunk.content);
            }
            println!();
        }
        None => {}
    }
    if let Some(action) = event.action {
        println!("[{}] action: {:?}", event.agent_name, action);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = match load_config(None) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            AppConfig::default()
        }
    };

    let shutdown = Arc::new(ShutdownSignal::new());
    shutdown.install_signal_handlers();

    let mut args = std::env::args().skip(1);
    let query = args.next().unwrap_or_else(|| DEFAULT_QUERY.to_string());
    let options = match args.next() {
        Some(id) => RunOptions::with_checkpoint_id(id),
        None => RunOptions::default(),
    };

    let model: Arc<dyn LlmClient> = Arc::new(RetryingLlmClient::new(
        Arc::new(MockLlmClient),
        cfg.llm.retry.to_retry_config(),
    ));
    let workflow = build_workflow(&cfg, model).context("Failed to build workflow")?;

    let store = store_from_config(&cfg.checkpoint)
        .await
        .context("Failed to open checkpoint store")?;
    let runner = Runner::new(RunnerConfig::from_app_config(workflow, &cfg).with_checkpoint_store(store));

    println!("> {query}");
    let mut events = runner.query_with(shutdown.token(), query, options);
    while let Some(event) = events.next().await {
        print_event(event).await?;
    }
    Ok(())
}
