//! Hemera math demo.
//!
//! Registers `add` and `sub` handlers on an in-memory transport, then chains
//! two calls so the second one inherits the first call's meta and delegate.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hemera::{
    ActResponse, Carrier, Context, Handler, Hemera, HemeraConfig, IndexingStrategy, MemoryTransport,
    Pattern, PatternField, Patterned, Reply,
};

#[derive(Parser)]
#[command(name = "hemera-math")]
#[command(about = "Pattern-routed math service on an in-memory transport")]
struct Cli {
    /// Act timeout in milliseconds
    #[arg(long, env = "HEMERA_TIMEOUT_MS", default_value = "2000")]
    timeout_ms: u64,

    /// Router strategy: depth or insertion
    #[arg(long, env = "HEMERA_STRATEGY", default_value = "depth")]
    strategy: IndexingStrategy,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,

    /// First operand
    #[arg(default_value = "1")]
    a: i64,

    /// Second operand
    #[arg(default_value = "2")]
    b: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MathRequest {
    topic: String,
    #[serde(default)]
    cmd: String,
    #[serde(default)]
    a: i64,
    #[serde(default)]
    b: i64,
}

impl Patterned for MathRequest {
    fn fields(&self) -> Vec<PatternField> {
        vec![
            PatternField::new("topic", &self.topic),
            PatternField::new("cmd", &self.cmd),
            PatternField::new("a", self.a),
            PatternField::new("b", self.b),
        ]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MathResponse {
    result: i64,
}

fn math(cmd: &str) -> Pattern {
    Pattern::new().field("topic", "math").field("cmd", cmd)
}

async fn register(hemera: &Hemera) -> Result<()> {
    hemera
        .add(
            &math("add"),
            Handler::new(|req: MathRequest, reply: Reply| async move {
                let _ = reply.send(MathResponse { result: req.a + req.b }).await;
            }),
        )
        .await?;

    hemera
        .add(
            &math("sub"),
            Handler::with_context(|req: MathRequest, reply: Reply, ctx: Context| async move {
                info!(meta = ?ctx.meta, "sub called");
                let _ = reply.send(MathResponse { result: req.a - req.b }).await;
            }),
        )
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = HemeraConfig::default()
        .with_timeout(Duration::from_millis(cli.timeout_ms))
        .with_strategy(cli.strategy);
    let hemera = Hemera::new(Arc::new(MemoryTransport::new()), config);
    register(&hemera).await?;
    info!(patterns = hemera.len(), strategy = %cli.strategy, "handlers registered");

    let mut meta = Carrier::new();
    meta.insert("user".to_string(), json!("demo"));
    let mut delegate = Carrier::new();
    delegate.insert("token".to_string(), json!("abc123"));

    let sum_pattern = math("add")
        .field("a", cli.a)
        .field("b", cli.b)
        .with_meta(meta)
        .with_delegate(delegate);
    let sum: ActResponse<MathResponse> = hemera.act(&sum_pattern).await;
    let ctx = sum.context.clone();
    let sum = sum
        .into_result()?
        .context("add returned no result")?;
    info!(a = cli.a, b = cli.b, result = sum.result, "add");

    let diff_pattern = MathRequest {
        topic: "math".to_string(),
        cmd: "sub".to_string(),
        a: sum.result,
        b: cli.b,
    };
    let diff: ActResponse<MathResponse> = hemera.act_with_context(&diff_pattern, &ctx).await;
    let trace = diff.context.trace.clone();
    let diff = diff
        .into_result()?
        .context("sub returned no result")?;
    info!(
        result = diff.result,
        parent_span = %trace.parent_span_id,
        duration_ms = trace.duration,
        "sub"
    );

    Ok(())
}
