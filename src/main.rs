use anyhow::{bail, Result};
use seo_audit::orchestrator::SubmitOptions;
use seo_audit::utils::logging;
use seo_audit::{App, Config};

const USAGE: &str = "用法: seo-audit <url> [analysis-type] [custom-prompt-id]";

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        bail!("{}", USAGE);
    };
    let analysis_type = args.next().unwrap_or_else(|| "complete-seo-audit".to_string());
    let options = SubmitOptions {
        custom_prompt_id: args.next(),
    };

    // 加载配置
    let config = Config::from_env()?;

    // 初始化并运行应用
    let app = App::initialize(config).await?;
    let outcome = app.run(&url, &analysis_type, options).await;
    app.shutdown().await;

    let report = outcome?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
