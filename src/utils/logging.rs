/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use std::fs::OpenOptions;
use std::io::Write;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::AppResult;
use crate::models::{AnalysisJob, AuditReport, CategoryStatus};

/// 初始化 tracing
///
/// 日志级别由 `RUST_LOG` 控制，默认 `info`。重复调用是安全的。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 在日志文件末尾追加一次运行的头部
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> AppResult<()> {
    let log_header = format!(
        "{}\nSEO 审计日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;
    file.write_all(log_header.as_bytes())?;
    Ok(())
}

/// 记录程序启动信息
///
/// # 参数
/// - `pool_size`: 浏览器 worker 数量
/// - `category_concurrency`: 单任务内类别并发数
pub fn log_startup(pool_size: usize, category_concurrency: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - SEO 审计流水线");
    info!("🌐 浏览器 worker 数: {}", pool_size);
    info!("📊 类别并发数: {}", category_concurrency);
    info!("{}", "=".repeat(60));
}

/// 记录任务开始
pub fn log_job_start(job: &AnalysisJob) {
    info!("\n{}", "=".repeat(60));
    info!("[任务 {}] 📦 开始审计: {}", job.id.short(), truncate_text(&job.url, 80));
    info!(
        "[任务 {}] 📋 分析类型: {}，类别: {}",
        job.id.short(),
        job.analysis_type,
        job.expected_categories
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!("{}", "=".repeat(60));
}

/// 记录任务完成
pub fn log_job_complete(job: &AnalysisJob) {
    let ok = job
        .categories
        .iter()
        .filter(|c| c.status == CategoryStatus::Ok)
        .count();
    info!("\n{}", "─".repeat(60));
    info!(
        "[任务 {}] ✓ 任务结束: {}，成功类别 {}/{}",
        job.id.short(),
        job.status,
        ok,
        job.expected_categories.len()
    );
    match job.overall_score {
        Some(score) => info!("[任务 {}] 🏁 总分: {:.2}", job.id.short(), score),
        None => info!("[任务 {}] 🏁 总分: 无（没有成功的类别）", job.id.short()),
    }
    info!("{}", "─".repeat(60));
}

/// 打印报告摘要
pub fn print_report(report: &AuditReport) {
    info!("\n{}", "=".repeat(60));
    info!("📊 审计报告 - {}", truncate_text(&report.job.url, 80));
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    for item in &report.breakdown {
        let mark = match item.status {
            CategoryStatus::Ok => "✅",
            CategoryStatus::Failed => "❌",
            CategoryStatus::TimedOut => "⏱️",
        };
        info!(
            "{} {:<12} {:>6.1}/{:<6.1} {:?}，问题 {} 个",
            mark,
            item.category.as_str(),
            item.score,
            item.max_score,
            item.color,
            item.issues.len()
        );
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（字符数）
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_text("短文本", 10), "短文本");
        assert_eq!(truncate_text("页面标题过长需要截断", 4), "页面标题...");
    }

    #[test]
    fn test_log_file_header_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let path = path.to_str().unwrap();
        init_log_file(path).unwrap();
        init_log_file(path).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.matches("SEO 审计日志").count(), 2);
    }
}
