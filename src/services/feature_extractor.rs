//! 页面特征提取 - 业务能力层
//!
//! 在浏览器 worker 上打开标签页、导航、执行一次提取脚本，得到 [`PageSnapshot`]。
//! 脚本只负责把 DOM 原样读出来；链接分类、alt 覆盖率、标题整理
//! 都在 [`build_snapshot`] 里完成，这部分是纯函数。

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, ResourceType};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::browser::{BrowserPool, ChromeWorker};
use crate::error::{AppError, AppResult, ExtractionReason};
use crate::infrastructure::{CloseGuard, JsExecutor};
use crate::models::{Heading, LoadTiming, PageSnapshot};
use crate::utils::logging::truncate_text;

/// 快照中最多保留的标题数
pub const MAX_HEADINGS: usize = 100;
const MAX_HEADING_CHARS: usize = 200;

/// 在页面内执行的提取脚本
const EXTRACT_SCRIPT: &str = r#"
(() => {
    const meta = (sel) => {
        const el = document.querySelector(sel);
        return el ? el.getAttribute('content') : null;
    };
    const nav = performance.getEntriesByType('navigation')[0] || null;
    const canonical = document.querySelector('link[rel="canonical"]');
    const body = document.body ? document.body.innerText || '' : '';
    return {
        href: location.href,
        status: nav && typeof nav.responseStatus === 'number' ? nav.responseStatus : null,
        title: document.title || null,
        metaDescription: meta('meta[name="description"]'),
        canonical: canonical ? canonical.href : null,
        language: document.documentElement.getAttribute('lang'),
        viewport: meta('meta[name="viewport"]'),
        robots: meta('meta[name="robots"]'),
        headings: Array.from(document.querySelectorAll('h1,h2,h3,h4,h5,h6')).map(h => ({
            level: Number(h.tagName.substring(1)),
            text: h.textContent || ''
        })),
        links: Array.from(document.querySelectorAll('a[href]')).map(a => ({
            href: a.href,
            rel: a.getAttribute('rel')
        })),
        images: Array.from(document.images).map(img => ({ alt: img.getAttribute('alt') })),
        wordCount: body.split(/\s+/).filter(w => w.length > 0).length,
        structuredDataBlocks: document.querySelectorAll('script[type="application/ld+json"]').length,
        openGraphTags: document.querySelectorAll('meta[property^="og:"]').length,
        domContentLoadedMs: nav ? Math.round(nav.domContentLoadedEventEnd) : null,
        loadEventMs: nav ? Math.round(nav.loadEventEnd) : null
    };
})()
"#;

/// 提取脚本的原始输出
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPageFeatures {
    pub href: String,
    pub status: Option<u32>,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub canonical: Option<String>,
    pub language: Option<String>,
    pub viewport: Option<String>,
    pub robots: Option<String>,
    pub headings: Vec<RawHeading>,
    pub links: Vec<RawLink>,
    pub images: Vec<RawImage>,
    pub word_count: usize,
    pub structured_data_blocks: usize,
    pub open_graph_tags: usize,
    pub dom_content_loaded_ms: Option<f64>,
    pub load_event_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawHeading {
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawLink {
    pub href: String,
    pub rel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawImage {
    pub alt: Option<String>,
}

/// 特征提取器
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    navigation_timeout: Duration,
    /// 打开标签页、执行脚本、关闭标签页各自的时限
    step_timeout: Duration,
}

impl FeatureExtractor {
    pub fn new(navigation_timeout: Duration) -> Self {
        Self {
            navigation_timeout,
            step_timeout: navigation_timeout,
        }
    }

    /// 在 worker 上提取页面快照，结束时总会关闭标签页
    ///
    /// 调用方的 future 被中途丢弃时，标签页由 [`CloseGuard`] 在后台关闭。
    pub async fn extract(&self, worker: &ChromeWorker, url: &Url) -> AppResult<PageSnapshot> {
        let page = bounded(
            self.step_timeout,
            async {
                worker.browser.new_page("about:blank").await.map_err(|e| {
                    AppError::extraction(
                        ExtractionReason::BrowserCrashed,
                        format!("无法打开标签页: {}", e),
                    )
                })
            },
            || {
                AppError::extraction(
                    ExtractionReason::BrowserCrashed,
                    format!("打开标签页超过 {:?}", self.step_timeout),
                )
            },
        )
        .await?;
        let tab = CloseGuard::new(JsExecutor::new(page), close_in_background);

        let result = self.extract_on(&tab, url).await;

        match timeout(self.step_timeout, tab.into_inner().close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("关闭标签页失败: {}", e),
            Err(_) => warn!("关闭标签页超过 {:?}", self.step_timeout),
        }
        result
    }

    async fn extract_on(&self, executor: &JsExecutor, url: &Url) -> AppResult<PageSnapshot> {
        debug!("🌐 导航到 {}", truncate_text(url.as_str(), 120));
        // 导航前订阅，主文档的响应状态作为脚本读不到状态时的后备
        let mut responses = executor
            .page()
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| navigation_error(e.into()))?;
        let started = Instant::now();

        match timeout(self.navigation_timeout, executor.page().goto(url.as_str())).await {
            Err(_) => {
                return Err(AppError::extraction(
                    ExtractionReason::NavigationTimeout,
                    format!("导航超过 {:?} 未完成", self.navigation_timeout),
                ))
            }
            Ok(Err(e)) => return Err(navigation_error(e.into())),
            Ok(Ok(_)) => {}
        }
        let navigation = started.elapsed();

        let mut documents = Vec::new();
        while let Some(Some(event)) = responses.next().now_or_never() {
            if event.r#type == ResourceType::Document {
                documents.push(DocumentResponse {
                    url: event.response.url.clone(),
                    status: event.response.status,
                });
            }
        }

        let mut raw: RawPageFeatures = bounded(
            self.step_timeout,
            executor.eval_as(EXTRACT_SCRIPT),
            || {
                AppError::extraction(
                    ExtractionReason::ScriptFailed,
                    format!("提取脚本超过 {:?} 未返回", self.step_timeout),
                )
            },
        )
        .await?;

        if raw.href.starts_with("chrome-error://") {
            return Err(AppError::extraction(
                ExtractionReason::NavigationFailed,
                "浏览器显示了错误页（DNS 或连接失败）",
            ));
        }
        raw.status = effective_status(raw.status, main_document_status(&documents, &raw.href));
        if let Some(status) = raw.status {
            if !(200..400).contains(&status) {
                warn!("页面返回 HTTP {}: {}", status, url);
                return Err(AppError::extraction(
                    ExtractionReason::HttpStatus,
                    format!("HTTP {}", status),
                ));
            }
        }

        let snapshot = build_snapshot(url, raw, navigation);
        info!(
            "✓ 页面提取完成: {} 个标题, {} 个内链, {} 个外链, {} 张图片",
            snapshot.headings.len(),
            snapshot.internal_links,
            snapshot.external_links,
            snapshot.image_count
        );
        Ok(snapshot)
    }
}

fn close_in_background(executor: JsExecutor) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        if let Err(e) = executor.close().await {
            debug!("后台关闭标签页失败: {}", e);
        }
    })
}

/// 给一个浏览器步骤加上时限
async fn bounded<T, Fut, E>(limit: Duration, step: Fut, on_timeout: E) -> AppResult<T>
where
    Fut: Future<Output = AppResult<T>>,
    E: FnOnce() -> AppError,
{
    match timeout(limit, step).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

/// 一次主文档响应（来自 `Network.responseReceived`）
#[derive(Debug, Clone, PartialEq)]
struct DocumentResponse {
    url: String,
    status: i64,
}

/// 主文档状态：优先取与最终地址相同的响应，否则取最后一个（重定向链的终点）
fn main_document_status(documents: &[DocumentResponse], final_url: &str) -> Option<u32> {
    documents
        .iter()
        .rev()
        .find(|d| d.url == final_url)
        .or_else(|| documents.last())
        .and_then(|d| u32::try_from(d.status).ok())
        .filter(|s| *s > 0)
}

/// 脚本读到的状态优先，读不到（旧版 Chromium 为 null 或 0）时用 CDP 事件里的状态
fn effective_status(script: Option<u32>, network: Option<u32>) -> Option<u32> {
    script.filter(|s| *s > 0).or(network)
}

/// 导航阶段的错误：崩溃与超时保持原样，其余都是导航失败
fn navigation_error(err: AppError) -> AppError {
    match err {
        kept @ AppError::Extraction {
            reason: ExtractionReason::BrowserCrashed | ExtractionReason::NavigationTimeout,
            ..
        } => kept,
        other => AppError::extraction(ExtractionReason::NavigationFailed, other),
    }
}

/// 由脚本原始输出构建快照
pub fn build_snapshot(requested: &Url, raw: RawPageFeatures, navigation: Duration) -> PageSnapshot {
    let final_url = Url::parse(&raw.href).unwrap_or_else(|_| requested.clone());
    let site_host = final_url.host_str().map(normalize_host);

    let mut internal_links = 0;
    let mut external_links = 0;
    let mut nofollow_links = 0;
    for link in &raw.links {
        let Ok(target) = Url::parse(&link.href) else {
            continue;
        };
        if !matches!(target.scheme(), "http" | "https") {
            continue;
        }
        if target.host_str().map(normalize_host) == site_host {
            internal_links += 1;
        } else {
            external_links += 1;
        }
        let nofollow = link.rel.as_deref().is_some_and(|rel| {
            rel.split_whitespace()
                .any(|r| r.eq_ignore_ascii_case("nofollow"))
        });
        if nofollow {
            nofollow_links += 1;
        }
    }

    let h1_count = raw.headings.iter().filter(|h| h.level == 1).count();
    let headings = raw
        .headings
        .iter()
        .filter(|h| (1..=6).contains(&h.level))
        .filter_map(|h| {
            let text = clean_text(&h.text);
            (!text.is_empty()).then(|| Heading {
                level: h.level,
                text: text.chars().take(MAX_HEADING_CHARS).collect(),
            })
        })
        .take(MAX_HEADINGS)
        .collect();

    let image_count = raw.images.len();
    let images_missing_alt = raw
        .images
        .iter()
        .filter(|img| img.alt.as_deref().map_or(true, |alt| alt.trim().is_empty()))
        .count();
    let alt_coverage = if image_count == 0 {
        1.0
    } else {
        (image_count - images_missing_alt) as f64 / image_count as f64
    };

    PageSnapshot {
        url: requested.to_string(),
        final_url: final_url.to_string(),
        http_status: raw.status.filter(|s| *s > 0).and_then(|s| u16::try_from(s).ok()),
        title: non_empty(raw.title),
        meta_description: non_empty(raw.meta_description),
        canonical: non_empty(raw.canonical),
        language: non_empty(raw.language),
        viewport: non_empty(raw.viewport),
        robots: non_empty(raw.robots),
        headings,
        h1_count,
        internal_links,
        external_links,
        nofollow_links,
        image_count,
        images_missing_alt,
        alt_coverage,
        word_count: raw.word_count,
        structured_data_blocks: raw.structured_data_blocks,
        open_graph_tags: raw.open_graph_tags,
        timing: LoadTiming {
            navigation_ms: navigation.as_millis() as u64,
            dom_content_loaded_ms: positive_ms(raw.dom_content_loaded_ms),
            load_event_ms: positive_ms(raw.load_event_ms),
        },
        captured_at: Utc::now(),
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| clean_text(&v))
        .filter(|v| !v.is_empty())
}

fn positive_ms(value: Option<f64>) -> Option<u64> {
    value.filter(|v| v.is_finite() && *v > 0.0).map(|v| v.round() as u64)
}

/// 快照来源
///
/// 编排层只依赖这个接口：生产环境走浏览器池，测试中注入固定快照。
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn capture(&self, url: &Url) -> AppResult<PageSnapshot>;
}

/// 基于浏览器池的快照来源
pub struct BrowserSnapshotSource {
    pool: BrowserPool,
    extractor: FeatureExtractor,
    acquire_timeout: Duration,
}

impl BrowserSnapshotSource {
    pub fn new(pool: BrowserPool, extractor: FeatureExtractor, acquire_timeout: Duration) -> Self {
        Self {
            pool,
            extractor,
            acquire_timeout,
        }
    }

    pub fn pool(&self) -> &BrowserPool {
        &self.pool
    }
}

#[async_trait]
impl SnapshotSource for BrowserSnapshotSource {
    async fn capture(&self, url: &Url) -> AppResult<PageSnapshot> {
        let extractor = &self.extractor;
        self.pool
            .with_worker(self.acquire_timeout, move |worker| async move {
                extractor.extract(&worker, url).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(href: &str, rel: Option<&str>) -> RawLink {
        RawLink {
            href: href.into(),
            rel: rel.map(Into::into),
        }
    }

    fn raw() -> RawPageFeatures {
        RawPageFeatures {
            href: "https://www.shop.example/products/1".into(),
            status: Some(200),
            title: Some("  Blue   Widget | Shop ".into()),
            meta_description: Some("".into()),
            headings: vec![
                RawHeading {
                    level: 1,
                    text: "Blue Widget".into(),
                },
                RawHeading {
                    level: 2,
                    text: "\n  Specs\n".into(),
                },
                RawHeading {
                    level: 3,
                    text: "   ".into(),
                },
            ],
            links: vec![
                link("https://shop.example/cart", None),
                link("https://www.shop.example/help", Some("nofollow")),
                link("https://partner.example/", Some("noopener NoFollow")),
                link("mailto:sales@shop.example", None),
                link("javascript:void(0)", None),
            ],
            images: vec![
                RawImage {
                    alt: Some("widget".into()),
                },
                RawImage { alt: None },
                RawImage {
                    alt: Some(" ".into()),
                },
                RawImage {
                    alt: Some("detail".into()),
                },
            ],
            word_count: 512,
            dom_content_loaded_ms: Some(310.4),
            load_event_ms: Some(0.0),
            ..Default::default()
        }
    }

    fn requested() -> Url {
        Url::parse("https://shop.example/products/1").unwrap()
    }

    #[test]
    fn test_links_are_classified_by_host() {
        let snap = build_snapshot(&requested(), raw(), Duration::from_millis(900));
        assert_eq!(snap.internal_links, 2);
        assert_eq!(snap.external_links, 1);
        assert_eq!(snap.nofollow_links, 2);
    }

    #[test]
    fn test_alt_coverage() {
        let snap = build_snapshot(&requested(), raw(), Duration::ZERO);
        assert_eq!(snap.image_count, 4);
        assert_eq!(snap.images_missing_alt, 2);
        assert_eq!(snap.alt_coverage, 0.5);

        let mut no_images = raw();
        no_images.images.clear();
        assert_eq!(build_snapshot(&requested(), no_images, Duration::ZERO).alt_coverage, 1.0);
    }

    #[test]
    fn test_headings_keep_order_and_drop_blank() {
        let snap = build_snapshot(&requested(), raw(), Duration::ZERO);
        let texts: Vec<_> = snap.headings.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, ["Blue Widget", "Specs"]);
        assert_eq!(snap.h1_count, 1);
    }

    #[test]
    fn test_headings_are_capped() {
        let mut many = raw();
        many.headings = (0..250)
            .map(|i| RawHeading {
                level: 2,
                text: format!("Section {}", i),
            })
            .collect();
        let snap = build_snapshot(&requested(), many, Duration::ZERO);
        assert_eq!(snap.headings.len(), MAX_HEADINGS);
        assert_eq!(snap.headings[0].text, "Section 0");
    }

    #[test]
    fn test_text_fields_and_timing() {
        let snap = build_snapshot(&requested(), raw(), Duration::from_millis(900));
        assert_eq!(snap.title.as_deref(), Some("Blue Widget | Shop"));
        assert_eq!(snap.meta_description, None);
        assert_eq!(snap.final_url, "https://www.shop.example/products/1");
        assert_eq!(snap.url, "https://shop.example/products/1");
        assert_eq!(snap.http_status, Some(200));
        assert_eq!(snap.timing.navigation_ms, 900);
        assert_eq!(snap.timing.dom_content_loaded_ms, Some(310));
        assert_eq!(snap.timing.load_event_ms, None);
    }

    #[test]
    fn test_navigation_error_mapping() {
        let crashed = AppError::extraction(ExtractionReason::BrowserCrashed, "ws");
        assert!(navigation_error(crashed).is_worker_fault());

        let other = AppError::extraction(ExtractionReason::ScriptFailed, "net::ERR_NAME_NOT_RESOLVED");
        assert!(matches!(
            navigation_error(other),
            AppError::Extraction {
                reason: ExtractionReason::NavigationFailed,
                ..
            }
        ));
    }

    fn document(url: &str, status: i64) -> DocumentResponse {
        DocumentResponse {
            url: url.into(),
            status,
        }
    }

    #[test]
    fn test_main_document_status_follows_redirects() {
        let documents = vec![
            document("http://shop.example/", 301),
            document("https://shop.example/", 404),
        ];
        assert_eq!(main_document_status(&documents, "https://shop.example/"), Some(404));
        // 最终地址对不上时取重定向链的最后一个
        assert_eq!(main_document_status(&documents, "https://shop.example/#top"), Some(404));
        assert_eq!(main_document_status(&[], "https://shop.example/"), None);
        assert_eq!(
            main_document_status(&[document("https://shop.example/", 0)], "https://shop.example/"),
            None
        );
    }

    #[test]
    fn test_network_status_used_when_script_has_none() {
        // 旧版 Chromium 的 responseStatus 为 null 或 0
        assert_eq!(effective_status(None, Some(404)), Some(404));
        assert_eq!(effective_status(Some(0), Some(404)), Some(404));
        assert_eq!(effective_status(Some(200), Some(404)), Some(200));
        assert_eq!(effective_status(None, None), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_step_times_out() {
        let hung = std::future::pending::<AppResult<()>>();
        let err = bounded(Duration::from_secs(5), hung, || {
            AppError::extraction(ExtractionReason::ScriptFailed, "提取脚本超时")
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            AppError::Extraction {
                reason: ExtractionReason::ScriptFailed,
                ..
            }
        ));

        let done = bounded(Duration::from_secs(5), async { Ok(7) }, || {
            AppError::extraction(ExtractionReason::ScriptFailed, "不会触发")
        })
        .await
        .unwrap();
        assert_eq!(done, 7);
    }

    #[test]
    fn test_raw_features_tolerate_missing_fields() {
        let raw: RawPageFeatures = serde_json::from_str(r#"{"href": "https://a.example/"}"#).unwrap();
        let snap = build_snapshot(&requested(), raw, Duration::ZERO);
        assert_eq!(snap.internal_links, 0);
        assert_eq!(snap.alt_coverage, 1.0);
    }
}
