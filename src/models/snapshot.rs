use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 标题层级中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

/// 加载耗时（毫秒）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTiming {
    /// 从发起导航到 goto 返回
    pub navigation_ms: u64,
    pub dom_content_loaded_ms: Option<u64>,
    pub load_event_ms: Option<u64>,
}

const TRUNCATED_MARKER: &str = "\n...(truncated)";

/// 页面快照
///
/// 每个任务只生成一次，之后只读，由所有类别评分共享。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub url: String,
    pub final_url: String,
    pub http_status: Option<u16>,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub canonical: Option<String>,
    pub language: Option<String>,
    pub viewport: Option<String>,
    pub robots: Option<String>,
    /// 文档顺序
    pub headings: Vec<Heading>,
    pub h1_count: usize,
    pub internal_links: usize,
    pub external_links: usize,
    pub nofollow_links: usize,
    pub image_count: usize,
    pub images_missing_alt: usize,
    /// 有 alt 的图片占比，无图片时为 1.0
    pub alt_coverage: f64,
    pub word_count: usize,
    pub structured_data_blocks: usize,
    pub open_graph_tags: usize,
    pub timing: LoadTiming,
    pub captured_at: DateTime<Utc>,
}

impl PageSnapshot {
    /// 序列化为发送给模型的 JSON，长度不超过 `max_chars` 个字符
    ///
    /// 超长时先逐步裁剪标题列表，仍然超长再直接截断。
    pub fn to_prompt_json(&self, max_chars: usize) -> String {
        let mut view = self.clone();
        loop {
            let json = serde_json::to_string_pretty(&view).unwrap_or_default();
            if json.chars().count() <= max_chars {
                return json;
            }
            if view.headings.is_empty() {
                let marker = TRUNCATED_MARKER.chars().count();
                if max_chars <= marker {
                    // 放不下标记时只截断
                    return json.chars().take(max_chars).collect();
                }
                let mut cut: String = json.chars().take(max_chars - marker).collect();
                cut.push_str(TRUNCATED_MARKER);
                return cut;
            }
            let keep = view.headings.len() / 2;
            view.headings.truncate(keep);
        }
    }
}
