//! 分数汇总 - 业务能力层
//!
//! 纯函数：类别结果 → 总分 + 展示用的得分明细。
//! 输出顺序由分析类型定义，与类别完成的先后无关。

use crate::models::{Category, CategoryResult, CategoryStatus, ScoreBreakdown};

/// 汇总结果
#[derive(Debug, Clone, PartialEq)]
pub struct AuditSummary {
    /// 成功类别按满分加权的平均分，折算到 100；没有成功类别时为 `None`
    pub overall_score: Option<f64>,
    pub breakdown: Vec<ScoreBreakdown>,
}

/// 汇总类别结果，缺失的类别记为 `timed_out`
pub fn aggregate(expected: &[Category], results: &[CategoryResult]) -> AuditSummary {
    aggregate_with(expected, results, CategoryStatus::TimedOut, "没有收到该类别的结果")
}

/// 汇总类别结果，缺失的类别按给定状态和原因补齐
pub fn aggregate_with(
    expected: &[Category],
    results: &[CategoryResult],
    missing_status: CategoryStatus,
    missing_detail: &str,
) -> AuditSummary {
    let ordered = order_results(expected, results.to_vec(), missing_status, missing_detail);
    AuditSummary {
        overall_score: overall_score(&ordered),
        breakdown: ordered.iter().map(ScoreBreakdown::from).collect(),
    }
}

/// `Σscore / ΣmaxScore × 100`，只统计成功类别，保留两位小数
pub fn overall_score(results: &[CategoryResult]) -> Option<f64> {
    let (score, max) = results
        .iter()
        .filter(|r| r.is_ok())
        .fold((0.0, 0.0), |(s, m), r| (s + r.score, m + r.max_score));
    if max <= 0.0 {
        return None;
    }
    Some((score / max * 10_000.0).round() / 100.0)
}

/// 按期望顺序排列结果
///
/// - 不在期望集合中的结果被丢弃
/// - 同一类别只保留第一个结果
/// - 缺失的类别用 `missing_status` 补齐
pub fn order_results(
    expected: &[Category],
    mut results: Vec<CategoryResult>,
    missing_status: CategoryStatus,
    missing_detail: &str,
) -> Vec<CategoryResult> {
    expected
        .iter()
        .map(|category| {
            match results.iter().position(|r| r.category == *category) {
                Some(idx) => results.remove(idx),
                None => match missing_status {
                    CategoryStatus::Failed => {
                        CategoryResult::failed(*category, None, missing_detail)
                    }
                    _ => CategoryResult::timed_out(*category, None, missing_detail),
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoreColor;

    fn ok(category: Category, score: f64, max: f64) -> CategoryResult {
        CategoryResult::scored(category, None, score, max, vec![])
    }

    #[test]
    fn test_overall_is_max_score_weighted() {
        let results = vec![
            ok(Category::Technical, 72.0, 100.0),
            ok(Category::Content, 9.0, 10.0),
            CategoryResult::failed(Category::Meta, None, "x"),
        ];
        // (72 + 9) / (100 + 10) * 100 = 73.636...
        assert_eq!(overall_score(&results), Some(73.64));
    }

    #[test]
    fn test_overall_is_none_without_successes() {
        let results = vec![
            CategoryResult::failed(Category::Meta, None, "x"),
            CategoryResult::timed_out(Category::Content, None, "y"),
        ];
        assert_eq!(overall_score(&results), None);
        assert_eq!(overall_score(&[]), None);
    }

    #[test]
    fn test_breakdown_follows_expected_order() {
        let expected = [Category::Technical, Category::Content, Category::Meta];
        // 完成顺序与期望顺序不同
        let results = vec![
            ok(Category::Meta, 50.0, 100.0),
            ok(Category::Technical, 85.0, 100.0),
            ok(Category::Content, 65.0, 100.0),
        ];
        let summary = aggregate(&expected, &results);
        let cats: Vec<_> = summary.breakdown.iter().map(|b| b.category).collect();
        assert_eq!(cats, expected);
        let colors: Vec<_> = summary.breakdown.iter().map(|b| b.color).collect();
        assert_eq!(colors, [ScoreColor::Green, ScoreColor::Amber, ScoreColor::Red]);
        assert_eq!(summary.overall_score, Some(66.67));
    }

    #[test]
    fn test_missing_and_unexpected_categories() {
        let expected = [Category::Technical, Category::Content];
        let results = vec![
            ok(Category::Technical, 90.0, 100.0),
            ok(Category::Local, 10.0, 100.0),
        ];
        let summary = aggregate(&expected, &results);
        assert_eq!(summary.breakdown.len(), 2);
        assert_eq!(summary.breakdown[1].category, Category::Content);
        assert_eq!(summary.breakdown[1].status, CategoryStatus::TimedOut);
        assert_eq!(summary.overall_score, Some(90.0));
    }

    #[test]
    fn test_missing_categories_take_given_status() {
        let expected = [Category::Local, Category::Meta];
        let summary = aggregate_with(&expected, &[], CategoryStatus::Failed, "HTTP 404");
        assert_eq!(summary.overall_score, None);
        for item in &summary.breakdown {
            assert_eq!(item.status, CategoryStatus::Failed);
            assert_eq!(item.detail.as_deref(), Some("HTTP 404"));
            assert_eq!(item.color, ScoreColor::Red);
        }
    }

    #[test]
    fn test_duplicate_results_keep_first() {
        let expected = [Category::Content];
        let results = vec![ok(Category::Content, 40.0, 100.0), ok(Category::Content, 95.0, 100.0)];
        let ordered = order_results(&expected, results, CategoryStatus::Failed, "缺失");
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].score, 40.0);
    }

    #[test]
    fn test_missing_can_be_marked_failed() {
        let ordered = order_results(&[Category::Links], vec![], CategoryStatus::Failed, "任务异常退出");
        assert_eq!(ordered[0].status, CategoryStatus::Failed);
        assert_eq!(ordered[0].detail.as_deref(), Some("任务异常退出"));
    }
}
