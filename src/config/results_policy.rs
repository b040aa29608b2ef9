// ==========================================
// 成绩核算与评审引擎 - 核算策略参数
// ==========================================
// 职责: 定义核算/评审所需的命名参数及读取接口 (不包含实现)
// 红线: 阈值一律通过参数传入,引擎内不出现字面量
// ==========================================

use crate::domain::deliberation::QuorumPolicy;
use crate::domain::types::Mention;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;

pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// MentionThresholds - 评语等级阈值
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MentionThresholds {
    pub tres_bien: f64,
    pub bien: f64,
    pub assez_bien: f64,
    pub passable: f64,
}

impl Default for MentionThresholds {
    fn default() -> Self {
        Self {
            tres_bien: 16.0,
            bien: 14.0,
            assez_bien: 12.0,
            passable: 10.0,
        }
    }
}

impl MentionThresholds {
    /// 按阈值判定评语 (闭区间下界)
    pub fn classify(&self, average: f64) -> Mention {
        if average >= self.tres_bien {
            Mention::TresBien
        } else if average >= self.bien {
            Mention::Bien
        } else if average >= self.assez_bien {
            Mention::AssezBien
        } else if average >= self.passable {
            Mention::Passable
        } else {
            Mention::Ajourne
        }
    }

    /// 阈值必须严格递减
    pub fn is_monotonic(&self) -> bool {
        self.tres_bien > self.bien && self.bien > self.assez_bien && self.assez_bien > self.passable
    }
}

// ==========================================
// ResultsPolicy - 核算策略
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultsPolicy {
    pub score_min: f64,
    pub score_max: f64,
    pub elimination_threshold: f64,
    pub pass_threshold: f64,
    pub borderline_window: f64, // [pass - window, pass) 进入评审
    pub mentions: MentionThresholds,
    pub quorum_policy: QuorumPolicy,
}

impl Default for ResultsPolicy {
    fn default() -> Self {
        Self {
            score_min: 0.0,
            score_max: 20.0,
            elimination_threshold: 8.0,
            pass_threshold: 10.0,
            borderline_window: 1.0,
            mentions: MentionThresholds::default(),
            quorum_policy: QuorumPolicy::All,
        }
    }
}

impl ResultsPolicy {
    /// 校验参数自洽性, 返回问题描述列表
    pub fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.score_min >= self.score_max {
            problems.push(format!(
                "成绩区间无效: [{}, {}]",
                self.score_min, self.score_max
            ));
        }
        for (name, value) in [
            ("elimination_threshold", self.elimination_threshold),
            ("pass_threshold", self.pass_threshold),
        ] {
            if value < self.score_min || value > self.score_max {
                problems.push(format!("{}={} 超出成绩区间", name, value));
            }
        }
        if self.borderline_window < 0.0 {
            problems.push(format!("borderline_window={} 不能为负", self.borderline_window));
        }
        if !self.mentions.is_monotonic() {
            problems.push("评语阈值必须严格递减".to_string());
        }
        problems
    }
}

// ==========================================
// ResultsPolicyReader Trait
// ==========================================
// 实现者: ConfigManager (从 config_kv 表读取)
#[async_trait]
pub trait ResultsPolicyReader: Send + Sync {
    /// 淘汰线 (默认 8.0)
    async fn get_elimination_threshold(&self) -> ConfigResult<f64>;

    /// 及格线 (默认 10.0)
    async fn get_pass_threshold(&self) -> ConfigResult<f64>;

    /// 评审窗口宽度 (默认 1.0)
    async fn get_borderline_window(&self) -> ConfigResult<f64>;

    /// 评语阈值 (默认 16 / 14 / 12 / 10)
    async fn get_mention_thresholds(&self) -> ConfigResult<MentionThresholds>;

    /// 法定票数策略 (默认 ALL)
    async fn get_quorum_policy(&self) -> ConfigResult<QuorumPolicy>;

    /// 满分 (默认 20.0)
    async fn get_score_max(&self) -> ConfigResult<f64>;

    /// 组装完整策略; 参数不自洽时回退默认值
    async fn load_results_policy(&self) -> ConfigResult<ResultsPolicy> {
        let policy = ResultsPolicy {
            score_min: 0.0,
            score_max: self.get_score_max().await?,
            elimination_threshold: self.get_elimination_threshold().await?,
            pass_threshold: self.get_pass_threshold().await?,
            borderline_window: self.get_borderline_window().await?,
            mentions: self.get_mention_thresholds().await?,
            quorum_policy: self.get_quorum_policy().await?,
        };

        let problems = policy.check();
        if problems.is_empty() {
            Ok(policy)
        } else {
            tracing::warn!(?problems, "核算策略配置不自洽，使用默认策略");
            Ok(ResultsPolicy::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mention_classification_boundaries() {
        let t = MentionThresholds::default();
        assert_eq!(t.classify(16.0), Mention::TresBien);
        assert_eq!(t.classify(15.99), Mention::Bien);
        assert_eq!(t.classify(14.0), Mention::Bien);
        assert_eq!(t.classify(12.0), Mention::AssezBien);
        assert_eq!(t.classify(10.0), Mention::Passable);
        assert_eq!(t.classify(9.99), Mention::Ajourne);
        assert_eq!(t.classify(0.0), Mention::Ajourne);
    }

    #[test]
    fn test_default_policy_is_consistent() {
        assert!(ResultsPolicy::default().check().is_empty());

        let broken = ResultsPolicy {
            mentions: MentionThresholds {
                tres_bien: 12.0,
                bien: 14.0,
                assez_bien: 12.0,
                passable: 10.0,
            },
            pass_threshold: 25.0,
            ..ResultsPolicy::default()
        };
        assert_eq!(broken.check().len(), 2);
    }
}
