// ==========================================
// 成绩核算与评审引擎 - 核算结果领域模型
// ==========================================
// 说明: 均为派生值,不独立持久化
// ==========================================

use crate::domain::types::{Mention, Recommendation, StudentSituation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// SubjectAggregate - 单科汇总
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectAggregate {
    pub subject_id: String,
    pub coefficient: f64,          // 科目系数 (来自名册)
    pub average: Option<f64>,      // 无有效成绩时为 None (不是 0)
    pub scored_evaluations: usize, // 参与计算的评价数
    pub total_evaluations: usize,
    pub in_roster: bool,           // 名册外科目系数为 0, 不计入加权均分
    pub is_eliminatory: bool,
    pub below_elimination: bool,   // 淘汰科目且均分低于淘汰线
}

// ==========================================
// UeResult - 教学单元结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UeResult {
    pub ue_code: String,
    pub average: Option<f64>,
    pub ects: u32,
    pub ects_earned: u32,
}

// ==========================================
// StudentResult - 学生结果 (学生 + 考试季)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentResult {
    pub student_id: String,
    pub session_id: String,
    pub subjects: Vec<SubjectAggregate>,
    pub ue_results: Vec<UeResult>,
    pub weighted_average: Option<f64>,
    pub eliminatory_subjects: Vec<String>,
    pub unlisted_subjects: Vec<String>, // 名册中不存在的科目
    pub is_eliminated: bool,
    pub final_average: Option<f64>,
    pub mention: Mention,
    pub can_pass: bool,
    pub rank: Option<u32>,         // 竞争排名; 无最终均分者不参与排名
    pub ects_earned: u32,
}

// ==========================================
// CohortStatistics - 整届统计 (导出/报表消费)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortStatistics {
    pub session_id: String,
    pub student_count: usize,
    pub scored_count: usize,
    pub pass_count: usize,
    pub eliminated_count: usize,
    pub pass_rate: f64,
    pub mean_final_average: Option<f64>,
    pub min_final_average: Option<f64>,
    pub max_final_average: Option<f64>,
    pub mention_distribution: BTreeMap<Mention, usize>,
}

// ==========================================
// DeliberationCandidate - 待评审候选
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationCandidate {
    pub result: StudentResult,
    pub situation: StudentSituation,
    pub recommendation: Recommendation,
}
