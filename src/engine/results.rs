// ==========================================
// 成绩核算与评审引擎 - 成绩核算引擎
// ==========================================
// 职责: 科目均分 / 淘汰判定 / 加权均分 / 评语 / 竞争排名 / UE 学分 / 整届统计
// 红线: 纯函数, 无状态, 无 I/O; 数据问题不报错而是输出定义好的边界值
// 输入: 台账快照 + 名册快照 + 策略参数 (全部显式传入)
// ==========================================

use crate::config::ResultsPolicy;
use crate::domain::grade::GradeRecord;
use crate::domain::result::{
    CohortStatistics, DeliberationCandidate, StudentResult, SubjectAggregate, UeResult,
};
use crate::domain::roster::RosterSnapshot;
use crate::domain::types::{Mention, Recommendation, StudentSituation};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// 均分统一保留 6 位小数, 避免 9.9999999 之类的浮点误差影响阈值判断
fn normalize(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Σ(value·weight)/Σ(weight); 空集合或权重和为 0 时为 None
fn weighted_mean(pairs: impl IntoIterator<Item = (f64, f64)>) -> Option<f64> {
    let (sum, weight) = pairs
        .into_iter()
        .fold((0.0, 0.0), |(s, w), (value, weight)| (s + value * weight, w + weight));
    if weight > 0.0 {
        Some(normalize(sum / weight))
    } else {
        None
    }
}

// ==========================================
// ResultsCalculator
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct ResultsCalculator {
    policy: ResultsPolicy,
}

impl Default for ResultsCalculator {
    fn default() -> Self {
        Self::new(ResultsPolicy::default())
    }
}

impl ResultsCalculator {
    pub fn new(policy: ResultsPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ResultsPolicy {
        &self.policy
    }

    // ==========================================
    // 单科
    // ==========================================

    /// 计算单科汇总
    ///
    /// # 规则
    /// - 均分只取有成绩的评价: Σ(score·coeff)/Σ(coeff); 无成绩时为 None
    /// - 淘汰科目 (名册标记或任一记录标记) 以该均分判定, 均分 < 淘汰线 即淘汰;
    ///   只有一次评价有成绩时均分即该次成绩
    /// - 名册中不存在的科目系数为 0, 不进入加权均分
    pub fn subject_aggregate(
        &self,
        subject_id: &str,
        records: &[&GradeRecord],
        roster: &RosterSnapshot,
    ) -> SubjectAggregate {
        let spec = roster.subject(subject_id);
        if spec.is_none() {
            warn!(
                subject_id = subject_id,
                snapshot_version = %roster.snapshot_version,
                "名册中缺少科目, 不计入加权均分"
            );
        }
        let coefficient = spec.map(|s| s.coefficient).unwrap_or(0.0);
        let is_eliminatory =
            spec.map(|s| s.is_eliminatory).unwrap_or(false) || records.iter().any(|r| r.is_eliminatory);

        let scored: Vec<(f64, f64)> = records
            .iter()
            .filter_map(|r| r.score.map(|s| (s, r.coefficient)))
            .collect();
        let average = weighted_mean(scored.iter().copied());

        let below_elimination = is_eliminatory
            && average
                .map(|avg| avg < self.policy.elimination_threshold)
                .unwrap_or(false);

        SubjectAggregate {
            subject_id: subject_id.to_string(),
            coefficient,
            average,
            scored_evaluations: scored.len(),
            total_evaluations: records.len(),
            in_roster: spec.is_some(),
            is_eliminatory,
            below_elimination,
        }
    }

    // ==========================================
    // 单个学生
    // ==========================================

    /// 计算单个学生结果 (rank 为 None, 由 compute_session 统一排名)
    pub fn student_result(
        &self,
        session_id: &str,
        student_id: &str,
        records: &[&GradeRecord],
        roster: &RosterSnapshot,
    ) -> StudentResult {
        // 1. 按科目分组 (BTreeMap 保证输出顺序稳定)
        let mut by_subject: BTreeMap<&str, Vec<&GradeRecord>> = BTreeMap::new();
        for record in records {
            by_subject
                .entry(record.key.subject_id.as_str())
                .or_default()
                .push(*record);
        }

        let subjects: Vec<SubjectAggregate> = by_subject
            .iter()
            .map(|(subject_id, recs)| self.subject_aggregate(subject_id, recs, roster))
            .collect();

        // 2. 淘汰判定
        let eliminatory_subjects: Vec<String> = subjects
            .iter()
            .filter(|s| s.below_elimination)
            .map(|s| s.subject_id.clone())
            .collect();
        let is_eliminated = !eliminatory_subjects.is_empty();

        // 3. 加权均分 (只有名册内且有均分的科目进入分母)
        let weighted_average = weighted_mean(
            subjects
                .iter()
                .filter(|s| s.in_roster)
                .filter_map(|s| s.average.map(|avg| (avg, s.coefficient))),
        );
        let unlisted_subjects: Vec<String> = subjects
            .iter()
            .filter(|s| !s.in_roster)
            .map(|s| s.subject_id.clone())
            .collect();

        // 4. 最终均分
        let final_average = if is_eliminated {
            Some(0.0)
        } else {
            weighted_average
        };

        // 5. 评语 / 6. 是否通过
        let mention = final_average
            .map(|avg| self.policy.mentions.classify(avg))
            .unwrap_or(Mention::Ajourne);
        let can_pass = !is_eliminated
            && final_average
                .map(|avg| avg >= self.policy.pass_threshold)
                .unwrap_or(false);

        let ue_results = self.ue_results(&subjects, roster, is_eliminated);
        let ects_earned = ue_results.iter().map(|ue| ue.ects_earned).sum();

        debug!(
            session_id = session_id,
            student_id = student_id,
            ?weighted_average,
            ?final_average,
            is_eliminated,
            "学生结果计算完成"
        );

        StudentResult {
            student_id: student_id.to_string(),
            session_id: session_id.to_string(),
            subjects,
            ue_results,
            weighted_average,
            eliminatory_subjects,
            unlisted_subjects,
            is_eliminated,
            final_average,
            mention,
            can_pass,
            rank: None,
            ects_earned,
        }
    }

    /// UE 均分与学分
    ///
    /// 未淘汰且 UE 均分 ≥ 及格线时获得该 UE 全部学分
    fn ue_results(
        &self,
        subjects: &[SubjectAggregate],
        roster: &RosterSnapshot,
        is_eliminated: bool,
    ) -> Vec<UeResult> {
        let mut by_unit: BTreeMap<&str, Vec<&SubjectAggregate>> = BTreeMap::new();
        for subject in subjects {
            if let Some(ue_code) = roster
                .subject(&subject.subject_id)
                .and_then(|s| s.ue_code.as_deref())
            {
                by_unit.entry(ue_code).or_default().push(subject);
            }
        }

        by_unit
            .into_iter()
            .map(|(ue_code, members)| {
                let average = weighted_mean(
                    members
                        .iter()
                        .filter_map(|s| s.average.map(|avg| (avg, s.coefficient))),
                );
                let ects = match roster.units.get(ue_code) {
                    Some(unit) => unit.ects,
                    None => {
                        warn!(ue_code = ue_code, "名册中缺少教学单元, ECTS 按 0 处理");
                        0
                    }
                };
                let validated = !is_eliminated
                    && average
                        .map(|avg| avg >= self.policy.pass_threshold)
                        .unwrap_or(false);

                UeResult {
                    ue_code: ue_code.to_string(),
                    average,
                    ects,
                    ects_earned: if validated { ects } else { 0 },
                }
            })
            .collect()
    }

    // ==========================================
    // 整届
    // ==========================================

    /// 计算考试季全体学生结果并排名
    ///
    /// 名册中的学生即使没有任何记录也会输出 (均分为 None)
    /// 输出顺序: 排名升序, 无排名者在后, 同名次按学生ID
    pub fn compute_session(
        &self,
        session_id: &str,
        records: &[GradeRecord],
        roster: &RosterSnapshot,
    ) -> Vec<StudentResult> {
        let mut by_student: BTreeMap<&str, Vec<&GradeRecord>> = BTreeMap::new();
        for student_id in &roster.students {
            by_student.entry(student_id.as_str()).or_default();
        }
        for record in records.iter().filter(|r| r.key.session_id == session_id) {
            by_student
                .entry(record.key.student_id.as_str())
                .or_default()
                .push(record);
        }

        let mut results: Vec<StudentResult> = by_student
            .iter()
            .map(|(student_id, recs)| self.student_result(session_id, student_id, recs, roster))
            .collect();

        Self::assign_ranks(&mut results);

        results.sort_by(|a, b| {
            a.rank
                .unwrap_or(u32::MAX)
                .cmp(&b.rank.unwrap_or(u32::MAX))
                .then_with(|| a.student_id.cmp(&b.student_id))
        });

        results
    }

    /// 竞争排名: 同分同名次, 名次 = 1 + 严格高于自己的人数
    ///
    /// 无最终均分者不参与排名
    pub fn assign_ranks(results: &mut [StudentResult]) {
        let mut averages: Vec<f64> = results.iter().filter_map(|r| r.final_average).collect();
        averages.sort_by(|a, b| b.total_cmp(a));

        for result in results.iter_mut() {
            result.rank = result.final_average.map(|avg| {
                let strictly_ahead = averages.iter().take_while(|other| **other > avg).count();
                strictly_ahead as u32 + 1
            });
        }
    }

    /// 整届统计
    pub fn cohort_statistics(&self, session_id: &str, results: &[StudentResult]) -> CohortStatistics {
        let defined: Vec<f64> = results.iter().filter_map(|r| r.final_average).collect();
        let pass_count = results.iter().filter(|r| r.can_pass).count();

        let mut mention_distribution = BTreeMap::new();
        for result in results {
            *mention_distribution.entry(result.mention).or_insert(0) += 1;
        }

        let mean_final_average = if defined.is_empty() {
            None
        } else {
            Some(normalize(defined.iter().sum::<f64>() / defined.len() as f64))
        };

        CohortStatistics {
            session_id: session_id.to_string(),
            student_count: results.len(),
            scored_count: defined.len(),
            pass_count,
            eliminated_count: results.iter().filter(|r| r.is_eliminated).count(),
            pass_rate: if results.is_empty() {
                0.0
            } else {
                pass_count as f64 / results.len() as f64
            },
            mean_final_average,
            min_final_average: defined.iter().copied().reduce(f64::min),
            max_final_average: defined.iter().copied().reduce(f64::max),
            mention_distribution,
        }
    }

    // ==========================================
    // 评审候选
    // ==========================================

    /// 判定学生处境与评审建议
    pub fn classify(&self, result: &StudentResult) -> (StudentSituation, Recommendation) {
        if result.is_eliminated {
            return (StudentSituation::Eliminated, Recommendation::Resit);
        }
        match result.final_average {
            None => (StudentSituation::Incomplete, Recommendation::PanelReview),
            Some(avg) if avg >= self.policy.pass_threshold => {
                (StudentSituation::Validated, Recommendation::Admit)
            }
            Some(avg) if avg >= self.policy.pass_threshold - self.policy.borderline_window => {
                (StudentSituation::AtRisk, Recommendation::PanelReview)
            }
            Some(_) => (StudentSituation::Resit, Recommendation::Resit),
        }
    }

    /// 筛选待评审候选: 被淘汰者, 以及最终均分在 [及格线 - 窗口, 及格线) 的学生
    pub fn deliberation_candidates(&self, results: &[StudentResult]) -> Vec<DeliberationCandidate> {
        results
            .iter()
            .filter_map(|result| {
                let (situation, recommendation) = self.classify(result);
                matches!(situation, StudentSituation::Eliminated | StudentSituation::AtRisk).then(
                    || DeliberationCandidate {
                        result: result.clone(),
                        situation,
                        recommendation,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::grade::GradeKey;
    use crate::domain::roster::{SubjectSpec, TeachingUnit};
    use crate::domain::types::EvaluationType;
    use chrono::Utc;

    fn record(
        student: &str,
        subject: &str,
        eval: EvaluationType,
        coeff: f64,
        score: Option<f64>,
    ) -> GradeRecord {
        let mut r = GradeRecord::scheduled(
            GradeKey::new("S1", student, subject, eval),
            coeff,
            false,
            Utc::now().naive_utc(),
        );
        r.score = score;
        if score.is_some() {
            r.issues.clear();
        }
        r
    }

    fn exam(student: &str, subject: &str, score: f64) -> GradeRecord {
        record(student, subject, EvaluationType::FinalExam, 1.0, Some(score))
    }

    fn roster() -> RosterSnapshot {
        RosterSnapshot::new("R1", "L2")
            .with_subject(SubjectSpec::new("STAT", "Statistiques", 2.0).eliminatory().in_unit("UE1"))
            .with_subject(SubjectSpec::new("ALGO", "Algorithmique", 3.0).in_unit("UE1"))
            .with_subject(SubjectSpec::new("ENG", "Anglais", 1.0).in_unit("UE2"))
            .with_unit(TeachingUnit { ue_code: "UE1".into(), name: "Fondamentaux".into(), ects: 6 })
            .with_unit(TeachingUnit { ue_code: "UE2".into(), name: "Langues".into(), ects: 2 })
    }

    #[test]
    fn test_subject_average_ignores_missing_scores() {
        let calc = ResultsCalculator::default();
        let a = record("E1", "ALGO", EvaluationType::ContinuousAssessment(1), 0.4, Some(12.0));
        let b = record("E1", "ALGO", EvaluationType::FinalExam, 0.6, None);

        let agg = calc.subject_aggregate("ALGO", &[&a, &b], &roster());
        assert_eq!(agg.average, Some(12.0));
        assert_eq!(agg.scored_evaluations, 1);
        assert_eq!(agg.total_evaluations, 2);
        assert!(!agg.below_elimination);
    }

    #[test]
    fn test_subject_without_scores_has_no_average() {
        let calc = ResultsCalculator::default();
        let a = record("E1", "STAT", EvaluationType::FinalExam, 1.0, None);
        let agg = calc.subject_aggregate("STAT", &[&a], &roster());
        assert_eq!(agg.average, None);
        assert!(!agg.below_elimination);
    }

    #[test]
    fn test_elimination_uses_scored_average() {
        let calc = ResultsCalculator::default();
        let cc1 = record("E1", "STAT", EvaluationType::ContinuousAssessment(1), 0.4, Some(12.0));
        let cc2 = record("E1", "STAT", EvaluationType::ContinuousAssessment(2), 0.2, Some(10.0));
        let exam = record("E1", "STAT", EvaluationType::FinalExam, 0.4, None);

        let agg = calc.subject_aggregate("STAT", &[&cc1, &cc2, &exam], &roster());
        assert_eq!(agg.average, Some(11.333333));
        assert!(agg.is_eliminatory);
        assert!(!agg.below_elimination);

        let low = record("E1", "STAT", EvaluationType::ContinuousAssessment(1), 0.4, Some(7.0));
        let agg = calc.subject_aggregate("STAT", &[&low, &exam], &roster());
        assert_eq!(agg.average, Some(7.0));
        assert!(agg.below_elimination);
    }

    #[test]
    fn test_unlisted_subject_is_flagged_not_weighted() {
        let calc = ResultsCalculator::default();
        let recs = vec![exam("E1", "ALGO", 12.0), exam("E1", "GHOST", 0.0)];
        let refs: Vec<&GradeRecord> = recs.iter().collect();

        let result = calc.student_result("S1", "E1", &refs, &roster());
        assert_eq!(result.weighted_average, Some(12.0));
        assert_eq!(result.unlisted_subjects, vec!["GHOST".to_string()]);
        assert!(result.ue_results.iter().all(|ue| ue.ue_code != "GHOST"));
    }

    #[test]
    fn test_weighted_average_uses_subject_coefficients() {
        let calc = ResultsCalculator::default();
        // ALGO 16 (coeff 3), ENG 8 (coeff 1), STAT 无成绩
        let recs = vec![exam("E1", "ALGO", 16.0), exam("E1", "ENG", 8.0)];
        let refs: Vec<&GradeRecord> = recs.iter().collect();

        let result = calc.student_result("S1", "E1", &refs, &roster());
        assert_eq!(result.weighted_average, Some(14.0));
        assert_eq!(result.final_average, Some(14.0));
        assert_eq!(result.mention, Mention::Bien);
        assert!(result.can_pass);
    }

    #[test]
    fn test_elimination_dominates() {
        let calc = ResultsCalculator::default();
        let recs = vec![exam("E1", "STAT", 7.5), exam("E1", "ALGO", 20.0), exam("E1", "ENG", 20.0)];
        let refs: Vec<&GradeRecord> = recs.iter().collect();

        let result = calc.student_result("S1", "E1", &refs, &roster());
        assert!(result.is_eliminated);
        assert_eq!(result.eliminatory_subjects, vec!["STAT".to_string()]);
        assert_eq!(result.final_average, Some(0.0));
        assert_eq!(result.mention, Mention::Ajourne);
        assert!(!result.can_pass);
        assert_eq!(result.ects_earned, 0);
    }

    #[test]
    fn test_elimination_threshold_is_configurable() {
        let policy = ResultsPolicy {
            elimination_threshold: 7.0,
            ..ResultsPolicy::default()
        };
        let calc = ResultsCalculator::new(policy);
        let recs = vec![exam("E1", "STAT", 7.5)];
        let refs: Vec<&GradeRecord> = recs.iter().collect();

        assert!(!calc.student_result("S1", "E1", &refs, &roster()).is_eliminated);
    }

    #[test]
    fn test_no_scores_is_defined_edge_case() {
        let calc = ResultsCalculator::default();
        let results = calc.compute_session("S1", &[], &roster().with_student("E9"));

        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.weighted_average, None);
        assert_eq!(r.final_average, None);
        assert_eq!(r.mention, Mention::Ajourne);
        assert!(!r.can_pass);
        assert_eq!(r.rank, None);
    }

    #[test]
    fn test_competition_ranking() {
        let calc = ResultsCalculator::default();
        let recs = vec![
            exam("A", "ALGO", 16.0),
            exam("B", "ALGO", 14.0),
            exam("C", "ALGO", 14.0),
            exam("D", "ALGO", 11.0),
        ];

        let results = calc.compute_session("S1", &recs, &roster());
        let ranks: Vec<(&str, Option<u32>)> =
            results.iter().map(|r| (r.student_id.as_str(), r.rank)).collect();
        assert_eq!(
            ranks,
            vec![("A", Some(1)), ("B", Some(2)), ("C", Some(2)), ("D", Some(4))]
        );
    }

    #[test]
    fn test_ue_ects() {
        let calc = ResultsCalculator::default();
        // UE1: STAT 9 (coeff 2) + ALGO 12 (coeff 3) → 10.8; UE2: ENG 9
        let recs = vec![exam("E1", "STAT", 9.0), exam("E1", "ALGO", 12.0), exam("E1", "ENG", 9.0)];
        let refs: Vec<&GradeRecord> = recs.iter().collect();

        let result = calc.student_result("S1", "E1", &refs, &roster());
        assert_eq!(result.ue_results.len(), 2);
        assert_eq!(result.ue_results[0].average, Some(10.8));
        assert_eq!(result.ue_results[0].ects_earned, 6);
        assert_eq!(result.ue_results[1].ects_earned, 0);
        assert_eq!(result.ects_earned, 6);
    }

    #[test]
    fn test_candidates_and_statistics() {
        let calc = ResultsCalculator::default();
        let recs = vec![
            exam("A", "ALGO", 15.0),
            exam("B", "ALGO", 9.5),
            exam("C", "ALGO", 6.0),
            exam("D", "STAT", 5.0),
        ];
        let results = calc.compute_session("S1", &recs, &roster());

        let candidates = calc.deliberation_candidates(&results);
        let ids: Vec<&str> = candidates.iter().map(|c| c.result.student_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "D"]);
        assert_eq!(candidates[0].situation, StudentSituation::AtRisk);
        assert_eq!(candidates[1].situation, StudentSituation::Eliminated);

        let stats = calc.cohort_statistics("S1", &results);
        assert_eq!(stats.student_count, 4);
        assert_eq!(stats.pass_count, 1);
        assert_eq!(stats.eliminated_count, 1);
        assert_eq!(stats.pass_rate, 0.25);
        assert_eq!(stats.max_final_average, Some(15.0));
        assert_eq!(stats.min_final_average, Some(0.0));
        assert_eq!(stats.mention_distribution.get(&Mention::Ajourne), Some(&3));
    }
}
