// ==========================================
// 结果计算集成测试
// ==========================================
// 测试目标: 台账 -> 科目均分 / 淘汰 / 加权均分 / 排名 / 正式结果
// ==========================================


use academic_results::api::ApiError;
use academic_results::config::ResultsPolicy;
use academic_results::domain::roster::{RosterSnapshot, SubjectSpec};
use academic_results::domain::types::{EvaluationType, Mention, StudentSituation};
use test_helpers::{
    basic_roster, schedule_with_score, seed_student, setup_env, validate_and_lock, SESSION,
};

fn approx(a: Option<f64>, b: f64) -> bool {
    a.map(|v| (v - b).abs() < 1e-6).unwrap_or(false)
}

/// STAT: CC1 (coeff 0.4, 携带淘汰标志) + CC2 (coeff 0.2) + 期末 (coeff 0.4, 未录入)
fn stat_with_missing_exam(cc1: f64, cc2: f64) -> academic_results::domain::result::StudentResult {
    let env = setup_env();
    let stat = SubjectSpec::new("STAT", "Statistiques", 1.0);
    let roster = RosterSnapshot::new("v1", "L2")
        .with_student("E1")
        .with_subject(stat.clone());

    let mut cc1_subject = stat.clone();
    cc1_subject.is_eliminatory = true;
    schedule_with_score(&env, "E1", &cc1_subject, EvaluationType::ContinuousAssessment(1), 0.4, Some(cc1));
    schedule_with_score(&env, "E1", &stat, EvaluationType::ContinuousAssessment(2), 0.2, Some(cc2));
    schedule_with_score(&env, "E1", &stat, EvaluationType::FinalExam, 0.4, None);

    env.results.student_result(SESSION, "E1", &roster).unwrap()
}

#[test]
fn test_eliminatory_subject_with_missing_exam_eliminates_student() {
    // (6·0.4 + 7·0.2) / 0.6 = 6.33 < 8
    let result = stat_with_missing_exam(6.0, 7.0);

    let aggregate = &result.subjects[0];
    assert!(aggregate.is_eliminatory);
    assert_eq!(aggregate.scored_evaluations, 2);
    assert_eq!(aggregate.total_evaluations, 3);
    assert!(approx(aggregate.average, 6.333333));
    assert!(aggregate.below_elimination);

    assert!(result.is_eliminated);
    assert_eq!(result.eliminatory_subjects, vec!["STAT".to_string()]);
    assert_eq!(result.final_average, Some(0.0));
    assert_eq!(result.mention, Mention::Ajourne);
    assert!(!result.can_pass);
}

#[test]
fn test_missing_exam_does_not_drag_eliminatory_average_down() {
    // (12·0.4 + 10·0.2) / 0.6 = 11.33, 缺考不按 0 计
    let result = stat_with_missing_exam(12.0, 10.0);

    let aggregate = &result.subjects[0];
    assert!(approx(aggregate.average, 11.333333));
    assert!(!aggregate.below_elimination);
    assert!(!result.is_eliminated);
    assert!(result.eliminatory_subjects.is_empty());
    assert!(approx(result.final_average, 11.333333));
    assert!(result.can_pass);

    // (8·0.4 + 10·0.2) / 0.6 = 8.67 ≥ 8
    let result = stat_with_missing_exam(8.0, 10.0);
    assert!(approx(result.subjects[0].average, 8.666667));
    assert!(!result.is_eliminated);
}

#[test]
fn test_subject_missing_from_roster_is_excluded_from_weighted_average() {
    let env = setup_env();
    let roster = basic_roster(&["E1"]);
    seed_student(&env, &roster, "E1", 12.0);
    // 名册之外的科目
    let extra = SubjectSpec::new("CHEM", "Chimie", 5.0);
    schedule_with_score(&env, "E1", &extra, EvaluationType::FinalExam, 1.0, Some(2.0));

    let result = env.results.student_result(SESSION, "E1", &roster).unwrap();
    assert_eq!(result.unlisted_subjects, vec!["CHEM".to_string()]);
    assert!(approx(result.weighted_average, 12.0));
    let chem = result.subjects.iter().find(|s| s.subject_id == "CHEM").unwrap();
    assert!(!chem.in_roster);
    assert_eq!(chem.average, Some(2.0));
}

#[test]
fn test_competition_ranking_with_ties() {
    let env = setup_env();
    let roster = basic_roster(&["A", "B", "C", "D"]);
    seed_student(&env, &roster, "A", 16.0);
    seed_student(&env, &roster, "B", 14.0);
    seed_student(&env, &roster, "C", 14.0);
    seed_student(&env, &roster, "D", 11.0);

    let results = env.results.compute_session_results(SESSION, &roster).unwrap();
    let ranks: Vec<(&str, Option<u32>)> = results
        .iter()
        .map(|r| (r.student_id.as_str(), r.rank))
        .collect();

    assert_eq!(
        ranks,
        vec![("A", Some(1)), ("B", Some(2)), ("C", Some(2)), ("D", Some(4))]
    );
    assert_eq!(results[0].mention, Mention::TresBien);
    assert_eq!(results[3].mention, Mention::Passable);
}

#[test]
fn test_weighted_average_uses_subject_coefficients() {
    let env = setup_env();
    let roster = basic_roster(&["E1"]);
    let math = roster.subject("MATH").unwrap().clone();
    let phys = roster.subject("PHYS").unwrap().clone();

    schedule_with_score(&env, "E1", &math, EvaluationType::FinalExam, 1.0, Some(14.0));
    schedule_with_score(&env, "E1", &phys, EvaluationType::FinalExam, 1.0, Some(8.0));

    let result = env.results.student_result(SESSION, "E1", &roster).unwrap();

    // (14*2 + 8*1) / 3 = 12
    assert!(approx(result.weighted_average, 12.0));
    assert!(approx(result.final_average, 12.0));
    assert_eq!(result.mention, Mention::AssezBien);
    assert!(result.can_pass);
    assert_eq!(result.ects_earned, 6);
}

#[test]
fn test_student_without_scores_is_unranked() {
    let env = setup_env();
    let roster = basic_roster(&["A", "NOBODY"]);
    seed_student(&env, &roster, "A", 12.0);

    let results = env.results.compute_session_results(SESSION, &roster).unwrap();
    let nobody = results.iter().find(|r| r.student_id == "NOBODY").unwrap();

    assert_eq!(nobody.final_average, None);
    assert_eq!(nobody.rank, None);
    assert_eq!(nobody.mention, Mention::Ajourne);
    assert_eq!(results.last().unwrap().student_id, "NOBODY");
}

#[test]
fn test_official_results_require_locked_ledger() {
    let env = setup_env();
    let roster = basic_roster(&["A"]);
    let keys = seed_student(&env, &roster, "A", 12.0);

    let err = env.results.official_results(SESSION, &roster).unwrap_err();
    assert!(matches!(err, ApiError::PreconditionFailed { .. }));
    assert_eq!(err.failures().len(), keys.len());

    let counts = env.results.ledger_state_counts(SESSION).unwrap();
    assert_eq!(counts.get("DRAFT"), Some(&keys.len()));
    assert_eq!(counts.get("LOCKED"), None);

    validate_and_lock(&env, &keys);
    let counts = env.results.ledger_state_counts(SESSION).unwrap();
    assert_eq!(counts.get("LOCKED"), Some(&keys.len()));
    assert_eq!(counts.len(), 1);

    let official = env.results.official_results(SESSION, &roster).unwrap();
    assert_eq!(official.len(), 1);
    assert_eq!(official[0].rank, Some(1));
}

#[test]
fn test_policy_override_changes_pass_threshold() {
    let env = setup_env();
    let roster = basic_roster(&["A"]);
    seed_student(&env, &roster, "A", 11.0);

    let strict = ResultsPolicy {
        pass_threshold: 12.0,
        ..ResultsPolicy::default()
    };
    let default_run = env.results.compute_session_results(SESSION, &roster).unwrap();
    let strict_run = env.results.compute_with_policy(SESSION, &roster, strict).unwrap();

    assert!(default_run[0].can_pass);
    assert!(!strict_run[0].can_pass);
}

#[test]
fn test_deliberation_candidates_and_statistics() {
    let env = setup_env();
    let roster = basic_roster(&["GOOD", "BORDER", "LOW"]);
    seed_student(&env, &roster, "GOOD", 15.0);
    seed_student(&env, &roster, "BORDER", 9.5);
    seed_student(&env, &roster, "LOW", 6.0);

    let candidates = env.results.deliberation_candidates(SESSION, &roster).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].result.student_id, "BORDER");
    assert_eq!(candidates[0].situation, StudentSituation::AtRisk);

    let stats = env.results.cohort_statistics(SESSION, &roster).unwrap();
    assert_eq!(stats.student_count, 3);
    assert_eq!(stats.pass_count, 1);
    assert!(approx(stats.max_final_average, 15.0));

    // 计算不修改台账
    assert!(env.action_log_repo.find_by_action_type("ValidateBatch", 10).unwrap().is_empty());
}
