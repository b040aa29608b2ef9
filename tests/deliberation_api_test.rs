// ==========================================
// 评审委员会 API 集成测试
// ==========================================
// 测试目标: 会议生命周期 / 投票 / 法定票数 / 裁定不可变 / 归档 / 纪要
// ==========================================


use academic_results::api::ApiError;
use academic_results::domain::action_log::ActionType;
use academic_results::domain::deliberation::{DeliberationCase, DeliberationSession, QuorumPolicy};
use academic_results::domain::types::{
    CaseStatus, EvaluationType, FinalVerdict, SessionStatus, StudentSituation, VoteDecision,
};
use chrono::{NaiveDate, Utc};
use test_helpers::{basic_roster, key, seed_student, setup_env, TestEnv, ACTOR, SESSION};

const PANEL: [&str; 4] = ["prof_a", "prof_b", "prof_c", "prof_d"];

fn panel() -> Vec<String> {
    PANEL.iter().map(|m| m.to_string()).collect()
}

fn active_session(env: &TestEnv, quorum: Option<QuorumPolicy>) -> DeliberationSession {
    let session = env
        .deliberation
        .create_session(
            SESSION,
            "L1",
            NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            panel(),
            quorum,
            "chair",
        )
        .unwrap();
    env.deliberation.activate_session(&session.session_id, "chair").unwrap()
}

/// 为临界学生开案 (均分 9.5)
fn open_borderline_case(env: &TestEnv, session: &DeliberationSession, student: &str) -> DeliberationCase {
    let roster = basic_roster(&[student]);
    seed_student(env, &roster, student, 9.5);
    let result = env.results.student_result(SESSION, student, &roster).unwrap();
    env.deliberation
        .open_case(&session.session_id, &result, "chair")
        .unwrap()
}

#[test]
fn test_quorum_all_blocks_finalize_until_every_member_voted() {
    let env = setup_env();
    let session = active_session(&env, Some(QuorumPolicy::All));
    let case = open_borderline_case(&env, &session, "E1");

    assert_eq!(case.status, CaseStatus::Pending);
    assert_eq!(case.snapshot.situation, StudentSituation::AtRisk);

    env.deliberation.cast_vote(&case.case_id, "prof_a", VoteDecision::Approve, None).unwrap();
    env.deliberation.cast_vote(&case.case_id, "prof_b", VoteDecision::Approve, None).unwrap();
    let after_three = env
        .deliberation
        .cast_vote(&case.case_id, "prof_c", VoteDecision::Reject, Some("assiduité"))
        .unwrap();
    assert_eq!(after_three.status, CaseStatus::Discussion);

    let decided_at = Utc::now().naive_utc();
    match env
        .deliberation
        .finalize(&case.case_id, FinalVerdict::Approved, decided_at, None, "chair")
    {
        Err(ApiError::QuorumNotMet { case_id, recorded, required }) => {
            assert_eq!(case_id, case.case_id);
            assert_eq!((recorded, required), (3, 4));
        }
        other => panic!("Expected QuorumNotMet, got {:?}", other),
    }

    env.deliberation.cast_vote(&case.case_id, "prof_d", VoteDecision::Approve, None).unwrap();
    let finalized = env
        .deliberation
        .finalize(&case.case_id, FinalVerdict::Approved, decided_at, Some("points de jury"), "chair")
        .unwrap();

    assert_eq!(finalized.status, CaseStatus::Approved);
    assert_eq!(finalized.final_decision.as_deref(), Some("APPROVED: points de jury"));
    assert_eq!(finalized.decision_date, Some(decided_at));

    // 裁定后不可变
    let late_vote = env.deliberation.cast_vote(&case.case_id, "prof_c", VoteDecision::Approve, None);
    assert!(matches!(late_vote, Err(ApiError::PreconditionFailed { .. })));
    let refinalize = env
        .deliberation
        .finalize(&case.case_id, FinalVerdict::Rejected, decided_at, None, "chair");
    assert!(matches!(refinalize, Err(ApiError::PreconditionFailed { .. })));
    assert_eq!(env.deliberation.get_case(&case.case_id).unwrap().status, CaseStatus::Approved);
}

#[test]
fn test_revote_overwrites_current_vote_and_keeps_history() {
    let env = setup_env();
    let session = active_session(&env, Some(QuorumPolicy::Count(2)));
    let case = open_borderline_case(&env, &session, "E1");

    env.deliberation.cast_vote(&case.case_id, "prof_a", VoteDecision::Reject, None).unwrap();
    let current = env
        .deliberation
        .cast_vote(&case.case_id, "prof_a", VoteDecision::Approve, Some("après discussion"))
        .unwrap();

    assert_eq!(current.votes.len(), 1);
    assert_eq!(current.votes["prof_a"].decision, VoteDecision::Approve);

    let history = env.deliberation.vote_history(&case.case_id).unwrap();
    let decisions: Vec<VoteDecision> = history.iter().map(|e| e.vote.decision).collect();
    assert_eq!(decisions, vec![VoteDecision::Reject, VoteDecision::Approve]);
    assert_eq!(history[1].seq_no, 2);

    // 重投不增加计票人数
    let result = env.deliberation.finalize(
        &case.case_id,
        FinalVerdict::Approved,
        Utc::now().naive_utc(),
        None,
        "chair",
    );
    assert!(matches!(result, Err(ApiError::QuorumNotMet { recorded: 1, required: 2, .. })));
}

#[test]
fn test_non_member_cannot_vote() {
    let env = setup_env();
    let session = active_session(&env, None);
    let case = open_borderline_case(&env, &session, "E1");

    let result = env.deliberation.cast_vote(&case.case_id, "intruder", VoteDecision::Approve, None);
    assert!(matches!(result, Err(ApiError::PreconditionFailed { .. })));
    assert!(env.deliberation.vote_history(&case.case_id).unwrap().is_empty());
}

#[test]
fn test_case_requires_active_session_and_unique_student() {
    let env = setup_env();
    let draft = env
        .deliberation
        .create_session(SESSION, "L1", NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(), panel(), None, "chair")
        .unwrap();
    assert_eq!(draft.status, SessionStatus::Draft);
    assert!(draft.config_snapshot_json.is_some());

    let roster = basic_roster(&["E1"]);
    seed_student(&env, &roster, "E1", 9.5);
    let result = env.results.student_result(SESSION, "E1", &roster).unwrap();

    let not_active = env.deliberation.open_case(&draft.session_id, &result, "chair");
    assert!(matches!(not_active, Err(ApiError::PreconditionFailed { .. })));

    let session = env.deliberation.activate_session(&draft.session_id, "chair").unwrap();
    env.deliberation.open_case(&session.session_id, &result, "chair").unwrap();
    let duplicate = env.deliberation.open_case(&session.session_id, &result, "chair");
    assert!(matches!(duplicate, Err(ApiError::PreconditionFailed { .. })));
}

#[test]
fn test_empty_panel_is_rejected() {
    let env = setup_env();
    let result = env.deliberation.create_session(
        SESSION,
        "L1",
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
        Vec::<String>::new(),
        None,
        "chair",
    );
    assert!(result.is_err());
}

#[test]
fn test_archive_requires_decided_cases_and_freezes_everything() {
    let env = setup_env();
    let session = active_session(&env, Some(QuorumPolicy::Count(1)));
    let case = open_borderline_case(&env, &session, "E1");

    let blocked = env.deliberation.archive_session(&session.session_id, "chair").unwrap_err();
    assert_eq!(blocked.failures().len(), 1);
    assert_eq!(blocked.failures()[0].target, case.case_id);

    env.deliberation.cast_vote(&case.case_id, "prof_a", VoteDecision::Reject, None).unwrap();
    env.deliberation
        .finalize(&case.case_id, FinalVerdict::Rejected, Utc::now().naive_utc(), None, "chair")
        .unwrap();

    let completed = env.deliberation.complete_session(&session.session_id, "chair").unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);
    let archived = env.deliberation.archive_session(&session.session_id, "chair").unwrap();
    assert_eq!(archived.status, SessionStatus::Archived);

    let math_key = key("E1", "MATH", EvaluationType::FinalExam);
    let case_before = env.deliberation.get_case(&case.case_id).unwrap();
    let history_before = env.deliberation.vote_history(&case.case_id).unwrap();
    let record_before = env.ledger.get_record(&math_key).unwrap();

    // 会议与案例冻结
    let vote = env
        .deliberation
        .cast_vote(&case.case_id, "prof_b", VoteDecision::Approve, Some("revote"));
    assert!(matches!(vote, Err(ApiError::SessionArchived { .. })));
    let verdict = env.deliberation.finalize(
        &case.case_id,
        FinalVerdict::Approved,
        Utc::now().naive_utc(),
        None,
        "chair",
    );
    assert!(matches!(verdict, Err(ApiError::SessionArchived { .. })));
    let note = env.deliberation.add_discussion_point(&case.case_id, "prof_a", "relecture");
    assert!(matches!(note, Err(ApiError::SessionArchived { .. })));
    let again = env.deliberation.archive_session(&session.session_id, "chair");
    assert!(matches!(again, Err(ApiError::SessionArchived { .. })));

    // 关联考试季的台账同样冻结
    let score = env.ledger.record_score(&math_key, Some(12.0), ACTOR, None);
    assert!(matches!(score, Err(ApiError::SessionArchived { .. })));

    // 拒绝后状态不变
    let case_after = env.deliberation.get_case(&case.case_id).unwrap();
    assert_eq!(case_after.status, CaseStatus::Rejected);
    assert_eq!(case_after.revision, case_before.revision);
    assert_eq!(case_after.votes.len(), 1);
    assert_eq!(case_after.votes.len(), case_before.votes.len());
    assert_eq!(case_after.final_decision, case_before.final_decision);
    assert_eq!(case_after.decision_date, case_before.decision_date);
    assert_eq!(case_after.discussion_points.len(), case_before.discussion_points.len());
    assert_eq!(
        env.deliberation.vote_history(&case.case_id).unwrap().len(),
        history_before.len()
    );

    let record_after = env.ledger.get_record(&math_key).unwrap();
    assert_eq!(record_after.score, record_before.score);
    assert_eq!(record_after.score, Some(9.5));
    assert_eq!(record_after.state, record_before.state);
    assert_eq!(record_after.revision, record_before.revision);
}

#[test]
fn test_minutes_and_audit_trail() {
    let env = setup_env();
    let session = active_session(&env, Some(QuorumPolicy::Fraction(0.5)));
    let case = open_borderline_case(&env, &session, "E1");

    env.deliberation.add_discussion_point(&case.case_id, "prof_b", "  progrès au S2  ").unwrap();
    env.deliberation.cast_vote(&case.case_id, "prof_a", VoteDecision::Approve, None).unwrap();
    env.deliberation.cast_vote(&case.case_id, "prof_b", VoteDecision::Abstain, None).unwrap();
    env.deliberation
        .finalize(&case.case_id, FinalVerdict::Approved, Utc::now().naive_utc(), None, "chair")
        .unwrap();

    let draft_minutes = env.deliberation.generate_minutes(&session.session_id).unwrap();
    assert!(!draft_minutes.is_official);
    assert_eq!(draft_minutes.attendees.len(), 4);
    assert_eq!(draft_minutes.entries.len(), 1);
    assert_eq!(draft_minutes.entries[0].tally.approve, 1);
    assert_eq!(draft_minutes.entries[0].tally.abstain, 1);
    assert_eq!(draft_minutes.entries[0].discussion_points, vec!["prof_b: progrès au S2".to_string()]);

    env.deliberation.complete_session(&session.session_id, "chair").unwrap();
    assert!(env.deliberation.generate_minutes(&session.session_id).unwrap().is_official);

    let kinds: Vec<ActionType> = env
        .action_log_repo
        .find_by_session_id(&session.session_id)
        .unwrap()
        .iter()
        .filter_map(|log| log.kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            ActionType::CreateSession,
            ActionType::ActivateSession,
            ActionType::OpenCase,
            ActionType::AddDiscussionPoint,
            ActionType::CastVote,
            ActionType::CastVote,
            ActionType::FinalizeCase,
            ActionType::CompleteSession,
        ]
    );
}
