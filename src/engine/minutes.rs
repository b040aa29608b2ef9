// ==========================================
// 成绩核算与评审引擎 - 评审纪要 (PV) 投影
// ==========================================
// 只读投影, 任意会议状态均可生成; 仅 Completed / Archived 为正式纪要
// ==========================================

use crate::domain::deliberation::{
    DeliberationCase, DeliberationMinutes, DeliberationSession, MinutesEntry,
};
use crate::domain::types::SessionStatus;
use chrono::NaiveDateTime;

pub struct MinutesGenerator;

impl MinutesGenerator {
    pub fn generate(
        session: &DeliberationSession,
        cases: &[DeliberationCase],
        generated_at: NaiveDateTime,
    ) -> DeliberationMinutes {
        let mut ordered: Vec<&DeliberationCase> = cases.iter().collect();
        ordered.sort_by_key(|c| c.position);

        let entries = ordered
            .into_iter()
            .map(|case| MinutesEntry {
                case_id: case.case_id.clone(),
                student_id: case.student_id.clone(),
                snapshot: case.snapshot.clone(),
                status: case.status,
                final_decision: case.final_decision.clone(),
                decision_date: case.decision_date,
                tally: case.tally(),
                discussion_points: case
                    .discussion_points
                    .iter()
                    .map(|p| format!("{}: {}", p.author, p.text))
                    .collect(),
            })
            .collect();

        DeliberationMinutes {
            session_id: session.session_id.clone(),
            promotion: session.promotion.clone(),
            session_date: session.session_date,
            status: session.status,
            attendees: session.panel_members.iter().cloned().collect(),
            quorum_policy: session.quorum_policy,
            entries,
            generated_at,
            is_official: matches!(
                session.status,
                SessionStatus::Completed | SessionStatus::Archived
            ),
        }
    }
}
