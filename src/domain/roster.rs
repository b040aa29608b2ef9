// ==========================================
// 成绩核算与评审引擎 - 名册/课程快照
// ==========================================
// 来源: 外部名册/课程目录系统 (只读参考数据)
// 红线: 以显式注入的版本化快照传入计算器,不读全局状态
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// SubjectSpec - 科目参考数据
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectSpec {
    pub subject_id: String,
    pub name: String,
    pub coefficient: f64,        // 科目系数
    pub is_eliminatory: bool,    // 科目级淘汰标志
    pub ue_code: Option<String>, // 所属教学单元
}

// ==========================================
// TeachingUnit - 教学单元 (UE)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeachingUnit {
    pub ue_code: String,
    pub name: String,
    pub ects: u32, // 学分
}

// ==========================================
// RosterSnapshot - 名册快照
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub snapshot_version: String,
    pub promotion: String,                         // 年级/班级
    pub students: Vec<String>,                     // 学生ID (整届名单, 排名口径)
    pub subjects: BTreeMap<String, SubjectSpec>,   // subject_id -> 科目
    pub units: BTreeMap<String, TeachingUnit>,     // ue_code -> 教学单元
}

impl RosterSnapshot {
    pub fn new(snapshot_version: impl Into<String>, promotion: impl Into<String>) -> Self {
        Self {
            snapshot_version: snapshot_version.into(),
            promotion: promotion.into(),
            ..Default::default()
        }
    }

    pub fn with_student(mut self, student_id: impl Into<String>) -> Self {
        self.students.push(student_id.into());
        self
    }

    pub fn with_subject(mut self, subject: SubjectSpec) -> Self {
        self.subjects.insert(subject.subject_id.clone(), subject);
        self
    }

    pub fn with_unit(mut self, unit: TeachingUnit) -> Self {
        self.units.insert(unit.ue_code.clone(), unit);
        self
    }

    pub fn subject(&self, subject_id: &str) -> Option<&SubjectSpec> {
        self.subjects.get(subject_id)
    }
}

impl SubjectSpec {
    pub fn new(subject_id: impl Into<String>, name: impl Into<String>, coefficient: f64) -> Self {
        Self {
            subject_id: subject_id.into(),
            name: name.into(),
            coefficient,
            is_eliminatory: false,
            ue_code: None,
        }
    }

    pub fn eliminatory(mut self) -> Self {
        self.is_eliminatory = true;
        self
    }

    pub fn in_unit(mut self, ue_code: impl Into<String>) -> Self {
        self.ue_code = Some(ue_code.into());
        self
    }
}
