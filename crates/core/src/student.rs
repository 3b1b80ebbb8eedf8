use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudentId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LecturerId(pub i64);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Digits 3–5 of a student number encode the department.
const CENG_DEPARTMENT_CODE: &str = "253";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Department {
    Ceng,
    Other,
}

impl Department {
    pub fn from_student_number(number: &str) -> Self {
        match number.get(2..5) {
            Some(code) if code == CENG_DEPARTMENT_CODE => Department::Ceng,
            _ => Department::Other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Department::Ceng => "Bilgisayar Mühendisliği",
            Department::Other => "Diğer",
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Department::Ceng => write!(f, "CENG"),
            Department::Other => write!(f, "OTHER"),
        }
    }
}

impl std::str::FromStr for Department {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CENG" => Ok(Department::Ceng),
            "OTHER" => Ok(Department::Other),
            other => Err(format!("Unknown department: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: Option<StudentId>,
    pub student_number: String,
    pub full_name: String,
    pub department: Department,
}

impl Student {
    pub fn new(student_number: &str, full_name: &str) -> Self {
        let student_number = student_number.trim();
        Student {
            id: None,
            student_number: student_number.to_string(),
            full_name: full_name.trim().to_string(),
            department: Department::from_student_number(student_number),
        }
    }
}

impl fmt::Display for Student {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.student_number, self.full_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: Option<CourseId>,
    pub code: String,
    pub name: String,
    pub lecturer_id: Option<LecturerId>,
}

impl Course {
    pub fn new(code: &str, name: &str) -> Self {
        Course {
            id: None,
            code: code.trim().to_string(),
            name: name.trim().to_string(),
            lecturer_id: None,
        }
    }
}

impl fmt::Display for Course {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lecturer {
    pub id: Option<LecturerId>,
    pub username: String,
    pub full_name: String,
}

/// Audit-log actions recorded for a lecturer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserAction {
    Login,
    Logout,
    ExamUpload,
    ExamProcess,
    StudentAdd,
    OutcomeAdd,
    ViewReport,
    ExamResultManual,
    ExamDelete,
    OutcomeDelete,
    Error,
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserAction::Login => write!(f, "LOGIN"),
            UserAction::Logout => write!(f, "LOGOUT"),
            UserAction::ExamUpload => write!(f, "EXAM_UPLOAD"),
            UserAction::ExamProcess => write!(f, "EXAM_PROCESS"),
            UserAction::StudentAdd => write!(f, "STUDENT_ADD"),
            UserAction::OutcomeAdd => write!(f, "OUTCOME_ADD"),
            UserAction::ViewReport => write!(f, "VIEW_REPORT"),
            UserAction::ExamResultManual => write!(f, "EXAM_RESULT_MANUAL"),
            UserAction::ExamDelete => write!(f, "EXAM_DELETE"),
            UserAction::OutcomeDelete => write!(f, "OUTCOME_DELETE"),
            UserAction::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for UserAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOGIN" => Ok(UserAction::Login),
            "LOGOUT" => Ok(UserAction::Logout),
            "EXAM_UPLOAD" => Ok(UserAction::ExamUpload),
            "EXAM_PROCESS" => Ok(UserAction::ExamProcess),
            "STUDENT_ADD" => Ok(UserAction::StudentAdd),
            "OUTCOME_ADD" => Ok(UserAction::OutcomeAdd),
            "VIEW_REPORT" => Ok(UserAction::ViewReport),
            "EXAM_RESULT_MANUAL" => Ok(UserAction::ExamResultManual),
            "EXAM_DELETE" => Ok(UserAction::ExamDelete),
            "OUTCOME_DELETE" => Ok(UserAction::OutcomeDelete),
            "ERROR" => Ok(UserAction::Error),
            other => Err(format!("Unknown user action: '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn department_from_student_number() {
        assert_eq!(Department::from_student_number("21253501"), Department::Ceng);
        assert_eq!(Department::from_student_number("21111501"), Department::Other);
        // Too short to carry a department code.
        assert_eq!(Department::from_student_number("212"), Department::Other);
    }

    #[test]
    fn student_new_trims_and_derives_department() {
        let s = Student::new(" 22253010 ", " Ayşe Yılmaz ");
        assert_eq!(s.student_number, "22253010");
        assert_eq!(s.full_name, "Ayşe Yılmaz");
        assert_eq!(s.department, Department::Ceng);
        assert_eq!(s.to_string(), "22253010 - Ayşe Yılmaz");
    }

    #[test]
    fn non_ascii_prefix_does_not_panic() {
        assert_eq!(Department::from_student_number("ğü253"), Department::Other);
    }

    #[test]
    fn user_action_roundtrip() {
        for action in [
            UserAction::Login,
            UserAction::ExamProcess,
            UserAction::ExamResultManual,
            UserAction::ExamDelete,
            UserAction::Error,
        ] {
            assert_eq!(UserAction::from_str(&action.to_string()).unwrap(), action);
        }
        assert!(UserAction::from_str("DELETE").is_err());
    }
}
