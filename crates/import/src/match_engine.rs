use examscan_core::Student;
use std::collections::HashSet;

use crate::util::levenshtein_distance;

#[derive(Debug, Clone, PartialEq)]
pub enum MatchType {
    Exact,
    /// One OCR slip away from exactly one roster number.
    Fuzzy { distance: usize },
    None,
}

#[derive(Debug, Clone)]
pub struct MatchResult<'a> {
    pub extracted_number: Option<String>,
    pub student: Option<&'a Student>,
    pub match_type: MatchType,
    pub confidence: f32,
}

/// Matches student numbers read off exam papers against the class roster.
pub struct StudentMatcher<'a> {
    roster: &'a [Student],
    pub max_distance: usize,
}

impl<'a> StudentMatcher<'a> {
    pub fn new(roster: &'a [Student]) -> Self {
        Self { roster, max_distance: 1 }
    }

    pub fn find_match(&self, extracted: Option<&str>) -> MatchResult<'a> {
        let unmatched = MatchResult {
            extracted_number: extracted.map(str::to_string),
            student: None,
            match_type: MatchType::None,
            confidence: 0.0,
        };
        let Some(number) = extracted.map(str::trim).filter(|n| !n.is_empty()) else {
            return unmatched;
        };

        if let Some(student) = self.roster.iter().find(|s| s.student_number == number) {
            return MatchResult {
                student: Some(student),
                match_type: MatchType::Exact,
                confidence: 1.0,
                ..unmatched
            };
        }

        let mut near = self
            .roster
            .iter()
            .map(|s| (s, levenshtein_distance(&s.student_number, number)))
            .filter(|(_, d)| *d <= self.max_distance);

        // Ambiguous slips are left for manual entry.
        match (near.next(), near.next()) {
            (Some((student, distance)), None) => {
                tracing::info!(
                    "Student number {number} matched {} at distance {distance}",
                    student.student_number
                );
                let len = number.chars().count().max(student.student_number.chars().count());
                MatchResult {
                    student: Some(student),
                    match_type: MatchType::Fuzzy { distance },
                    confidence: 1.0 - distance as f32 / len as f32,
                    ..unmatched
                }
            }
            (Some(_), Some(_)) => {
                tracing::warn!("Student number {number} is ambiguous within the roster");
                unmatched
            }
            _ => unmatched,
        }
    }

    /// Roster students without a processed paper, in roster order.
    pub fn unprocessed(&self, processed: &[String]) -> Vec<&'a Student> {
        unprocessed_students(self.roster, processed)
    }
}

/// Roster students whose number is not among `processed`.
pub fn unprocessed_students<'a>(roster: &'a [Student], processed: &[String]) -> Vec<&'a Student> {
    let done: HashSet<&str> = processed.iter().map(String::as_str).collect();
    roster
        .iter()
        .filter(|s| !done.contains(s.student_number.as_str()))
        .collect()
}
