use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::exam::{ExamId, GradingError};
use super::student::CourseId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutcomeId(pub i64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseOutcome {
    pub id: Option<OutcomeId>,
    pub course_id: CourseId,
    pub description: String,
}

/// Links one exam question to a course outcome with a weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOutcome {
    pub exam_id: ExamId,
    /// 1-based question number.
    pub question_number: u32,
    pub outcome_id: OutcomeId,
    pub contribution_percentage: u32,
}

impl QuestionOutcome {
    /// Validates a new mapping against the mappings already stored for the
    /// same exam. Contributions towards one outcome may not exceed 100%.
    pub fn validate(
        &self,
        question_count: usize,
        existing: &[QuestionOutcome],
    ) -> Result<(), GradingError> {
        if !(1..=100).contains(&self.contribution_percentage) {
            return Err(GradingError::Contribution(self.contribution_percentage));
        }
        if self.question_number == 0 || self.question_number as usize > question_count {
            return Err(GradingError::QuestionOutOfRange {
                question: self.question_number,
                count: question_count,
            });
        }

        let already: u32 = existing
            .iter()
            .filter(|m| m.exam_id == self.exam_id && m.outcome_id == self.outcome_id)
            .filter(|m| m.question_number != self.question_number)
            .map(|m| m.contribution_percentage)
            .sum();
        let total = already + self.contribution_percentage;
        if total > 100 {
            return Err(GradingError::ContributionOverflow(total));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionContribution {
    pub question_number: u32,
    pub contribution_percentage: u32,
    /// Question success rate weighted by the contribution.
    pub weighted_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeAchievement {
    pub outcome_id: OutcomeId,
    pub questions: Vec<QuestionContribution>,
    pub total_rate: Decimal,
}

/// Rolls per-question success rates up into outcome achievement.
///
/// `question_rates[i]` is the success rate of question `i + 1`; questions
/// missing from the slice count as 0.
pub fn outcome_achievement(
    mappings: &[QuestionOutcome],
    question_rates: &[Decimal],
) -> Vec<OutcomeAchievement> {
    let mut grouped: BTreeMap<OutcomeId, Vec<QuestionContribution>> = BTreeMap::new();

    for mapping in mappings {
        let rate = (mapping.question_number as usize)
            .checked_sub(1)
            .and_then(|i| question_rates.get(i))
            .copied()
            .unwrap_or(Decimal::ZERO);
        let weighted = (rate * Decimal::from(mapping.contribution_percentage)
            / Decimal::ONE_HUNDRED)
            .round_dp(2);
        grouped
            .entry(mapping.outcome_id)
            .or_default()
            .push(QuestionContribution {
                question_number: mapping.question_number,
                contribution_percentage: mapping.contribution_percentage,
                weighted_rate: weighted,
            });
    }

    grouped
        .into_iter()
        .map(|(outcome_id, mut questions)| {
            questions.sort_by_key(|q| q.question_number);
            let total_rate = questions.iter().map(|q| q.weighted_rate).sum();
            OutcomeAchievement { outcome_id, questions, total_rate }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(question: u32, outcome: i64, pct: u32) -> QuestionOutcome {
        QuestionOutcome {
            exam_id: ExamId(1),
            question_number: question,
            outcome_id: OutcomeId(outcome),
            contribution_percentage: pct,
        }
    }

    #[test]
    fn contribution_must_be_in_range() {
        assert_eq!(
            mapping(1, 1, 0).validate(3, &[]),
            Err(GradingError::Contribution(0))
        );
        assert_eq!(
            mapping(1, 1, 101).validate(3, &[]),
            Err(GradingError::Contribution(101))
        );
        assert!(mapping(1, 1, 100).validate(3, &[]).is_ok());
    }

    #[test]
    fn question_must_exist() {
        assert_eq!(
            mapping(4, 1, 50).validate(3, &[]),
            Err(GradingError::QuestionOutOfRange { question: 4, count: 3 })
        );
    }

    #[test]
    fn contributions_per_outcome_capped_at_100() {
        let existing = vec![mapping(1, 1, 60), mapping(2, 2, 90)];
        assert!(mapping(2, 1, 40).validate(3, &existing).is_ok());
        assert_eq!(
            mapping(3, 1, 50).validate(3, &existing),
            Err(GradingError::ContributionOverflow(110))
        );
    }

    #[test]
    fn achievement_weights_question_rates() {
        let mappings = vec![mapping(1, 1, 50), mapping(2, 1, 50), mapping(2, 2, 100)];
        let rates = vec![Decimal::from(80), Decimal::from(60)];
        let achievements = outcome_achievement(&mappings, &rates);

        assert_eq!(achievements.len(), 2);
        assert_eq!(achievements[0].outcome_id, OutcomeId(1));
        assert_eq!(achievements[0].total_rate, Decimal::from(70));
        assert_eq!(achievements[1].total_rate, Decimal::from(60));
    }

    #[test]
    fn achievement_treats_unknown_question_as_zero() {
        let achievements = outcome_achievement(&[mapping(5, 1, 100)], &[Decimal::from(50)]);
        assert_eq!(achievements[0].total_rate, Decimal::ZERO);
    }
}
