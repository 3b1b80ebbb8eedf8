use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;

use super::exam::{percentage, score_sum, Score};

/// Summary of total scores across every result of one exam.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamStatistics {
    pub count: usize,
    pub average: Decimal,
    pub max_score: Decimal,
    pub min_score: Decimal,
    /// Population standard deviation.
    pub std_dev: Decimal,
    pub median: Decimal,
}

impl ExamStatistics {
    pub fn from_totals(totals: &[Decimal]) -> Option<Self> {
        if totals.is_empty() {
            return None;
        }

        let mut sorted = totals.to_vec();
        sorted.sort();

        let count = sorted.len();
        let n = Decimal::from(count as u64);
        let sum: Decimal = sorted.iter().sum();
        let average = sum / n;

        let variance: Decimal = sorted
            .iter()
            .map(|t| (*t - average) * (*t - average))
            .sum::<Decimal>()
            / n;
        let std_dev = variance
            .to_f64()
            .map(f64::sqrt)
            .and_then(Decimal::from_f64)
            .unwrap_or(Decimal::ZERO);

        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / Decimal::TWO
        } else {
            sorted[count / 2]
        };

        Some(ExamStatistics {
            count,
            average: average.round_dp(2),
            max_score: sorted[count - 1],
            min_score: sorted[0],
            std_dev: std_dev.round_dp(2),
            median,
        })
    }
}

/// Per-question breakdown for an exam.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionStatistics {
    pub question_number: u32,
    pub max_score: Score,
    pub max_received: Score,
    pub min_received: Score,
    /// `None` when every student scored zero on the question.
    pub min_non_zero: Option<Score>,
    pub average: Decimal,
    pub success_rate: Decimal,
}

/// Analyses each question of an exam. Results with fewer scores than the
/// exam has questions simply do not contribute to the missing questions.
pub fn question_statistics(max_scores: &[Score], results: &[Vec<Score>]) -> Vec<QuestionStatistics> {
    max_scores
        .iter()
        .enumerate()
        .map(|(i, &max_score)| {
            let received: Vec<Score> = results.iter().filter_map(|r| r.get(i).copied()).collect();

            let average = if received.is_empty() {
                Decimal::ZERO
            } else {
                let sum = score_sum(&received);
                Decimal::from(sum) / Decimal::from(received.len() as u64)
            };
            let success_rate = if max_score == 0 {
                Decimal::ZERO
            } else {
                (average / Decimal::from(max_score) * Decimal::ONE_HUNDRED).round_dp(2)
            };

            QuestionStatistics {
                question_number: i as u32 + 1,
                max_score,
                max_received: received.iter().copied().max().unwrap_or(0),
                min_received: received.iter().copied().min().unwrap_or(0),
                min_non_zero: received.iter().copied().filter(|&s| s > 0).min(),
                average: average.round_dp(2),
                success_rate,
            }
        })
        .collect()
}

/// Success rate of each question for a single student.
pub fn student_success_rates(earned: &[Score], max_scores: &[Score]) -> Vec<Decimal> {
    earned
        .iter()
        .zip(max_scores)
        .map(|(&e, &m)| percentage(e, m))
        .collect()
}
