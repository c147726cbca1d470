use std::fmt;

use crate::models::{PerformanceCategory, RiskLevel, TrendDirection};

/// Grade difference beyond which a prediction counts as a change.
pub const DIRECTION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskFactor {
    VeryLowAttendance,
    BelowAverageAttendance,
    VeryLowParticipation,
    BelowAverageParticipation,
    StronglyNegativeTrend,
    DecliningGrades,
}

impl RiskFactor {
    fn is_attendance(self) -> bool {
        matches!(self, RiskFactor::VeryLowAttendance | RiskFactor::BelowAverageAttendance)
    }

    fn is_participation(self) -> bool {
        matches!(
            self,
            RiskFactor::VeryLowParticipation | RiskFactor::BelowAverageParticipation
        )
    }

    fn is_grade_trend(self) -> bool {
        matches!(self, RiskFactor::StronglyNegativeTrend | RiskFactor::DecliningGrades)
    }
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RiskFactor::VeryLowAttendance => "very low attendance",
            RiskFactor::BelowAverageAttendance => "below-average attendance",
            RiskFactor::VeryLowParticipation => "very low participation",
            RiskFactor::BelowAverageParticipation => "below-average participation",
            RiskFactor::StronglyNegativeTrend => "strongly negative grade trend",
            RiskFactor::DecliningGrades => "declining grades",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    ImproveAttendance,
    IncreaseParticipation,
    ReinforceWeakTopics,
    ScheduleTutoring,
    ReviewStudyStrategy,
    KeepItUp,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Recommendation::ImproveAttendance => "improve attendance",
            Recommendation::IncreaseParticipation => "increase participation",
            Recommendation::ReinforceWeakTopics => "reinforce weak topics",
            Recommendation::ScheduleTutoring => "schedule tutoring",
            Recommendation::ReviewStudyStrategy => "review study strategy",
            Recommendation::KeepItUp => "keep up the good work and consider extra activities",
        };
        f.write_str(text)
    }
}

pub fn trend_direction(grade_difference: f64) -> TrendDirection {
    if grade_difference > DIRECTION_THRESHOLD {
        TrendDirection::Rising
    } else if grade_difference < -DIRECTION_THRESHOLD {
        TrendDirection::Falling
    } else {
        TrendDirection::Stable
    }
}

/// Category of a prediction on the 10-point scale; lower bounds are inclusive.
pub fn performance_category(predicted: f64) -> PerformanceCategory {
    if predicted >= 8.5 {
        PerformanceCategory::Excellent
    } else if predicted >= 7.0 {
        PerformanceCategory::Good
    } else if predicted >= 5.0 {
        PerformanceCategory::Acceptable
    } else {
        PerformanceCategory::Low
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
}

impl RiskAssessment {
    fn escalate(&mut self, level: RiskLevel, factor: Option<RiskFactor>) {
        self.level = self.level.max(level);
        if let Some(factor) = factor {
            self.factors.push(factor);
        }
    }
}

/// Each signal can only raise the level, never lower it.
pub fn assess(
    attendance_rate: f64,
    participation_score: f64,
    grade_trend: f64,
    category: PerformanceCategory,
) -> RiskAssessment {
    let mut assessment = RiskAssessment {
        level: RiskLevel::Low,
        factors: Vec::new(),
    };

    if attendance_rate < 70.0 {
        assessment.escalate(RiskLevel::High, Some(RiskFactor::VeryLowAttendance));
    } else if attendance_rate < 85.0 {
        assessment.escalate(RiskLevel::Medium, Some(RiskFactor::BelowAverageAttendance));
    }

    if participation_score < 4.0 {
        assessment.escalate(RiskLevel::High, Some(RiskFactor::VeryLowParticipation));
    } else if participation_score < 6.0 {
        assessment.escalate(RiskLevel::Medium, Some(RiskFactor::BelowAverageParticipation));
    }

    if grade_trend < -0.5 {
        assessment.escalate(RiskLevel::High, Some(RiskFactor::StronglyNegativeTrend));
    } else if grade_trend < -0.2 {
        assessment.escalate(RiskLevel::Medium, Some(RiskFactor::DecliningGrades));
    }

    if category == PerformanceCategory::Low {
        assessment.escalate(RiskLevel::Medium, None);
    }

    assessment
}

/// `predicted` is on the 10-point scale.
pub fn recommendations(factors: &[RiskFactor], predicted: f64) -> Vec<Recommendation> {
    let mut advice = Vec::new();
    if factors.iter().any(|f| f.is_attendance()) {
        advice.push(Recommendation::ImproveAttendance);
    }
    if factors.iter().any(|f| f.is_participation()) {
        advice.push(Recommendation::IncreaseParticipation);
    }
    if factors.iter().any(|f| f.is_grade_trend()) {
        advice.push(Recommendation::ReinforceWeakTopics);
    }
    if predicted < 5.0 {
        advice.push(Recommendation::ScheduleTutoring);
    }
    if factors.is_empty() {
        if predicted < 7.0 {
            advice.push(Recommendation::ReviewStudyStrategy);
        } else if predicted < 9.0 {
            advice.push(Recommendation::KeepItUp);
        }
    }
    advice
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_bounds_are_inclusive_below() {
        assert_eq!(performance_category(8.5), PerformanceCategory::Excellent);
        assert_eq!(performance_category(8.4999), PerformanceCategory::Good);
        assert_eq!(performance_category(7.0), PerformanceCategory::Good);
        assert_eq!(performance_category(6.9999), PerformanceCategory::Acceptable);
        assert_eq!(performance_category(5.0), PerformanceCategory::Acceptable);
        assert_eq!(performance_category(4.9999), PerformanceCategory::Low);
    }

    #[test]
    fn risk_bands_are_inclusive_at_their_lower_edge() {
        let good = PerformanceCategory::Good;
        let at = |attendance, participation, trend| assess(attendance, participation, trend, good);

        assert_eq!(at(70.0, 8.0, 0.0).level, RiskLevel::Medium);
        assert_eq!(at(70.0, 8.0, 0.0).factors, vec![RiskFactor::BelowAverageAttendance]);
        assert_eq!(at(69.99, 8.0, 0.0).factors, vec![RiskFactor::VeryLowAttendance]);
        assert_eq!(at(69.99, 8.0, 0.0).level, RiskLevel::High);
        assert_eq!(at(85.0, 8.0, 0.0).level, RiskLevel::Low);
        assert!(at(85.0, 8.0, 0.0).factors.is_empty());

        assert_eq!(at(90.0, 4.0, 0.0).level, RiskLevel::Medium);
        assert_eq!(at(90.0, 4.0, 0.0).factors, vec![RiskFactor::BelowAverageParticipation]);
        assert_eq!(at(90.0, 3.99, 0.0).level, RiskLevel::High);
        assert_eq!(at(90.0, 3.99, 0.0).factors, vec![RiskFactor::VeryLowParticipation]);
        assert_eq!(at(90.0, 6.0, 0.0).level, RiskLevel::Low);
        assert!(at(90.0, 6.0, 0.0).factors.is_empty());

        assert_eq!(at(90.0, 8.0, -0.5).level, RiskLevel::Medium);
        assert_eq!(at(90.0, 8.0, -0.5).factors, vec![RiskFactor::DecliningGrades]);
        assert_eq!(at(90.0, 8.0, -0.51).level, RiskLevel::High);
        assert_eq!(at(90.0, 8.0, -0.51).factors, vec![RiskFactor::StronglyNegativeTrend]);
        assert_eq!(at(90.0, 8.0, -0.2).level, RiskLevel::Low);
        assert!(at(90.0, 8.0, -0.2).factors.is_empty());
    }

    #[test]
    fn direction_uses_half_point_band() {
        assert_eq!(trend_direction(0.51), TrendDirection::Rising);
        assert_eq!(trend_direction(0.5), TrendDirection::Stable);
        assert_eq!(trend_direction(-0.5), TrendDirection::Stable);
        assert_eq!(trend_direction(-0.51), TrendDirection::Falling);
    }

    #[test]
    fn high_attendance_risk_is_not_downgraded() {
        let assessment = assess(60.0, 9.0, 0.0, PerformanceCategory::Good);
        assert_eq!(assessment.level, RiskLevel::High);
        assert_eq!(assessment.factors, vec![RiskFactor::VeryLowAttendance]);
    }

    #[test]
    fn medium_signals_accumulate_factors() {
        let assessment = assess(80.0, 5.0, -0.3, PerformanceCategory::Good);
        assert_eq!(assessment.level, RiskLevel::Medium);
        assert_eq!(
            assessment.factors,
            vec![
                RiskFactor::BelowAverageAttendance,
                RiskFactor::BelowAverageParticipation,
                RiskFactor::DecliningGrades,
            ]
        );
    }

    #[test]
    fn low_category_alone_raises_to_medium() {
        let assessment = assess(95.0, 8.0, 0.0, PerformanceCategory::Low);
        assert_eq!(assessment.level, RiskLevel::Medium);
        assert!(assessment.factors.is_empty());
    }

    #[test]
    fn recommendations_follow_factors_and_level() {
        let advice = recommendations(&[RiskFactor::StronglyNegativeTrend], 4.0);
        assert_eq!(
            advice,
            vec![Recommendation::ReinforceWeakTopics, Recommendation::ScheduleTutoring]
        );
        assert_eq!(recommendations(&[], 6.0), vec![Recommendation::ReviewStudyStrategy]);
        assert_eq!(recommendations(&[], 8.0), vec![Recommendation::KeepItUp]);
        assert!(recommendations(&[], 9.5).is_empty());
        assert_eq!(Recommendation::ReinforceWeakTopics.to_string(), "reinforce weak topics");
    }
}
