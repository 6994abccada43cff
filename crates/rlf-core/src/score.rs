//! Fixed-weight lead scoring.

use chrono::NaiveDate;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 10;
const BASE_SCORE: i32 = 5;

/// Price-tier score: base 5, +3 above 500k, +2 above 350k, +1 above 250k,
/// clamped to `1..=10`. A missing value leaves the base untouched.
pub fn score_lead(value: Option<i64>) -> u8 {
    let bump = match value {
        Some(v) if v > 500_000 => 3,
        Some(v) if v > 350_000 => 2,
        Some(v) if v > 250_000 => 1,
        _ => 0,
    };
    clamp_score(BASE_SCORE + bump)
}

/// Permit follow-up priority: base 5 plus type, job value and filing recency
/// bonuses, capped at 10. The type bonus checks roof, then residential, then
/// repair/replacement.
pub fn permit_priority(permit_type: &str, value: Option<i64>, date_filed: Option<NaiveDate>, today: NaiveDate) -> u8 {
    let kind = permit_type.to_lowercase();
    let mut score = BASE_SCORE;

    if kind.contains("roof") {
        score += 4;
    } else if kind.contains("residential") {
        score += 2;
    } else if kind.contains("repair") || kind.contains("replacement") {
        score += 3;
    }

    score += match value {
        Some(v) if v > 20_000 => 3,
        Some(v) if v > 10_000 => 2,
        Some(v) if v > 5_000 => 1,
        _ => 0,
    };

    if let Some(filed) = date_filed {
        let age = (today - filed).num_days();
        if age <= 30 {
            score += 2;
        } else if age <= 90 {
            score += 1;
        }
    }

    clamp_score(score)
}

fn clamp_score(score: i32) -> u8 {
    score.clamp(MIN_SCORE as i32, MAX_SCORE as i32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_tiers() {
        assert_eq!(score_lead(None), 5);
        assert_eq!(score_lead(Some(200_000)), 5);
        assert_eq!(score_lead(Some(250_001)), 6);
        assert_eq!(score_lead(Some(350_001)), 7);
        assert_eq!(score_lead(Some(500_000)), 7);
        assert_eq!(score_lead(Some(500_001)), 8);
    }

    #[test]
    fn score_never_leaves_range() {
        for value in [None, Some(-1), Some(0), Some(50_000_000), Some(i64::MAX)] {
            let score = score_lead(value);
            assert!((MIN_SCORE..=MAX_SCORE).contains(&score), "{value:?} -> {score}");
        }
    }

    #[test]
    fn recent_roof_permit_is_capped() {
        let today = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let filed = NaiveDate::from_ymd_opt(2026, 3, 20);
        assert_eq!(permit_priority("Residential Re-Roof", Some(24_000), filed, today), 10);
    }

    #[test]
    fn stale_small_permit_stays_near_base() {
        let today = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let filed = NaiveDate::from_ymd_opt(2025, 6, 1);
        assert_eq!(permit_priority("Fence", Some(3_000), filed, today), 5);
        assert_eq!(permit_priority("Foundation Repair", Some(7_500), None, today), 9);
        let sixty_days = NaiveDate::from_ymd_opt(2026, 2, 1);
        assert_eq!(permit_priority("Residential Addition", None, sixty_days, today), 8);
    }
}
