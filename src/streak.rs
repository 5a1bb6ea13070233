// Streak math over a user's distinct study dates.

use chrono::NaiveDate;
use std::collections::HashSet;

/// Count consecutive studied days ending at `today`.
///
/// Walks backward one calendar day at a time and stops at the first date
/// missing from the set, so it reports the current run only, never the
/// longest historical one. Duplicate same-day entries collapse before this
/// is called because the input is a set of distinct dates.
pub fn compute_streak(dates: &HashSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut streak = 0;
    let mut day = today;
    while dates.contains(&day) {
        streak += 1;
        day = match day.pred_opt() {
            Some(prev) => prev,
            None => break,
        };
    }
    streak
}

pub fn motivation_line(streak: u32) -> String {
    match streak {
        0 => "No streak yet. Log one session today and the counter starts.".into(),
        1 => "Day 1 is on the board. Come back tomorrow and make it two.".into(),
        2..=6 => format!("{streak} days in a row. Keep the chain going!"),
        7..=29 => format!("{streak} straight days of studying. That is real discipline."),
        _ => format!("{streak} days and counting. Nothing is stopping you now."),
    }
}
