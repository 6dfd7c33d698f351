//! Aggregation of flattened API rows into metric tables.
//!
//! Everything here is pure: the querier fetches and flattens, these functions reduce.

use crate::error::{MetricsError, Result};
use crate::gender::NameGenderTable;
use crate::github::{ContributorRecord, PullRequestRecord};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Number of events on one calendar day.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct DailyCount {
    /// The day (UTC), serialized as YYYY-MM-DD.
    pub date: NaiveDate,
    pub count: u64,
}

/// Weekly code churn with the running total of lines.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct LinesChanged {
    pub date: NaiveDate,
    pub additions: i64,
    /// Lines removed, as a positive magnitude.
    pub deletions: i64,
    /// `additions - deletions`.
    pub delta: i64,
    /// Cumulative sum of `delta` up to and including this week.
    pub total_lines: i64,
}

/// One code frequency week after flattening, deletions still as GitHub reports them (<= 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyChurn {
    pub date: NaiveDate,
    pub additions: i64,
    pub deletions: i64,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Contributor {
    pub login: String,
    pub contributions: u64,
}

impl From<ContributorRecord> for Contributor {
    fn from(record: ContributorRecord) -> Self {
        Self {
            login: record.login,
            contributions: record.contributions,
        }
    }
}

/// How many contributors it takes to cover the threshold share of commits.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct BusFactor {
    /// Fewest contributors, taking the largest shares first.
    pub worst: usize,
    /// Fewest contributors, taking the smallest shares first.
    pub best: usize,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ContributorGender {
    pub login: String,
    /// First name used for the lookup.
    pub name: String,
    pub gender: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct CodeReview {
    pub number: u64,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub num_reviews: usize,
}

/// Truncates a timestamp to its UTC calendar day.
pub fn normalize_date(timestamp: DateTime<Utc>) -> NaiveDate {
    timestamp.date_naive()
}

/// Counts events per calendar day. Days without events are absent; rows are in date order.
pub fn count_per_day(timestamps: impl IntoIterator<Item = DateTime<Utc>>) -> Vec<DailyCount> {
    let mut counts: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for timestamp in timestamps {
        *counts.entry(normalize_date(timestamp)).or_default() += 1;
    }

    counts
        .into_iter()
        .map(|(date, count)| DailyCount { date, count })
        .collect()
}

/// Negates deletions, computes the weekly delta and its running total, in the given order.
pub fn lines_changed(weeks: impl IntoIterator<Item = WeeklyChurn>) -> Vec<LinesChanged> {
    let mut total_lines = 0;

    weeks
        .into_iter()
        .map(|week| {
            let deletions = -week.deletions;
            let delta = week.additions - deletions;
            total_lines += delta;
            LinesChanged {
                date: week.date,
                additions: week.additions,
                deletions,
                delta,
                total_lines,
            }
        })
        .collect()
}

/// Computes the bus factor from one author email per commit.
///
/// `threshold` is a percentage in `(0, 100]`. Ties between equal shares are broken by email.
pub fn bus_factor<S: AsRef<str>>(emails: &[S], threshold: f64) -> Result<BusFactor> {
    validate_threshold(threshold)?;
    if emails.is_empty() {
        return Err(MetricsError::InsufficientData(
            "bus factor needs at least one commit",
        ));
    }

    let mut commits_by_author: HashMap<&str, u64> = HashMap::new();
    for email in emails {
        *commits_by_author.entry(email.as_ref()).or_default() += 1;
    }

    let mut counts: Vec<(&str, u64)> = commits_by_author.into_iter().collect();
    // Shares are count / total, so ordering by count orders by share.
    let needed = emails.len() as f64 * threshold / 100.0;

    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let worst = contributors_to_cover(counts.iter().map(|c| c.1), needed);

    counts.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    let best = contributors_to_cover(counts.iter().map(|c| c.1), needed);

    Ok(BusFactor { worst, best })
}

/// Accepts percentages in `(0, 100]`; NaN is rejected.
pub fn validate_threshold(threshold: f64) -> Result<()> {
    if threshold > 0.0 && threshold <= 100.0 {
        Ok(())
    } else {
        Err(MetricsError::InvalidThreshold(threshold))
    }
}

/// Rank at which the cumulative commit count first reaches `needed`.
fn contributors_to_cover(counts: impl ExactSizeIterator<Item = u64>, needed: f64) -> usize {
    let len = counts.len();
    let mut cumulative = 0u64;
    for (rank, count) in counts.enumerate() {
        cumulative += count;
        if cumulative as f64 >= needed {
            return rank + 1;
        }
    }
    len
}

/// Looks up the first token of each display name in the reference table.
///
/// Contributors without a display name, or whose first name is not in the table, are dropped.
pub fn contributors_gender<'a>(
    contributors: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    table: &NameGenderTable,
) -> Vec<ContributorGender> {
    contributors
        .into_iter()
        .filter_map(|(login, display_name)| {
            let first = display_name?.split_whitespace().next()?;
            let gender = table.gender_of(first)?;
            Some(ContributorGender {
                login: login.to_string(),
                name: first.to_string(),
                gender: gender.to_string(),
            })
        })
        .collect()
}

/// Joins pull request metadata with the number of reviews each one received.
pub fn code_reviews(
    pulls: Vec<PullRequestRecord>,
    review_counts: impl IntoIterator<Item = usize>,
) -> Vec<CodeReview> {
    pulls
        .into_iter()
        .zip(review_counts)
        .map(|(pull, num_reviews)| CodeReview {
            number: pull.number,
            state: pull.state,
            created_at: pull.created_at,
            num_reviews,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_count_per_day_merges_same_day() {
        let timestamps = vec![
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap(),
        ];

        let rows = count_per_day(timestamps);

        assert_eq!(
            rows,
            vec![DailyCount {
                date: day(2024, 1, 1),
                count: 2
            }]
        );
    }

    #[test]
    fn test_count_per_day_keeps_gaps_and_sorts() {
        let timestamps = vec![
            Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 1).unwrap(),
        ];

        let rows = count_per_day(timestamps);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, day(2024, 1, 1));
        assert_eq!(rows[0].count, 1);
        assert_eq!(rows[1].date, day(2024, 1, 5));
        assert_eq!(rows[1].count, 2);
    }

    #[test]
    fn test_count_per_day_empty() {
        assert!(count_per_day(Vec::new()).is_empty());
    }

    #[test]
    fn test_lines_changed_running_total() {
        // GitHub reports deletions as negative numbers.
        let weeks = vec![
            WeeklyChurn {
                date: day(2024, 1, 7),
                additions: 10,
                deletions: -4,
            },
            WeeklyChurn {
                date: day(2024, 1, 14),
                additions: 5,
                deletions: -1,
            },
        ];

        let rows = lines_changed(weeks);

        assert_eq!(rows.iter().map(|r| r.deletions).collect::<Vec<_>>(), vec![4, 1]);
        assert_eq!(rows.iter().map(|r| r.delta).collect::<Vec<_>>(), vec![6, 4]);
        assert_eq!(
            rows.iter().map(|r| r.total_lines).collect::<Vec<_>>(),
            vec![6, 10]
        );
    }

    #[test]
    fn test_bus_factor_worst_and_best() {
        let emails = ["a", "a", "a", "b", "c"];

        let result = bus_factor(&emails, 50.0).unwrap();

        assert_eq!(result, BusFactor { worst: 1, best: 3 });
    }

    #[test]
    fn test_bus_factor_even_split() {
        let emails = ["a", "b", "c", "d"];

        assert_eq!(
            bus_factor(&emails, 50.0).unwrap(),
            BusFactor { worst: 2, best: 2 }
        );
        assert_eq!(
            bus_factor(&emails, 100.0).unwrap(),
            BusFactor { worst: 4, best: 4 }
        );
    }

    #[test]
    fn test_bus_factor_single_author() {
        let emails = ["solo@example.com"; 7];
        assert_eq!(
            bus_factor(&emails, 90.0).unwrap(),
            BusFactor { worst: 1, best: 1 }
        );
    }

    #[test]
    fn test_bus_factor_empty_history() {
        let emails: [&str; 0] = [];
        let err = bus_factor(&emails, 50.0).unwrap_err();
        assert!(matches!(err, MetricsError::InsufficientData(_)));
    }

    #[test]
    fn test_bus_factor_rejects_bad_threshold() {
        let emails = ["a"];
        for threshold in [0.0, -5.0, 100.5, f64::NAN] {
            let err = bus_factor(&emails, threshold).unwrap_err();
            assert!(matches!(err, MetricsError::InvalidThreshold(_)));
        }
    }

    #[test]
    fn test_contributors_gender_inner_join() {
        let table: NameGenderTable = [("Jane", "female")].into_iter().collect();
        let contributors = vec![
            ("jdoe", Some("Jane Doe")),
            ("xyzzy", Some("Xyzzy Unknown")),
            ("ghost", None),
            ("blank", Some("   ")),
        ];

        let rows = contributors_gender(contributors, &table);

        assert_eq!(
            rows,
            vec![ContributorGender {
                login: "jdoe".to_string(),
                name: "Jane".to_string(),
                gender: "female".to_string(),
            }]
        );
    }

    #[test]
    fn test_code_reviews_join() {
        let created_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let pulls = vec![
            PullRequestRecord {
                number: 7,
                state: "open".to_string(),
                created_at,
            },
            PullRequestRecord {
                number: 5,
                state: "open".to_string(),
                created_at,
            },
        ];

        let rows = code_reviews(pulls, vec![2, 0]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].number, 7);
        assert_eq!(rows[0].num_reviews, 2);
        assert_eq!(rows[1].number, 5);
        assert_eq!(rows[1].num_reviews, 0);
    }

    #[test]
    fn test_daily_count_serialization() {
        let json = serde_json::to_value(DailyCount {
            date: day(2024, 1, 1),
            count: 3,
        })
        .unwrap();

        assert_eq!(json["date"], "2024-01-01");
        assert_eq!(json["count"], 3);
    }
}
