//! Cache lifetime policy for fetched records.

use chrono::{DateTime, Duration, Utc};

use super::source::AiringStatus;
use crate::config::TtlConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct TtlPolicy {
    config: TtlConfig,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(TtlConfig::default())
    }
}

impl TtlPolicy {
    pub fn new(config: TtlConfig) -> Self {
        Self { config }
    }

    /// Expiry for a successfully fetched record. Records that still change
    /// expire sooner than ones that finished long ago.
    pub fn expiry_for(&self, airing: &AiringStatus, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.lifetime(airing, now)
    }

    pub fn failure_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::hours(self.config.failure_hours)
    }

    fn lifetime(&self, airing: &AiringStatus, now: DateTime<Utc>) -> Duration {
        match airing {
            AiringStatus::Airing | AiringStatus::NotYetAired => Duration::days(self.config.airing_days),
            AiringStatus::Finished {
                ended_on: Some(ended_on),
            } => {
                let recent_cutoff = now.date_naive() - Duration::days(self.config.recent_window_days);
                if *ended_on >= recent_cutoff {
                    Duration::days(self.config.recently_finished_days)
                } else {
                    Duration::days(self.config.finished_days)
                }
            }
            AiringStatus::Finished { ended_on: None } => Duration::days(self.config.finished_days),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_airing_records_expire_in_a_week() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.expiry_for(&AiringStatus::Airing, now()), now() + Duration::days(7));
        assert_eq!(
            policy.expiry_for(&AiringStatus::NotYetAired, now()),
            now() + Duration::days(7)
        );
    }

    #[test]
    fn test_finished_records_depend_on_end_date() {
        let policy = TtlPolicy::default();
        let recent = AiringStatus::Finished {
            ended_on: NaiveDate::from_ymd_opt(2025, 12, 20),
        };
        let old = AiringStatus::Finished {
            ended_on: NaiveDate::from_ymd_opt(2019, 6, 1),
        };
        let unknown = AiringStatus::Finished { ended_on: None };

        assert_eq!(policy.expiry_for(&recent, now()), now() + Duration::days(30));
        assert_eq!(policy.expiry_for(&old, now()), now() + Duration::days(90));
        assert_eq!(policy.expiry_for(&unknown, now()), now() + Duration::days(90));
    }

    #[test]
    fn test_failures_expire_quickly() {
        assert_eq!(
            TtlPolicy::default().failure_expiry(now()),
            now() + Duration::hours(24)
        );
    }
}
