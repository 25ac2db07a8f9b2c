use chrono::{DateTime, NaiveTime, TimeDelta, Utc};

/// 毎日決まった UTC 時刻に発火するケイデンス。
#[derive(Debug, Clone, Copy)]
pub(crate) struct DailyCadence {
    target: NaiveTime,
}

impl DailyCadence {
    pub(crate) fn utc(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|target| Self { target })
    }

    pub(crate) fn next_run_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.target).and_utc();
        if now > today {
            today + TimeDelta::days(1)
        } else {
            today
        }
    }
}
