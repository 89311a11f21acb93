use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Pool, Sqlite};

use crate::error::EngineError;

#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct Employee {
    pub id: i64,
    pub employee_id: String,
    pub device_enroll_id: Option<String>,
    pub name: Option<String>,
    pub gender: Option<String>,
    pub category: Option<String>,
    pub job_type: Option<String>,
    pub date_of_joining: Option<NaiveDate>,
    pub date_of_leaving: Option<NaiveDate>,
    /// Assigned shift name; `None` puts the employee in auto-shift mode.
    pub shift: Option<String>,
    pub first_weekly_off: Option<i64>,
    pub second_weekly_off: Option<i64>,
}

impl Employee {
    /// True when `date` lies inside the employment window. Open bounds are
    /// treated as always-covered.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        if let Some(join) = self.date_of_joining {
            if date < join {
                return false;
            }
        }
        if let Some(leave) = self.date_of_leaving {
            if date > leave {
                return false;
            }
        }
        true
    }

    /// Weekday indices (0=Monday .. 6=Sunday) this employee is off on,
    /// falling back to the configured default set when none are assigned.
    pub fn week_off_days(&self, default_week_off: &[u32]) -> Vec<u32> {
        let mut days = Vec::new();
        if let Some(first) = self.first_weekly_off {
            days.push(first as u32);
        }
        if let Some(second) = self.second_weekly_off {
            days.push(second as u32);
        }
        if days.is_empty() {
            days.extend_from_slice(default_week_off);
        }
        days
    }
}

/// Allocate the next `K<number>` employee id and matching `D<number>`
/// device-enroll id past the current maximum. Numbering starts at 10001.
pub async fn next_employee_ids(pool: &Pool<Sqlite>) -> Result<(String, String), EngineError> {
    let max_id: Option<String> =
        sqlx::query_scalar("SELECT MAX(employee_id) FROM employees WHERE employee_id LIKE 'K%'")
            .fetch_one(pool)
            .await?;

    let mut next = match max_id.and_then(|id| id[1..].parse::<i64>().ok()) {
        Some(n) => n,
        None => 10000,
    };

    loop {
        next += 1;
        let employee_id = format!("K{next}");
        let device_enroll_id = format!("D{next}");

        let taken: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM employees WHERE employee_id = ? OR device_enroll_id = ?",
        )
        .bind(&employee_id)
        .bind(&device_enroll_id)
        .fetch_one(pool)
        .await?;

        if taken == 0 {
            return Ok((employee_id, device_enroll_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Employee;
    use chrono::NaiveDate;

    fn employee() -> Employee {
        Employee {
            id: 1,
            employee_id: "K10001".to_string(),
            device_enroll_id: None,
            name: None,
            gender: None,
            category: None,
            job_type: None,
            date_of_joining: Some(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()),
            date_of_leaving: None,
            shift: None,
            first_weekly_off: None,
            second_weekly_off: None,
        }
    }

    #[test]
    fn active_window_respects_join_and_leave() {
        let mut emp = employee();
        assert!(!emp.is_active_on(NaiveDate::from_ymd_opt(2024, 1, 14).unwrap()));
        assert!(emp.is_active_on(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()));

        emp.date_of_leaving = Some(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());
        assert!(emp.is_active_on(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()));
        assert!(!emp.is_active_on(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()));
    }

    #[test]
    fn week_off_falls_back_to_default() {
        let mut emp = employee();
        assert_eq!(emp.week_off_days(&[6]), vec![6]);

        emp.first_weekly_off = Some(5);
        assert_eq!(emp.week_off_days(&[6]), vec![5]);

        emp.second_weekly_off = Some(6);
        assert_eq!(emp.week_off_days(&[0]), vec![5, 6]);
    }
}
