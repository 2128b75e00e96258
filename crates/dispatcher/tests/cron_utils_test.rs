#[cfg(test)]
mod cron_utils_tests {
    use scheduler_dispatcher::cron_utils::*;

    use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, s).unwrap()
    }

    #[test]
    fn test_every_fifteen_seconds() {
        let cron = CronExpression::parse("*/15 * * * * *").unwrap();
        let upcoming = cron.upcoming(at(10, 0, 1), 5).unwrap();

        let seconds: Vec<u32> = upcoming.iter().map(|t| t.second()).collect();
        assert_eq!(seconds, vec![15, 30, 45, 0, 15]);
        assert_eq!(upcoming[3], at(10, 1, 0));
    }

    #[test]
    fn test_next_is_strictly_after() {
        let cron = CronExpression::parse("0 * * * * *").unwrap();
        assert_eq!(cron.next_after(at(10, 0, 0)).unwrap(), at(10, 1, 0));
        assert!(cron.matches(at(10, 0, 0)));
        assert!(!cron.matches(at(10, 0, 1)));
    }

    #[test]
    fn test_upcoming_is_strictly_increasing() {
        let cron = CronExpression::parse("0 0,30 9-17 * * 1-5").unwrap();
        let upcoming = cron.upcoming(at(16, 45, 0), 20).unwrap();

        assert_eq!(upcoming.len(), 20);
        for pair in upcoming.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for time in &upcoming {
            assert!(cron.matches(*time));
            assert!((9..=17).contains(&time.hour()));
        }
    }

    #[test]
    fn test_day_of_month_and_month() {
        // 每年1月1日零点
        let cron = CronExpression::parse("0 0 0 1 1 *").unwrap();
        let next = cron.next_after(at(10, 0, 0)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_time_until_next() {
        let cron = CronExpression::parse("*/10 * * * * *").unwrap();
        let wait = cron.time_until_next(at(10, 0, 3)).unwrap();
        assert_eq!(wait, std::time::Duration::from_secs(7));
    }

    #[test]
    fn test_free_function_and_display() {
        let next = next_fire_time("30 * * * * *", at(10, 0, 0)).unwrap();
        assert_eq!(next, at(10, 0, 30));

        let cron: CronExpression = "0 15 10 * * *".parse().unwrap();
        assert_eq!(cron.to_string(), "0 15 10 * * *");
        assert_eq!(cron.as_str(), "0 15 10 * * *");
    }

    #[test]
    fn test_validation() {
        assert!(CronExpression::is_valid("0 0 0 * * *"));
        assert!(CronExpression::is_valid("0 */5 * * * *"));
        assert!(!CronExpression::is_valid("invalid"));
        assert!(!CronExpression::is_valid("0 0 0 32 * *"));
        assert!(!CronExpression::is_valid("* * * * *"));
        assert!(!CronExpression::is_valid(""));
    }

    #[test]
    fn test_signed_numbers_are_rejected() {
        assert!(!CronExpression::is_valid("+5 * * * * *"));
        assert!(!CronExpression::is_valid("0 +1-5 * * * *"));
        assert!(!CronExpression::is_valid("0 */+5 * * * *"));
        assert!(!CronExpression::is_valid("0 0 -1 * * *"));
        assert!(CronExpression::is_valid("05 0 0 * * *"));
    }

    #[test]
    fn test_short_horizon_gives_up() {
        // 2月30日永远不存在
        let cron = CronExpression::parse("0 0 0 30 2 *")
            .unwrap()
            .with_search_horizon(30);
        assert!(cron.next_after(at(10, 0, 0)).is_err());

        let yearly = CronExpression::parse("0 0 0 1 1 *")
            .unwrap()
            .with_search_horizon(30);
        assert!(yearly.next_after(at(10, 0, 0)).is_err());
        assert!(yearly
            .with_search_horizon(DEFAULT_SEARCH_HORIZON_DAYS)
            .next_after(at(10, 0, 0) + Duration::days(1))
            .is_ok());
    }
}
