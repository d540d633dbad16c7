#[cfg(test)]
mod cron_utils_tests {
    use taskq_dispatcher::cron_utils::*;

    use chrono::{TimeZone, Timelike, Utc};

    #[test]
    fn test_cron_scheduler_creation() {
        assert!(CronScheduler::new("0 0 0 * * *").is_ok());
        assert!(CronScheduler::new("*/5 * * * *").is_ok());
        assert!(CronScheduler::new("@hourly").is_ok());
        assert!(CronScheduler::new("invalid").is_err());
    }

    #[test]
    fn test_normalize_five_field_expression() {
        assert_eq!(CronScheduler::normalize("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(CronScheduler::normalize("  0   9 * * * "), "0 0 9 * * *");
        assert_eq!(CronScheduler::normalize("30 0 9 * * *"), "30 0 9 * * *");
        assert_eq!(CronScheduler::normalize("@daily"), "@daily");
    }

    #[test]
    fn test_five_field_fires_on_minute_boundary() {
        let scheduler = CronScheduler::new("*/15 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 7, 12).unwrap();
        let next = scheduler.next_execution_time(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 12, 15, 0).unwrap());
    }

    #[test]
    fn test_next_execution_time_is_strictly_after() {
        let scheduler = CronScheduler::new("0 0 * * * *").unwrap();
        let on_the_hour = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = scheduler.next_execution_time(on_the_hour).unwrap();
        assert_eq!(next.hour(), 13);
    }

    #[test]
    fn test_validate_cron_expression() {
        assert!(CronScheduler::validate_cron_expression("0 0 0 * * *").is_ok());
        assert!(CronScheduler::validate_cron_expression("0 */5 * * * *").is_ok());
        assert!(CronScheduler::validate_cron_expression("0 9-17 * * Mon-Fri").is_ok());
        assert!(CronScheduler::validate_cron_expression("invalid").is_err());
        assert!(CronScheduler::validate_cron_expression("0 0 0 32 * *").is_err());
        assert!(CronScheduler::validate_cron_expression("").is_err());

        let err = CronScheduler::validate_cron_expression("61 * * * *").unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_upcoming_times() {
        let scheduler = CronScheduler::new("0 * * * *").unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        let upcoming = scheduler.upcoming_times(now, 3);

        assert_eq!(upcoming.len(), 3);
        assert_eq!(upcoming[0].hour(), 13);
        assert_eq!(upcoming[1].hour(), 14);
        assert_eq!(upcoming[2].hour(), 15);
    }

    #[test]
    fn test_occurrences_between() {
        let scheduler = CronScheduler::new("* * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 1, 12, 10, 0).unwrap();
        assert_eq!(scheduler.occurrences_between(from, to, 100), 10);
        assert_eq!(scheduler.occurrences_between(from, to, 3), 3);
        assert_eq!(scheduler.occurrences_between(to, from, 100), 0);
    }

    #[test]
    fn test_time_until_next_execution() {
        let scheduler = CronScheduler::new("0 0 * * * *").unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        let duration = scheduler.time_until_next_execution(now).unwrap();
        assert_eq!(duration.num_minutes(), 30); // 距离下一个整点还有30分钟
    }
}
