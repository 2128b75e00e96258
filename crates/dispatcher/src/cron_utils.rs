use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use tracing::warn;

use scheduler_core::{SchedulerError, SchedulerResult};

/// 默认搜索窗口（约5年）
pub const DEFAULT_SEARCH_HORIZON_DAYS: u32 = 1830;

/// 字段定义：名称与取值范围
#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
}

const SECOND: FieldSpec = FieldSpec { name: "second", min: 0, max: 59 };
const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12 };
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 6 };

/// 单个字段的取值集合，按位存储（所有字段最大值都小于64）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ValueSet(u64);

impl ValueSet {
    fn range(start: u32, end: u32) -> Self {
        Self((start..=end).fold(0, |bits, v| bits | (1 << v)))
    }

    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }

    fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    fn divisible_by(self, step: u32) -> Self {
        Self(
            (0..64)
                .filter(|v| self.contains(*v) && v % step == 0)
                .fold(0, |bits, v| bits | (1 << v)),
        )
    }

    fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// 六字段CRON表达式：秒 分 时 日 月 周（0=周日）
///
/// 支持 `*`、逗号列表、`a-b` 范围以及 `x/step` 步长。步长作用于字段值本身：
/// `x/step` 保留 `x` 所产生集合中能被 `step` 整除的值。
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use scheduler_dispatcher::cron_utils::CronExpression;
///
/// let cron = CronExpression::parse("*/15 * * * * *").unwrap();
/// let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 7).unwrap();
/// let next = cron.next_after(after).unwrap();
/// assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 15).unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    seconds: ValueSet,
    minutes: ValueSet,
    hours: ValueSet,
    days_of_month: ValueSet,
    months: ValueSet,
    days_of_week: ValueSet,
    search_horizon_days: u32,
}

impl CronExpression {
    /// 解析CRON表达式
    pub fn parse(expression: &str) -> SchedulerResult<Self> {
        let invalid = |message: String| SchedulerError::InvalidCron {
            expr: expression.to_string(),
            message,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(invalid(format!(
                "expected 6 fields (second minute hour day-of-month month day-of-week), got {}",
                fields.len()
            )));
        }

        let specs = [SECOND, MINUTE, HOUR, DAY_OF_MONTH, MONTH, DAY_OF_WEEK];
        let mut sets = [ValueSet(0); 6];
        for (i, (token, spec)) in fields.iter().zip(specs).enumerate() {
            let set = parse_field(token, spec).map_err(&invalid)?;
            if set.is_empty() {
                return Err(invalid(format!("{} field '{token}' matches no value", spec.name)));
            }
            sets[i] = set;
        }

        Ok(Self {
            source: fields.join(" "),
            seconds: sets[0],
            minutes: sets[1],
            hours: sets[2],
            days_of_month: sets[3],
            months: sets[4],
            days_of_week: sets[5],
            search_horizon_days: DEFAULT_SEARCH_HORIZON_DAYS,
        })
    }

    /// 验证CRON表达式是否有效
    pub fn is_valid(expression: &str) -> bool {
        Self::parse(expression).is_ok()
    }

    /// 设置搜索窗口，超过窗口仍未找到触发时间则返回 `CronSearchExhausted`
    pub fn with_search_horizon(mut self, days: u32) -> Self {
        self.search_horizon_days = days.max(1);
        self
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 给定时间是否匹配表达式（精确到秒）
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.months.contains(at.month())
            && self.days_of_month.contains(at.day())
            && self.days_of_week.contains(at.weekday().num_days_from_sunday())
            && self.hours.contains(at.hour())
            && self.minutes.contains(at.minute())
            && self.seconds.contains(at.second())
    }

    /// 计算严格晚于 `after` 的下一次触发时间
    pub fn next_after(&self, after: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>> {
        let exhausted = || SchedulerError::CronSearchExhausted {
            expr: self.source.clone(),
        };

        let base = after.naive_utc().with_nanosecond(0).ok_or_else(exhausted)?;
        let limit = base + Duration::days(i64::from(self.search_horizon_days));
        let mut t = base + Duration::seconds(1);

        loop {
            if t > limit {
                warn!(cron = %self.source, after = %after, "no fire time within search horizon");
                return Err(exhausted());
            }

            if !self.months.contains(t.month()) {
                t = start_of_next_month(t).ok_or_else(exhausted)?;
                continue;
            }
            if !self.days_of_month.contains(t.day())
                || !self.days_of_week.contains(t.weekday().num_days_from_sunday())
            {
                t = start_of_next_day(t).ok_or_else(exhausted)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = truncate(t, t.hour(), 0, 0).ok_or_else(exhausted)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t = truncate(t, t.hour(), t.minute(), 0).ok_or_else(exhausted)?
                    + Duration::minutes(1);
                continue;
            }
            if !self.seconds.contains(t.second()) {
                t += Duration::seconds(1);
                continue;
            }
            return Ok(t.and_utc());
        }
    }

    /// 获取接下来的 `count` 个触发时间
    pub fn upcoming(
        &self,
        after: DateTime<Utc>,
        count: usize,
    ) -> SchedulerResult<Vec<DateTime<Utc>>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = after;
        for _ in 0..count {
            cursor = self.next_after(cursor)?;
            times.push(cursor);
        }
        Ok(times)
    }

    /// 距离下一次触发的时长
    pub fn time_until_next(&self, now: DateTime<Utc>) -> SchedulerResult<std::time::Duration> {
        let next = self.next_after(now)?;
        Ok((next - now).to_std().unwrap_or(std::time::Duration::ZERO))
    }
}

impl FromStr for CronExpression {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// 解析表达式并计算下一次触发时间
pub fn next_fire_time(expression: &str, after: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>> {
    CronExpression::parse(expression)?.next_after(after)
}

fn parse_field(token: &str, spec: FieldSpec) -> Result<ValueSet, String> {
    if token.contains(',') {
        return token.split(',').try_fold(ValueSet(0), |acc, part| {
            if part.is_empty() {
                return Err(format!("{} field '{token}' has an empty list item", spec.name));
            }
            Ok(acc.union(parse_field(part, spec)?))
        });
    }

    if let Some((base, step)) = token.split_once('/') {
        let base = parse_field(base, spec)?;
        let step: u32 = digits(step)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| format!("{} field has invalid step '{step}'", spec.name))?;
        if step == 0 || step > spec.max {
            return Err(format!(
                "{} field step {step} must be between 1 and {}",
                spec.name, spec.max
            ));
        }
        return Ok(base.divisible_by(step));
    }

    if token == "*" {
        return Ok(ValueSet::range(spec.min, spec.max));
    }

    if let Some((start, end)) = token.split_once('-') {
        let start = parse_value(start, spec)?;
        let end = parse_value(end, spec)?;
        if start > end {
            return Err(format!("{} field range {start}-{end} is reversed", spec.name));
        }
        return Ok(ValueSet::range(start, end));
    }

    parse_value(token, spec).map(|v| ValueSet::range(v, v))
}

fn parse_value(text: &str, spec: FieldSpec) -> Result<u32, String> {
    let value: u32 = digits(text)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("{} field has invalid value '{text}'", spec.name))?;
    if value < spec.min || value > spec.max {
        return Err(format!(
            "{} value {value} out of range {}-{}",
            spec.name, spec.min, spec.max
        ));
    }
    Ok(value)
}

/// `u32::from_str` 接受前导 `+`，这里只允许纯数字
fn digits(text: &str) -> Option<&str> {
    (!text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())).then_some(text)
}

fn truncate(t: NaiveDateTime, hour: u32, minute: u32, second: u32) -> Option<NaiveDateTime> {
    t.date().and_hms_opt(hour, minute, second)
}

fn start_of_next_day(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().succ_opt()?.and_hms_opt(0, 0, 0)
}

fn start_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}
