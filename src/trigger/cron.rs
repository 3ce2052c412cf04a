/// Cron expression evaluation
///
/// Thin wrapper over the `cron` crate. Expressions are evaluated in UTC so the
/// schedule does not depend on the host timezone.
///
/// Accepted shapes:
/// - 5 fields: `min hour day month weekday` (seconds implied `0`)
/// - 6 fields: `sec min hour day month weekday`
/// - 7 fields: `sec min hour day month weekday year`

use crate::error::CronError;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Bring a 5-field expression up to the seconds-first form the `cron` crate expects
///
/// Crontab numbers weekdays 0-7 with Sunday as 0 and 7; the `cron` crate uses
/// 1 (Sunday) to 7 (Saturday), so numeric day-of-week values are shifted.
fn normalize_expression(expression: &str) -> String {
    let trimmed = expression.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, day, month, weekday] => {
            format!("0 {minute} {hour} {day} {month} {}", shift_weekdays(weekday))
        }
        _ => trimmed.to_string(),
    }
}

/// Rewrite a crontab day-of-week field into `cron` crate numbering
///
/// Names and anything unparseable are left for the parser to judge.
fn shift_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(shift_weekday_item)
        .collect::<Vec<_>>()
        .join(",")
}

fn shift_weekday_item(item: &str) -> String {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step)),
        None => (item, None),
    };
    let step = match step.map(str::parse::<u32>) {
        None => 1,
        Some(Ok(step)) if step > 0 => step,
        Some(_) => return item.to_string(),
    };

    let bounds = match base.split_once('-') {
        Some((start, end)) => start.parse::<u32>().ok().zip(end.parse::<u32>().ok()),
        // "n/step" runs to the end of the week
        None if item.contains('/') => base.parse::<u32>().ok().map(|start| (start, 7)),
        None => base.parse::<u32>().ok().map(|day| (day, day)),
    };
    let Some((start, end)) = bounds.filter(|(start, end)| start <= end && *end <= 7) else {
        return item.to_string();
    };

    // Sunday is both 0 and 7 in crontab and 1 in the cron crate
    let mut days: Vec<u32> = (start..=end).step_by(step as usize).map(|day| day % 7 + 1).collect();
    days.sort_unstable();
    days.dedup();
    days.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

/// Parse an expression into a schedule
pub fn parse(expression: &str) -> Result<Schedule, CronError> {
    if expression.trim().is_empty() {
        return Err(CronError::InvalidExpression {
            expression: expression.to_string(),
            message: "expression is empty".to_string(),
        });
    }

    Schedule::from_str(&normalize_expression(expression)).map_err(|e| {
        CronError::InvalidExpression {
            expression: expression.to_string(),
            message: e.to_string(),
        }
    })
}

/// Whether the expression parses; never fails
pub fn is_valid(expression: &str) -> bool {
    parse(expression).is_ok()
}

/// Next fire instant strictly after `from`
pub fn next_occurrence(expression: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
    let schedule = parse(expression)?;
    schedule
        .after(&from)
        .find(|candidate| *candidate > from)
        .ok_or_else(|| CronError::NoUpcoming {
            expression: expression.to_string(),
        })
}
