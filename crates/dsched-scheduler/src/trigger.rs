//! Time triggers: cron fields or a fixed interval.
//!
//! Cron fields are rendered into a 6-field expression (seconds pinned to 0)
//! that both the `cron` crate and the trigger engine accept. Next-fire
//! computation is read-only and never fails loudly.

use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};

use crate::SchedulerError;

/// Significance order, most significant first, with the value a field takes
/// when a more significant field was given but it was not.
const CRON_FIELDS: [(&str, &str); 5] = [
    ("month", "1"),
    ("day", "1"),
    ("day_of_week", "*"),
    ("hour", "0"),
    ("minute", "0"),
];

const WEEKDAYS: [&str; 7] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Float slack allowed when unit fractions sum to a whole second.
const SUBSECOND_TOLERANCE: f64 = 1e-6;

const INTERVAL_UNITS: [(&str, u64); 5] = [
    ("seconds", 1),
    ("minutes", 60),
    ("hours", 3_600),
    ("days", 86_400),
    ("weeks", 604_800),
];

#[derive(Debug, Clone)]
pub enum Trigger {
    Cron {
        expression: String,
        schedule: cron::Schedule,
        timezone: Tz,
    },
    Interval {
        every: Duration,
    },
}

impl Trigger {
    /// Build a trigger from its kind (`cron` or `interval`) and raw fields.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidTrigger`] for an unknown kind or bad
    /// fields, [`SchedulerError::InvalidCron`] if the rendered expression
    /// does not parse.
    pub fn from_kind(
        kind: &str,
        fields: &Map<String, Value>,
        timezone: Tz,
    ) -> Result<Self, SchedulerError> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "cron" => Self::cron(fields, timezone),
            "interval" => Self::interval(fields),
            other => Err(SchedulerError::InvalidTrigger(format!(
                "unknown trigger kind '{other}'; expected 'cron' or 'interval'"
            ))),
        }
    }

    /// # Errors
    ///
    /// See [`Trigger::from_kind`].
    pub fn cron(fields: &Map<String, Value>, timezone: Tz) -> Result<Self, SchedulerError> {
        let expression = cron_expression(fields)?;
        let schedule = cron::Schedule::from_str(&expression)
            .map_err(|e| SchedulerError::InvalidCron(format!("'{expression}': {e}")))?;
        Ok(Trigger::Cron {
            expression,
            schedule,
            timezone,
        })
    }

    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidTrigger`] for unknown keys,
    /// non-numeric or negative values, a zero total, or a total that is not
    /// a whole number of seconds. Fractional units are fine as long as they
    /// add up to whole seconds (`minutes: 0.5`).
    pub fn interval(fields: &Map<String, Value>) -> Result<Self, SchedulerError> {
        let mut total_secs = 0.0_f64;
        for (key, value) in fields {
            let Some((_, unit)) = INTERVAL_UNITS.iter().find(|(name, _)| name == key) else {
                return Err(SchedulerError::InvalidTrigger(format!(
                    "unknown interval field '{key}'"
                )));
            };
            let amount = value
                .as_f64()
                .filter(|n| n.is_finite() && *n >= 0.0)
                .ok_or_else(|| {
                    SchedulerError::InvalidTrigger(format!(
                        "interval field '{key}' must be a non-negative number, got {value}"
                    ))
                })?;
            #[allow(clippy::cast_precision_loss)]
            let unit = *unit as f64;
            total_secs += amount * unit;
        }

        // the engine repeats on whole seconds only
        let whole_secs = total_secs.round();
        if (total_secs - whole_secs).abs() > SUBSECOND_TOLERANCE {
            return Err(SchedulerError::InvalidTrigger(format!(
                "interval must be a whole number of seconds, got {total_secs}s"
            )));
        }
        if whole_secs < 1.0 {
            return Err(SchedulerError::InvalidTrigger(
                "interval must be greater than zero".to_string(),
            ));
        }
        #[allow(clippy::cast_precision_loss)]
        let ceiling = u64::MAX as f64;
        if whole_secs >= ceiling {
            return Err(SchedulerError::InvalidTrigger(
                "interval out of range".to_string(),
            ));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let every = Duration::from_secs(whole_secs as u64);
        Ok(Trigger::Interval { every })
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Cron { .. } => "cron",
            Trigger::Interval { .. } => "interval",
        }
    }

    /// First fire time strictly after `now`.
    ///
    /// Interval triggers fire at `anchor + k * every` for `k >= 1`.
    #[must_use]
    pub fn next_fire_after(
        &self,
        now: DateTime<Utc>,
        anchor: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron {
                schedule, timezone, ..
            } => schedule
                .after(&now.with_timezone(timezone))
                .next()
                .map(|t| t.with_timezone(&Utc)),
            Trigger::Interval { every } => {
                let step = chrono::Duration::from_std(*every).ok()?;
                let step_ms = step.num_milliseconds();
                if step_ms <= 0 {
                    return None;
                }
                let first = anchor.checked_add_signed(step)?;
                if first > now {
                    return Some(first);
                }
                let behind_ms = (now - first).num_milliseconds();
                let skipped = behind_ms / step_ms + 1;
                first.checked_add_signed(chrono::Duration::milliseconds(
                    skipped.checked_mul(step_ms)?,
                ))
            }
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Trigger::Cron {
                expression,
                timezone,
                ..
            } => format!("cron[{expression} {}]", timezone.name()),
            Trigger::Interval { every } => format!("interval[{}]", format_interval(*every)),
        }
    }
}

fn cron_expression(fields: &Map<String, Value>) -> Result<String, SchedulerError> {
    let mut given: Vec<(&str, String)> = Vec::new();
    for (key, value) in fields {
        let name = match key.as_str() {
            "dayOfWeek" => "day_of_week",
            other => other,
        };
        if !CRON_FIELDS.iter().any(|(field, _)| *field == name) {
            return Err(SchedulerError::InvalidTrigger(format!(
                "unknown cron field '{key}'"
            )));
        }
        let mut rendered = render_field(key, value)?;
        if name == "day_of_week" {
            rendered = normalize_day_of_week(&rendered)?;
        }
        given.push((name, rendered));
    }

    let least_significant = CRON_FIELDS
        .iter()
        .rposition(|(field, _)| given.iter().any(|(name, _)| name == field));

    let resolved: Vec<String> = CRON_FIELDS
        .iter()
        .enumerate()
        .map(|(idx, (field, minimum))| {
            if let Some((_, value)) = given.iter().find(|(name, _)| name == field) {
                value.clone()
            } else if least_significant.is_some_and(|last| idx > last) {
                (*minimum).to_string()
            } else {
                "*".to_string()
            }
        })
        .collect();

    // month day dow hour minute -> sec minute hour day month dow
    Ok(format!(
        "0 {} {} {} {} {}",
        resolved[4], resolved[3], resolved[1], resolved[0], resolved[2]
    ))
}

fn render_field(key: &str, value: &Value) -> Result<String, SchedulerError> {
    let rendered = match value {
        Value::Number(n) if n.is_u64() => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => {
            return Err(SchedulerError::InvalidTrigger(format!(
                "cron field '{key}' must be a non-negative integer or string, got {other}"
            )))
        }
    };
    if rendered.is_empty() || rendered.contains(char::is_whitespace) {
        return Err(SchedulerError::InvalidTrigger(format!(
            "cron field '{key}' has invalid value '{rendered}'"
        )));
    }
    Ok(rendered)
}

/// Rewrite numeric weekdays (0 = Monday) to names so every cron parser
/// agrees on their meaning.
fn normalize_day_of_week(raw: &str) -> Result<String, SchedulerError> {
    let parts = raw
        .split(',')
        .map(|part| {
            let (base, step) = match part.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (part, None),
            };
            let base = if base == "*" {
                base.to_string()
            } else {
                base.split('-')
                    .map(weekday_name)
                    .collect::<Result<Vec<_>, _>>()?
                    .join("-")
            };
            Ok(match step {
                Some(step) => format!("{base}/{step}"),
                None => base,
            })
        })
        .collect::<Result<Vec<_>, SchedulerError>>()?;
    Ok(parts.join(","))
}

fn weekday_name(token: &str) -> Result<String, SchedulerError> {
    if let Ok(n) = token.parse::<usize>() {
        return WEEKDAYS
            .get(n)
            .map(|name| (*name).to_string())
            .ok_or_else(|| {
                SchedulerError::InvalidTrigger(format!(
                    "day_of_week {n} out of range; expected 0 (Mon) to 6 (Sun)"
                ))
            });
    }
    let upper = token.to_ascii_uppercase();
    if WEEKDAYS.iter().any(|name| upper.starts_with(name)) {
        Ok(upper[..3].to_string())
    } else {
        Err(SchedulerError::InvalidTrigger(format!(
            "unknown day_of_week '{token}'"
        )))
    }
}

fn format_interval(every: Duration) -> String {
    let total = every.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut out = String::new();
    if days > 0 {
        let _ = write!(out, "{days}d ");
    }
    let _ = write!(out, "{hours}:{minutes:02}:{seconds:02}");
    out
}
