use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{
  DateTime,
  Datelike,
  Duration,
  Local,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

use crate::error::EngineError;

const TIMEZONE_CONFIG_FILE: &str =
  "kira-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "KIRA_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "KIRA_TIME_CONFIG";
const CIVIL_DATE_PATTERN: &str =
  r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$";
const CIVIL_DATE_FORMAT: &str =
  "%Y-%m-%d";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Zone used to turn "now" into a civil
/// day and civil days into instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
  Local,
  Named(Tz)
}

impl Zone {
  /// Resolution order: `KIRA_TIMEZONE`,
  /// the `timezone` config value,
  /// `kira-time.toml`, then the system
  /// zone.
  #[tracing::instrument]
  pub fn resolve(
    configured: Option<&str>
  ) -> Self {
    if let Ok(raw) =
      std::env::var(TIMEZONE_ENV_VAR)
      && let Some(tz) = parse_timezone(
        &raw,
        TIMEZONE_ENV_VAR
      )
    {
      return Self::Named(tz);
    }

    if let Some(raw) = configured
      && let Some(tz) =
        parse_timezone(raw, "kirarc")
    {
      return Self::Named(tz);
    }

    if let Some(path) =
      timezone_config_path()
      && let Some(tz) =
        load_timezone_from_file(&path)
    {
      return Self::Named(tz);
    }

    tracing::debug!(
      "no timezone configured; using \
       system local zone"
    );
    Self::Local
  }

  #[must_use]
  pub fn civil_today(
    &self,
    now: DateTime<Utc>
  ) -> NaiveDate {
    match self {
      | Self::Local => {
        now.with_timezone(&Local)
          .date_naive()
      }
      | Self::Named(tz) => {
        now.with_timezone(tz)
          .date_naive()
      }
    }
  }

  /// Local midnight of `date` as a UTC
  /// instant.
  #[must_use]
  pub fn midnight_utc(
    &self,
    date: NaiveDate
  ) -> DateTime<Utc> {
    let naive =
      date.and_time(NaiveTime::MIN);
    match self {
      | Self::Local => {
        to_utc_from_local(&Local, naive)
      }
      | Self::Named(tz) => {
        to_utc_from_local(tz, naive)
      }
    }
  }

  pub fn label(&self) -> String {
    match self {
      | Self::Local => {
        "local".to_string()
      }
      | Self::Named(tz) => {
        tz.name().to_string()
      }
    }
  }
}

fn to_utc_from_local<Z: TimeZone>(
  zone: &Z,
  naive: NaiveDateTime
) -> DateTime<Utc> {
  match zone.from_local_datetime(&naive)
  {
    | LocalResult::Single(local_dt) => {
      local_dt.with_timezone(&Utc)
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        local = %naive,
        "ambiguous local midnight; \
         using earliest"
      );
      let first = first.with_timezone(&Utc);
      let second =
        second.with_timezone(&Utc);
      first.min(second)
    }
    | LocalResult::None => {
      // Midnight fell into a DST gap.
      let shifted =
        naive + Duration::hours(1);
      match zone
        .from_local_datetime(&shifted)
        .earliest()
      {
        | Some(local_dt) => {
          local_dt.with_timezone(&Utc)
        }
        | None => {
          tracing::warn!(
            local = %naive,
            "local midnight does not \
             exist; treating as UTC"
          );
          naive.and_utc()
        }
      }
    }
  }
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

fn civil_date_pattern()
-> Option<&'static Regex> {
  static PATTERN: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  PATTERN
    .get_or_init(|| {
      match Regex::new(
        CIVIL_DATE_PATTERN
      ) {
        | Ok(re) => Some(re),
        | Err(err) => {
          tracing::error!(
            error = %err,
            "internal regex compile failure"
          );
          None
        }
      }
    })
    .as_ref()
}

/// Strict `YYYY-MM-DD`. Anything else,
/// including impossible days such as
/// `2024-02-30`, is rejected rather
/// than guessed.
pub fn parse_civil_date(
  input: &str
) -> Result<NaiveDate, EngineError> {
  let invalid = || {
    EngineError::InvalidDateFormat {
      input: input.to_string()
    }
  };

  let matches = civil_date_pattern()
    .map(|re| re.is_match(input))
    .unwrap_or(false);
  if !matches {
    return Err(invalid());
  }

  let year: i32 = input[0..4]
    .parse()
    .map_err(|_| invalid())?;
  let month: u32 = input[5..7]
    .parse()
    .map_err(|_| invalid())?;
  let day: u32 = input[8..10]
    .parse()
    .map_err(|_| invalid())?;

  NaiveDate::from_ymd_opt(
    year, month, day
  )
  .ok_or_else(invalid)
}

/// Lenient form for optional record
/// fields: absent and malformed both
/// yield `None`.
pub fn parse_civil_date_opt(
  input: Option<&str>
) -> Option<NaiveDate> {
  parse_civil_date(input?).ok()
}

#[must_use]
pub fn format_civil_date(
  date: NaiveDate
) -> String {
  date
    .format(CIVIL_DATE_FORMAT)
    .to_string()
}

#[must_use]
pub fn start_of_month(
  date: NaiveDate
) -> NaiveDate {
  date.with_day(1).unwrap_or(date)
}

/// Month arithmetic on first-of-month
/// values, so Jan 31 + 1 is Feb 1.
#[must_use]
pub fn add_months(
  date: NaiveDate,
  months: i32
) -> NaiveDate {
  let first = start_of_month(date);
  let total = first.year() * 12
    + first.month0() as i32
    + months;
  let year = total.div_euclid(12);
  let month =
    total.rem_euclid(12) as u32 + 1;
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(first)
}

#[must_use]
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  date
    .checked_add_signed(Duration::days(
      days
    ))
    .unwrap_or(date)
}

/// The Sunday on or before the first of
/// `month`.
#[must_use]
pub fn month_grid_start(
  month: NaiveDate
) -> NaiveDate {
  let first = start_of_month(month);
  let back = first
    .weekday()
    .num_days_from_sunday();
  add_days(first, -i64::from(back))
}

#[must_use]
pub fn is_weekend(
  date: NaiveDate
) -> bool {
  matches!(
    date.weekday(),
    Weekday::Sat | Weekday::Sun
  )
}

/// Parses `YYYY-MM` into the first of
/// that month.
pub fn parse_month(
  input: &str
) -> Result<NaiveDate, EngineError> {
  parse_civil_date(&format!(
    "{}-01",
    input.trim()
  ))
}

pub mod civil_date_serde {
  use chrono::NaiveDate;
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    date: &NaiveDate,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &super::format_civil_date(*date)
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<NaiveDate, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    super::parse_civil_date(&raw)
      .map_err(serde::de::Error::custom)
  }

  pub mod option {
    use chrono::NaiveDate;
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      date: &Option<NaiveDate>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match date {
        | Some(value) => {
          super::serialize(
            value, serializer
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<NaiveDate>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt {
        | Some(raw) => {
          crate::datetime::parse_civil_date(&raw)
            .map(Some)
            .map_err(
              serde::de::Error::custom
            )
        }
        | None => Ok(None)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::{
    Zone,
    add_months,
    format_civil_date,
    month_grid_start,
    parse_civil_date,
    parse_month,
    start_of_month
  };

  fn ymd(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn civil_dates_round_trip() {
    let mut date = ymd(2023, 12, 25);
    for _ in 0..800 {
      let text = format_civil_date(date);
      assert_eq!(
        parse_civil_date(&text)
          .expect("round trip"),
        date
      );
      assert_eq!(
        format_civil_date(
          parse_civil_date(&text)
            .expect("parse")
        ),
        text
      );
      date = date.succ_opt().expect("next");
    }
  }

  #[test]
  fn rejects_non_strict_inputs() {
    for raw in [
      "2024-6-1",
      "2024/06/01",
      "2024-06-01T00:00:00",
      " 2024-06-01",
      "2024-02-30",
      "2024-13-01",
      "",
      "june"
    ] {
      assert!(
        parse_civil_date(raw).is_err(),
        "{raw:?} should be rejected"
      );
    }
  }

  #[test]
  fn add_months_clamps_to_first() {
    assert_eq!(
      add_months(ymd(2024, 1, 31), 1),
      ymd(2024, 2, 1)
    );
    assert_eq!(
      add_months(ymd(2024, 1, 15), -1),
      ymd(2023, 12, 1)
    );
    assert_eq!(
      add_months(ymd(2024, 11, 3), 14),
      ymd(2026, 1, 1)
    );
    assert_eq!(
      start_of_month(ymd(2024, 6, 30)),
      ymd(2024, 6, 1)
    );
  }

  #[test]
  fn grid_starts_on_sunday() {
    // June 1 2024 is a Saturday.
    assert_eq!(
      month_grid_start(ymd(2024, 6, 18)),
      ymd(2024, 5, 26)
    );
    // September 1 2024 is a Sunday.
    assert_eq!(
      month_grid_start(ymd(2024, 9, 1)),
      ymd(2024, 9, 1)
    );
  }

  #[test]
  fn parses_month_token() {
    assert_eq!(
      parse_month("2024-06")
        .expect("month"),
      ymd(2024, 6, 1)
    );
    assert!(parse_month("2024-6").is_err());
  }

  #[test]
  fn named_zone_midnight_and_today() {
    let zone =
      Zone::Named(chrono_tz::Asia::Tokyo);
    let midnight =
      zone.midnight_utc(ymd(2024, 6, 10));
    assert_eq!(
      midnight,
      Utc
        .with_ymd_and_hms(
          2024, 6, 9, 15, 0, 0
        )
        .single()
        .expect("valid instant")
    );
    assert_eq!(
      zone.civil_today(midnight),
      ymd(2024, 6, 10)
    );
  }
}
