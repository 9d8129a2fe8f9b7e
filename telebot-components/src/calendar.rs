//! Inline calendar keyboard for picking a date.
//!
//! Button payloads are [`CalendarCallbackPayload`] dumps such as `select_y2022_m9_d17`; the
//! caller wraps them into its own callback data.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, Month, NaiveDate};
use telebot_core::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::error::{ComponentError, ComponentResult};
use crate::utils::fill_placeholders;

pub const WEEKDAY_NAMES_EN: [&str; 7] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];
pub const WEEKDAY_NAMES_RU: [&str; 7] = ["Пн", "Вт", "Ср", "Чт", "Пт", "Сб", "Вс"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarAction {
    Noop,
    Select,
    Update,
}

impl CalendarAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Select => "select",
            Self::Update => "update",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarCallbackPayload {
    pub action: CalendarAction,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl CalendarCallbackPayload {
    pub fn noop() -> Self {
        Self {
            action: CalendarAction::Noop,
            year: None,
            month: None,
            day: None,
        }
    }

    pub fn select(date: NaiveDate) -> Self {
        Self {
            action: CalendarAction::Select,
            year: Some(date.year()),
            month: Some(date.month()),
            day: Some(date.day()),
        }
    }

    pub fn update(year: i32, month: u32) -> Self {
        Self {
            action: CalendarAction::Update,
            year: Some(year),
            month: Some(month),
            day: None,
        }
    }

    /// SELECT needs the full date, UPDATE needs year and month.
    pub fn validate(&self) -> ComponentResult<()> {
        let complete = match self.action {
            CalendarAction::Noop => true,
            CalendarAction::Select => self.year.is_some() && self.month.is_some() && self.day.is_some(),
            CalendarAction::Update => self.year.is_some() && self.month.is_some(),
        };
        if complete {
            Ok(())
        } else {
            Err(ComponentError::CallbackData(format!("incomplete calendar payload: {:?}", self)))
        }
    }

    /// The selected date for SELECT payloads.
    pub fn date(&self) -> Option<NaiveDate> {
        match (self.action, self.year, self.month, self.day) {
            (CalendarAction::Select, Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d),
            _ => None,
        }
    }

    pub fn dump(&self) -> String {
        self.to_string()
    }

    pub fn load(dump: &str) -> ComponentResult<Self> {
        dump.parse()
    }
}

impl fmt::Display for CalendarCallbackPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action.as_str())?;
        if let Some(year) = self.year {
            write!(f, "_y{}", year)?;
        }
        if let Some(month) = self.month {
            write!(f, "_m{}", month)?;
        }
        if let Some(day) = self.day {
            write!(f, "_d{}", day)?;
        }
        Ok(())
    }
}

impl FromStr for CalendarCallbackPayload {
    type Err = ComponentError;

    fn from_str(dump: &str) -> Result<Self, Self::Err> {
        let corrupted = || ComponentError::CallbackData(format!("corrupted calendar payload: {:?}", dump));
        let mut parts = dump.split('_');
        let action = match parts.next() {
            Some("noop") => CalendarAction::Noop,
            Some("select") => CalendarAction::Select,
            Some("update") => CalendarAction::Update,
            _ => return Err(corrupted()),
        };
        let mut payload = Self {
            action,
            ..Self::noop()
        };
        for part in parts {
            let (tag, value) = part.split_at(part.chars().next().map_or(0, char::len_utf8));
            match tag {
                "y" => payload.year = Some(value.parse().map_err(|_| corrupted())?),
                "m" => payload.month = Some(value.parse().map_err(|_| corrupted())?),
                "d" => payload.day = Some(value.parse().map_err(|_| corrupted())?),
                _ => return Err(corrupted()),
            }
        }
        payload.validate()?;
        Ok(payload)
    }
}

#[derive(Debug, Clone)]
pub struct CalendarKeyboardConfig {
    pub prev_month_button: String,
    pub next_month_button: String,
    pub weekday_names: [String; 7],
    /// Past days of the current month are blank and there is no way back from it.
    pub future_only: bool,
    /// `{}` is replaced with the day number.
    pub today_template: String,
    pub selected_template: String,
}

impl Default for CalendarKeyboardConfig {
    fn default() -> Self {
        Self {
            prev_month_button: "<".to_string(),
            next_month_button: ">".to_string(),
            weekday_names: WEEKDAY_NAMES_EN.map(str::to_string),
            future_only: true,
            today_template: "[{}]".to_string(),
            selected_template: "✅ {}".to_string(),
        }
    }
}

fn month_name(month: u32) -> &'static str {
    u8::try_from(month)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .map_or("", |m| m.name())
}

/// Monday-first weeks of the month; `None` marks days of adjacent months.
fn month_weeks(first: NaiveDate) -> Vec<[Option<u32>; 7]> {
    let offset = first.weekday().num_days_from_monday() as usize;
    let days_in_month = (1..=31u32)
        .rev()
        .find(|d| first.with_day(*d).is_some())
        .unwrap_or(28);
    let mut weeks = Vec::new();
    let mut week = [None; 7];
    let mut slot = offset;
    for day in 1..=days_in_month {
        week[slot] = Some(day);
        slot += 1;
        if slot == 7 {
            weeks.push(week);
            week = [None; 7];
            slot = 0;
        }
    }
    if slot > 0 {
        weeks.push(week);
    }
    weeks
}

/// Month view with day buttons and prev/next navigation. `year`/`month` default to today's.
/// `new_callback_data` wraps a payload dump into the caller's callback data.
pub fn calendar_keyboard(
    year: Option<i32>,
    month: Option<u32>,
    new_callback_data: impl Fn(&str) -> ComponentResult<String>,
    config: &CalendarKeyboardConfig,
    selected_date: Option<NaiveDate>,
    today: NaiveDate,
) -> ComponentResult<InlineKeyboardMarkup> {
    let year = year.unwrap_or(today.year());
    let month = month.unwrap_or(today.month());
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ComponentError::Other(format!("invalid calendar month: {}-{}", year, month)))?;
    let is_current_month = year == today.year() && month == today.month();

    let button = |label: String, payload: CalendarCallbackPayload| -> ComponentResult<InlineKeyboardButton> {
        Ok(InlineKeyboardButton::callback(label, new_callback_data(&payload.dump())?))
    };
    let noop = |label: &str| button(label.to_string(), CalendarCallbackPayload::noop());

    let mut rows = vec![
        vec![noop(format!("{} {}", month_name(month), year).as_str())?],
        config
            .weekday_names
            .iter()
            .map(|name| noop(name.as_str()))
            .collect::<ComponentResult<Vec<_>>>()?,
    ];

    for week in month_weeks(first) {
        let mut row = Vec::with_capacity(7);
        let mut week_has_buttons = false;
        for day in week {
            let day = day.filter(|d| !(config.future_only && is_current_month && *d < today.day()));
            let Some(day) = day else {
                row.push(noop(" ")?);
                continue;
            };
            week_has_buttons = true;
            let date = first.with_day(day).unwrap_or(first);
            let label = if selected_date == Some(date) {
                fill_placeholders(&config.selected_template, &[&day])
            } else if date == today {
                fill_placeholders(&config.today_template, &[&day])
            } else {
                day.to_string()
            };
            row.push(button(label, CalendarCallbackPayload::select(date))?);
        }
        if week_has_buttons {
            rows.push(row);
        }
    }

    let mid_month = first.with_day(15).unwrap_or(first);
    let prev_button = if config.future_only && is_current_month {
        noop(" ")?
    } else {
        let prev = mid_month - Duration::days(32);
        button(
            config.prev_month_button.clone(),
            CalendarCallbackPayload::update(prev.year(), prev.month()),
        )?
    };
    let next = mid_month + Duration::days(32);
    let next_button = button(
        config.next_month_button.clone(),
        CalendarCallbackPayload::update(next.year(), next.month()),
    )?;
    rows.push(vec![prev_button, next_button]);
    Ok(InlineKeyboardMarkup::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(payload: &str) -> ComponentResult<String> {
        Ok(format!("form:{}", payload))
    }

    #[test]
    fn test_payload_dump_and_load() {
        let payload = CalendarCallbackPayload::select(NaiveDate::from_ymd_opt(2022, 9, 17).unwrap());
        assert_eq!(payload.dump(), "select_y2022_m9_d17");
        assert_eq!(CalendarCallbackPayload::load("select_y2022_m9_d17").unwrap(), payload);
        assert_eq!(CalendarCallbackPayload::noop().dump(), "noop");
        assert_eq!(CalendarCallbackPayload::update(2023, 1).dump(), "update_y2023_m1");
    }

    #[test]
    fn test_payload_validation() {
        assert!(CalendarCallbackPayload::load("select_y2022_m9").is_err());
        assert!(CalendarCallbackPayload::load("update_y2022").is_err());
        assert!(CalendarCallbackPayload::load("jump_y2022_m9").is_err());
        assert!(CalendarCallbackPayload::load("update_y2022_mX").is_err());
        assert!(CalendarCallbackPayload::load("update_y2022_m9_q1").is_err());
    }

    #[test]
    fn test_future_only_current_month() {
        // 2022-09-01 is a Thursday
        let today = NaiveDate::from_ymd_opt(2022, 9, 17).unwrap();
        let markup =
            calendar_keyboard(None, None, wrap, &CalendarKeyboardConfig::default(), None, today).unwrap();
        let texts = markup.texts();
        assert_eq!(texts[0], vec!["September 2022"]);
        assert_eq!(texts[1], vec!["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"]);
        // weeks fully in the past are dropped, the week of the 17th is the first one left
        assert_eq!(texts[2], vec![" ", " ", " ", " ", " ", "[17]", "18"]);
        assert_eq!(texts.last().unwrap(), &vec![" ", ">"]);
        let next = markup.inline_keyboard.last().unwrap()[1].callback_data.clone();
        assert_eq!(next.as_deref(), Some("form:update_y2022_m10"));
    }

    #[test]
    fn test_other_month_with_selection() {
        let today = NaiveDate::from_ymd_opt(2022, 9, 17).unwrap();
        let selected = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let markup = calendar_keyboard(
            Some(2023),
            Some(1),
            wrap,
            &CalendarKeyboardConfig::default(),
            Some(selected),
            today,
        )
        .unwrap();
        let texts = markup.texts();
        // 2023-01-01 is a Sunday
        assert_eq!(texts[2], vec![" ", " ", " ", " ", " ", " ", "1"]);
        assert_eq!(texts[3][0], "✅ 2");
        assert_eq!(texts.len(), 2 + 6 + 1);
        let nav = markup.inline_keyboard.last().unwrap();
        assert_eq!(nav[0].callback_data.as_deref(), Some("form:update_y2022_m12"));
        assert_eq!(nav[1].callback_data.as_deref(), Some("form:update_y2023_m2"));
        let select = markup.inline_keyboard[3][0].callback_data.clone();
        assert_eq!(select.as_deref(), Some("form:select_y2023_m1_d2"));
    }

    #[test]
    fn test_month_weeks() {
        let weeks = month_weeks(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(weeks.len(), 5);
        assert_eq!(weeks[0], [None, None, None, Some(1), Some(2), Some(3), Some(4)]);
        assert_eq!(weeks[4], [Some(26), Some(27), Some(28), Some(29), None, None, None]);
    }
}
