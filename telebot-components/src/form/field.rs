//! Form fields: what is asked, how the answer is parsed and where the form goes next.

use chrono::{Datelike, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::CalendarKeyboardConfig;
use crate::error::ComponentResult;
use crate::language::{AnyText, LanguageData};

/// A filled field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    /// Option id.
    Selected(String),
    /// Option ids in option order.
    SelectedMany(Vec<String>),
    Date(NaiveDate),
}

impl FieldValue {
    /// What branching conditions are matched against.
    pub fn value_id(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Selected(id) => id.clone(),
            Self::SelectedMany(ids) => ids.join(","),
            Self::Date(date) => date.format("%Y-%m-%d").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    /// Stored in results and callback data; no `:`.
    pub id: String,
    pub label: AnyText,
}

impl SelectOption {
    pub fn new(id: impl Into<String>, label: impl Into<AnyText>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    PlainText {
        empty_text_error_msg: AnyText,
    },
    /// Reply keyboard with one button per option.
    SingleSelect {
        options: Vec<SelectOption>,
        invalid_option_msg: AnyText,
        menu_row_width: usize,
    },
    /// Inline keyboard with toggles and a finish button.
    MultipleSelect {
        options: Vec<SelectOption>,
        finish_button: AnyText,
        use_buttons_msg: AnyText,
        nothing_selected_msg: AnyText,
        /// Extra presses are ignored once this many options are on.
        max_selected: Option<usize>,
    },
    /// Inline calendar; `dd`, `dd.mm` or `dd.mm.yyyy` typed by hand works too.
    Date {
        calendar: CalendarKeyboardConfig,
        /// UTC when unset.
        timezone: Option<FixedOffset>,
        bad_date_format_msg: AnyText,
        cant_be_in_the_past_msg: Option<AnyText>,
    },
}

/// Where the form goes after a field is filled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NextField {
    /// The next field in form order, or the end after the last one.
    #[default]
    Sequential,
    Named(String),
    /// Value id to field name (`None` ends the form). Skipped fields and unknown values take
    /// `default`.
    ByValue {
        mapping: Vec<(String, Option<String>)>,
        default: Option<String>,
    },
    End,
}

/// How a field shows up in [`super::Form::result_to_html`].
#[derive(Debug, Clone)]
pub struct ResultFormatting {
    pub descr: AnyText,
    /// Value goes on its own line under the description.
    pub is_multiline: bool,
}

/// The answer didn't fit the field; the text goes back to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct BadFieldValue(pub AnyText);

#[derive(Debug, Clone)]
pub struct FormField {
    pub name: String,
    pub required: bool,
    pub query_message: AnyText,
    /// One `{}` for the value, sent back when the handler echoes filled fields.
    pub echo_result_template: Option<AnyText>,
    pub result_formatting: Option<ResultFormatting>,
    pub kind: FieldKind,
    pub next: NextField,
}

impl FormField {
    fn new(name: impl Into<String>, query_message: impl Into<AnyText>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            required: true,
            query_message: query_message.into(),
            echo_result_template: None,
            result_formatting: None,
            kind,
            next: NextField::Sequential,
        }
    }

    pub fn plain_text(
        name: impl Into<String>,
        query_message: impl Into<AnyText>,
        empty_text_error_msg: impl Into<AnyText>,
    ) -> Self {
        Self::new(
            name,
            query_message,
            FieldKind::PlainText {
                empty_text_error_msg: empty_text_error_msg.into(),
            },
        )
    }

    pub fn single_select(
        name: impl Into<String>,
        query_message: impl Into<AnyText>,
        options: Vec<SelectOption>,
        invalid_option_msg: impl Into<AnyText>,
    ) -> Self {
        Self::new(
            name,
            query_message,
            FieldKind::SingleSelect {
                options,
                invalid_option_msg: invalid_option_msg.into(),
                menu_row_width: 2,
            },
        )
    }

    pub fn multiple_select(
        name: impl Into<String>,
        query_message: impl Into<AnyText>,
        options: Vec<SelectOption>,
        finish_button: impl Into<AnyText>,
        use_buttons_msg: impl Into<AnyText>,
        nothing_selected_msg: impl Into<AnyText>,
    ) -> Self {
        Self::new(
            name,
            query_message,
            FieldKind::MultipleSelect {
                options,
                finish_button: finish_button.into(),
                use_buttons_msg: use_buttons_msg.into(),
                nothing_selected_msg: nothing_selected_msg.into(),
                max_selected: None,
            },
        )
    }

    pub fn date(
        name: impl Into<String>,
        query_message: impl Into<AnyText>,
        bad_date_format_msg: impl Into<AnyText>,
    ) -> Self {
        Self::new(
            name,
            query_message,
            FieldKind::Date {
                calendar: CalendarKeyboardConfig::default(),
                timezone: None,
                bad_date_format_msg: bad_date_format_msg.into(),
                cant_be_in_the_past_msg: None,
            },
        )
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn then(mut self, next: NextField) -> Self {
        self.next = next;
        self
    }

    pub fn described(mut self, descr: impl Into<AnyText>, is_multiline: bool) -> Self {
        self.result_formatting = Some(ResultFormatting {
            descr: descr.into(),
            is_multiline,
        });
        self
    }

    pub fn echoing(mut self, template: impl Into<AnyText>) -> Self {
        self.echo_result_template = Some(template.into());
        self
    }

    /// Field names `next` may lead to; `None` is the end of the form.
    pub(crate) fn possible_next(&self, following: Option<&str>) -> Vec<Option<String>> {
        match &self.next {
            NextField::Sequential => vec![following.map(str::to_string)],
            NextField::Named(name) => vec![Some(name.clone())],
            NextField::ByValue { mapping, default } => {
                let mut names: Vec<Option<String>> = mapping.iter().map(|(_, next)| next.clone()).collect();
                names.push(default.clone());
                names.dedup();
                names
            }
            NextField::End => vec![None],
        }
    }

    /// `following` is the field after this one in form order.
    pub(crate) fn next_field_name(&self, value: Option<&FieldValue>, following: Option<&str>) -> Option<String> {
        match &self.next {
            NextField::Sequential => following.map(str::to_string),
            NextField::Named(name) => Some(name.clone()),
            NextField::ByValue { mapping, default } => {
                let value_id = value.map(FieldValue::value_id);
                mapping
                    .iter()
                    .find(|(id, _)| Some(id) == value_id.as_ref())
                    .map_or_else(|| default.clone(), |(_, next)| next.clone())
            }
            NextField::End => None,
        }
    }

    /// Every user-facing text of the field, for language validation.
    pub fn texts(&self) -> Vec<&AnyText> {
        let mut texts = vec![&self.query_message];
        texts.extend(self.echo_result_template.iter());
        texts.extend(self.result_formatting.iter().map(|f| &f.descr));
        match &self.kind {
            FieldKind::PlainText { empty_text_error_msg } => texts.push(empty_text_error_msg),
            FieldKind::SingleSelect {
                options,
                invalid_option_msg,
                ..
            } => {
                texts.extend(options.iter().map(|o| &o.label));
                texts.push(invalid_option_msg);
            }
            FieldKind::MultipleSelect {
                options,
                finish_button,
                use_buttons_msg,
                nothing_selected_msg,
                ..
            } => {
                texts.extend(options.iter().map(|o| &o.label));
                texts.extend([finish_button, use_buttons_msg, nothing_selected_msg]);
            }
            FieldKind::Date {
                bad_date_format_msg,
                cant_be_in_the_past_msg,
                ..
            } => {
                texts.push(bad_date_format_msg);
                texts.extend(cant_be_in_the_past_msg.iter());
            }
        }
        texts
    }

    pub(crate) fn options(&self) -> &[SelectOption] {
        match &self.kind {
            FieldKind::SingleSelect { options, .. } | FieldKind::MultipleSelect { options, .. } => options,
            _ => &[],
        }
    }

    /// Today in the date field's timezone.
    pub(crate) fn today(&self) -> NaiveDate {
        match &self.kind {
            FieldKind::Date {
                timezone: Some(timezone),
                ..
            } => Utc::now().with_timezone(timezone).date_naive(),
            _ => Utc::now().date_naive(),
        }
    }

    /// Parses a text answer.
    pub fn parse(&self, text: &str, language: Option<&LanguageData>) -> ComponentResult<Result<FieldValue, BadFieldValue>> {
        let text = text.trim();
        Ok(match &self.kind {
            FieldKind::PlainText { empty_text_error_msg } => {
                if text.is_empty() {
                    Err(BadFieldValue(empty_text_error_msg.clone()))
                } else {
                    Ok(FieldValue::Text(text.to_string()))
                }
            }
            FieldKind::SingleSelect {
                options,
                invalid_option_msg,
                ..
            } => {
                let mut selected = None;
                for option in options {
                    if option.label.to_str(language)? == text {
                        selected = Some(option.id.clone());
                        break;
                    }
                }
                selected
                    .map(FieldValue::Selected)
                    .ok_or_else(|| BadFieldValue(invalid_option_msg.clone()))
            }
            FieldKind::MultipleSelect { use_buttons_msg, .. } => Err(BadFieldValue(use_buttons_msg.clone())),
            FieldKind::Date {
                bad_date_format_msg, ..
            } => match parse_date(text, self.today()) {
                Some(date) => self.check_date(date),
                None => Err(BadFieldValue(bad_date_format_msg.clone())),
            },
        })
    }

    /// Past dates are refused when the field says so.
    pub(crate) fn check_date(&self, date: NaiveDate) -> Result<FieldValue, BadFieldValue> {
        if let FieldKind::Date {
            cant_be_in_the_past_msg: Some(msg),
            ..
        } = &self.kind
        {
            if date < self.today() {
                return Err(BadFieldValue(msg.clone()));
            }
        }
        Ok(FieldValue::Date(date))
    }

    pub fn value_to_str(&self, value: &FieldValue, language: Option<&LanguageData>) -> ComponentResult<String> {
        let label = |id: &str| -> ComponentResult<String> {
            match self.options().iter().find(|o| o.id == id) {
                Some(option) => Ok(option.label.to_str(language)?.to_string()),
                None => Ok(id.to_string()),
            }
        };
        Ok(match value {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Selected(id) => label(id)?,
            FieldValue::SelectedMany(ids) => ids
                .iter()
                .map(|id| label(id))
                .collect::<ComponentResult<Vec<_>>>()?
                .join(", "),
            FieldValue::Date(date) => date.format("%d.%m.%Y").to_string(),
        })
    }
}

/// `dd[.mm[.yyyy]]`, missing parts taken from `today`.
fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let parts: Vec<&str> = text.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let day: u32 = parts[0].trim().parse().ok()?;
    let month: u32 = match parts.get(1) {
        Some(month) => month.trim().parse().ok()?,
        None => today.month(),
    };
    let year: i32 = match parts.get(2) {
        Some(year) => year.trim().parse().ok()?,
        None => today.year(),
    };
    NaiveDate::from_ymd_opt(year, month, day)
}
