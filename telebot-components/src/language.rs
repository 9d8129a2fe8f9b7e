//! Languages and multilanguage texts.
//!
//! [`LanguageData`] entries come from a built-in table keyed by lowercase IETF code (as sent by
//! Telegram in `language_code`). Texts shown to users are [`AnyText`]: either a plain string for
//! single-language bots or a [`MultilangText`] with one localisation per supported language.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{ComponentError, ComponentResult};

/// One entry of the language table. Equality, hashing and ordering use `code` only.
#[derive(Debug, Clone, Copy)]
pub struct LanguageData {
    pub code: &'static str,
    /// English name.
    pub name: &'static str,
    /// Name in the language itself.
    pub local_name: &'static str,
    pub emoji: Option<&'static str>,
}

macro_rules! languages {
    ($(($code:literal, $name:literal, $local:literal, $emoji:expr)),* $(,)?) => {
        const LANGUAGES: &[LanguageData] = &[
            $(LanguageData { code: $code, name: $name, local_name: $local, emoji: $emoji }),*
        ];
    };
}

languages![
    ("ar", "Arabic", "العربية", None),
    ("be", "Belarusian", "Беларуская", Some("🇧🇾")),
    ("cs", "Czech", "Čeština", Some("🇨🇿")),
    ("de", "German", "Deutsch", Some("🇩🇪")),
    ("el", "Greek", "Ελληνικά", Some("🇬🇷")),
    ("en", "English", "English", Some("🇬🇧")),
    ("es", "Spanish", "Español", Some("🇪🇸")),
    ("et", "Estonian", "Eesti", Some("🇪🇪")),
    ("fa", "Persian", "فارسی", Some("🇮🇷")),
    ("fi", "Finnish", "Suomi", Some("🇫🇮")),
    ("fr", "French", "Français", Some("🇫🇷")),
    ("he", "Hebrew", "עברית", Some("🇮🇱")),
    ("hy", "Armenian", "Հայերեն", Some("🇦🇲")),
    ("it", "Italian", "Italiano", Some("🇮🇹")),
    ("ja", "Japanese", "日本語", Some("🇯🇵")),
    ("ka", "Georgian", "ქართული", Some("🇬🇪")),
    ("kk", "Kazakh", "Қазақ тілі", Some("🇰🇿")),
    ("ko", "Korean", "한국어", Some("🇰🇷")),
    ("lt", "Lithuanian", "Lietuvių", Some("🇱🇹")),
    ("lv", "Latvian", "Latviešu", Some("🇱🇻")),
    ("nl", "Dutch", "Nederlands", Some("🇳🇱")),
    ("pl", "Polish", "Polski", Some("🇵🇱")),
    ("pt", "Portuguese", "Português", Some("🇵🇹")),
    ("ro", "Romanian", "Română", Some("🇷🇴")),
    ("ru", "Russian", "Русский", Some("🇷🇺")),
    ("sr", "Serbian", "Српски", Some("🇷🇸")),
    ("tr", "Turkish", "Türkçe", Some("🇹🇷")),
    ("uk", "Ukrainian", "Українська", Some("🇺🇦")),
    ("uz", "Uzbek", "Oʻzbekcha", Some("🇺🇿")),
    ("zh", "Chinese", "中文", Some("🇨🇳")),
];

impl LanguageData {
    /// Case-insensitive lookup in the built-in table.
    pub fn lookup(code: &str) -> ComponentResult<Self> {
        let code = code.trim().to_lowercase();
        LANGUAGES
            .iter()
            .find(|l| l.code == code)
            .copied()
            .ok_or(ComponentError::UnknownLanguage(code))
    }

    pub fn all() -> &'static [LanguageData] {
        LANGUAGES
    }

    /// Flag emoji if known, uppercase code otherwise.
    pub fn emoji_or_code(&self) -> String {
        match self.emoji {
            Some(emoji) => emoji.to_string(),
            None => self.code.to_uppercase(),
        }
    }
}

impl PartialEq for LanguageData {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for LanguageData {}

impl Hash for LanguageData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
    }
}

impl PartialOrd for LanguageData {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LanguageData {
    fn cmp(&self, other: &Self) -> Ordering {
        self.code.cmp(other.code)
    }
}

impl fmt::Display for LanguageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code)
    }
}

/// Shorthand for the most used languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    En,
    Uk,
    Ru,
    Pl,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Uk => "uk",
            Self::Ru => "ru",
            Self::Pl => "pl",
        }
    }

    pub fn as_data(&self) -> LanguageData {
        LANGUAGES
            .iter()
            .find(|l| l.code == self.code())
            .copied()
            .unwrap_or(LanguageData {
                code: self.code(),
                name: self.code(),
                local_name: self.code(),
                emoji: None,
            })
    }
}

impl From<Language> for LanguageData {
    fn from(language: Language) -> Self {
        language.as_data()
    }
}

/// Localised variants of one text, keyed by language code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultilangText(BTreeMap<String, String>);

impl MultilangText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: adds (or replaces) the localisation for `language`.
    pub fn with(mut self, language: impl Into<LanguageData>, text: impl Into<String>) -> Self {
        self.0.insert(language.into().code.to_string(), text.into());
        self
    }

    pub fn get(&self, language: &LanguageData) -> Option<&str> {
        self.0.get(language.code).map(String::as_str)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Errors if any of `languages` has no localisation.
    pub fn validate(&self, languages: &[LanguageData]) -> ComponentResult<()> {
        match languages.iter().find(|l| self.get(l).is_none()) {
            Some(missing) => Err(ComponentError::MissingLocalisation(format!(
                "multilang text misses localisation to '{}': {:?}",
                missing, self.0
            ))),
            None => Ok(()),
        }
    }
}

impl<L: Into<LanguageData>, S: Into<String>> FromIterator<(L, S)> for MultilangText {
    fn from_iter<I: IntoIterator<Item = (L, S)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(l, s)| (l.into().code.to_string(), s.into()))
                .collect(),
        )
    }
}

/// A user-facing text: plain for single-language bots, localised otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnyText {
    Plain(String),
    Multilang(MultilangText),
}

impl AnyText {
    /// Resolves the text for `language`; `None` means multilanguage mode is off.
    pub fn to_str(&self, language: Option<&LanguageData>) -> ComponentResult<&str> {
        match (self, language) {
            (Self::Plain(text), None) => Ok(text),
            (Self::Plain(_), Some(language)) => Err(ComponentError::Config(format!(
                "plain string text requires no language, got '{}'",
                language
            ))),
            (Self::Multilang(_), None) => Err(ComponentError::Config(
                "multilang text requires a language for localisation".to_string(),
            )),
            (Self::Multilang(ml), Some(language)) => ml.get(language).ok_or_else(|| {
                ComponentError::MissingLocalisation(format!(
                    "no localisation found for language '{}'",
                    language
                ))
            }),
        }
    }

    pub fn is_multilang(&self) -> bool {
        matches!(self, Self::Multilang(_))
    }

    /// Checks the text against a language configuration: localised to every language, or
    /// plain when `languages` is `None`.
    pub fn validate(&self, languages: Option<&[LanguageData]>) -> ComponentResult<()> {
        match (self, languages) {
            (Self::Plain(_), None) => Ok(()),
            (Self::Multilang(ml), Some(languages)) => ml.validate(languages),
            (Self::Plain(text), Some(_)) => Err(ComponentError::Config(format!(
                "expected multilang text, found plain string {:?}",
                text
            ))),
            (Self::Multilang(_), None) => Err(ComponentError::Config(
                "expected plain string, found multilang text".to_string(),
            )),
        }
    }
}

impl From<&str> for AnyText {
    fn from(text: &str) -> Self {
        Self::Plain(text.to_string())
    }
}

impl From<String> for AnyText {
    fn from(text: String) -> Self {
        Self::Plain(text)
    }
}

impl From<MultilangText> for AnyText {
    fn from(text: MultilangText) -> Self {
        Self::Multilang(text)
    }
}

/// Validates that `text` is multilanguage and covers every language.
pub fn validate_multilang(text: &AnyText, languages: &[LanguageData]) -> ComponentResult<()> {
    match text {
        AnyText::Multilang(ml) => ml.validate(languages),
        AnyText::Plain(text) => Err(ComponentError::Config(format!("not a multilang text: {:?}", text))),
    }
}
