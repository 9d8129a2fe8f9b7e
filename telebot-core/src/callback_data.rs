//! Structured inline button payloads: `prefix:value1:value2`.

use std::collections::HashMap;

use crate::error::HandlerError;

/// Telegram rejects callback data longer than this many bytes.
pub const MAX_CALLBACK_DATA_LEN: usize = 64;

const SEP: char = ':';

/// Callback data factory with a fixed prefix and named fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackData {
    prefix: String,
    fields: Vec<String>,
}

impl CallbackData {
    pub fn new(prefix: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            prefix: prefix.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Builds the payload from values in field order.
    pub fn new_data(&self, values: &[&str]) -> Result<String, HandlerError> {
        if values.len() != self.fields.len() {
            return Err(HandlerError::InvalidCallbackData(format!(
                "{} expects {} values, got {}",
                self.prefix,
                self.fields.len(),
                values.len()
            )));
        }
        if let Some(bad) = values.iter().find(|v| v.contains(SEP)) {
            return Err(HandlerError::InvalidCallbackData(format!(
                "value {:?} contains separator {:?}",
                bad, SEP
            )));
        }
        let mut data = self.prefix.clone();
        for value in values {
            data.push(SEP);
            data.push_str(value);
        }
        if data.len() > MAX_CALLBACK_DATA_LEN {
            return Err(HandlerError::InvalidCallbackData(format!(
                "{:?} is longer than {} bytes",
                data, MAX_CALLBACK_DATA_LEN
            )));
        }
        Ok(data)
    }

    /// Field name to value map. Fails on a foreign prefix or a wrong field count.
    pub fn parse(&self, data: &str) -> Result<HashMap<String, String>, HandlerError> {
        let mut parts = data.split(SEP);
        if parts.next() != Some(self.prefix.as_str()) {
            return Err(HandlerError::InvalidCallbackData(format!(
                "{:?} does not start with {}",
                data, self.prefix
            )));
        }
        let values: Vec<&str> = parts.collect();
        if values.len() != self.fields.len() {
            return Err(HandlerError::InvalidCallbackData(format!(
                "{:?} has {} values, expected {}",
                data,
                values.len(),
                self.fields.len()
            )));
        }
        Ok(self
            .fields
            .iter()
            .cloned()
            .zip(values.into_iter().map(str::to_string))
            .collect())
    }

    pub fn matches(&self, data: &str) -> bool {
        self.parse(data).is_ok()
    }

    /// Convenience for single-field payloads.
    pub fn single(&self, data: &str) -> Result<String, HandlerError> {
        let mut parsed = self.parse(data)?;
        let field = self.fields.first().ok_or_else(|| {
            HandlerError::InvalidCallbackData(format!("{} has no fields", self.prefix))
        })?;
        parsed
            .remove(field)
            .ok_or_else(|| HandlerError::InvalidCallbackData(data.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_parse() {
        let cd = CallbackData::new("lang", &["code"]);
        let data = cd.new_data(&["uk"]).unwrap();
        assert_eq!(data, "lang:uk");
        assert!(cd.matches(&data));
        assert_eq!(cd.single(&data).unwrap(), "uk");
        assert!(!cd.matches("category:1"));
        assert!(!cd.matches("lang:uk:extra"));
    }

    #[test]
    fn test_rejects_separator_and_long_payloads() {
        let cd = CallbackData::new("x", &["v"]);
        assert!(cd.new_data(&["a:b"]).is_err());
        assert!(cd.new_data(&[&"y".repeat(70)]).is_err());
        assert!(cd.new_data(&[]).is_err());
    }
}
