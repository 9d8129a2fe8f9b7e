//! # Forms
//!
//! A [`Form`] is a graph of [`FormField`]s: each field names the one that follows, possibly
//! depending on the answer. [`FormHandler`] walks users through it one question at a time and
//! keeps their progress in Redis.
//!
//! Fields ask for plain text, one option from a reply keyboard, several options from inline
//! toggles, or a date from the inline [`crate::calendar`] keyboard.

mod field;
mod handler;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub use field::{BadFieldValue, FieldKind, FieldValue, FormField, NextField, ResultFormatting, SelectOption};
pub use handler::{FormExitContext, FormExitHook, FormHandler, FormHandlerConfig};

use crate::error::{ComponentError, ComponentResult};
use crate::language::LanguageData;
use crate::utils::html_escape;

/// Field name to value; skipped optional fields map to `None`.
pub type FormResult = BTreeMap<String, Option<FieldValue>>;

#[derive(Debug, Clone)]
pub struct Form {
    fields: Vec<FormField>,
    index_by_name: HashMap<String, usize>,
}

impl Form {
    /// The first field is where the form starts. Names must be unique, every transition must
    /// lead to an existing field and every field must be reachable.
    pub fn new(fields: Vec<FormField>) -> ComponentResult<Self> {
        if fields.is_empty() {
            return Err(ComponentError::Config("form must have at least one field".to_string()));
        }
        let mut index_by_name = HashMap::new();
        for (idx, field) in fields.iter().enumerate() {
            if field.name.is_empty() || field.name.contains(':') {
                return Err(ComponentError::Config(format!("invalid form field name {:?}", field.name)));
            }
            if index_by_name.insert(field.name.clone(), idx).is_some() {
                return Err(ComponentError::Config(format!(
                    "all fields must have unique names, but there is at least one duplicate: {}",
                    field.name
                )));
            }
            if let Some(option) = field.options().iter().find(|o| o.id.is_empty() || o.id.contains(':')) {
                return Err(ComponentError::Config(format!(
                    "invalid option id {:?} in field {}",
                    option.id, field.name
                )));
            }
        }
        let form = Self { fields, index_by_name };

        let next_field_names = form.next_field_names();
        for (name, next) in &next_field_names {
            if let Some(unknown) = next.iter().flatten().find(|n| !form.index_by_name.contains_key(*n)) {
                return Err(ComponentError::Config(format!(
                    "field {} leads to unknown field {}",
                    name, unknown
                )));
            }
        }
        let reachable = form.reachable_from_start(None);
        if let Some(orphan) = form.fields.iter().find(|f| !reachable.contains(f.name.as_str())) {
            return Err(ComponentError::Config(format!(
                "field {} can't be reached from the start of the form",
                orphan.name
            )));
        }
        Ok(form)
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn start_field(&self) -> &FormField {
        &self.fields[0]
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.index_by_name.get(name).map(|idx| &self.fields[*idx])
    }

    fn following(&self, name: &str) -> Option<&str> {
        let idx = self.index_by_name.get(name)?;
        self.fields.get(idx + 1).map(|f| f.name.as_str())
    }

    /// Where the form goes after `field` got `value`; `None` completes it.
    pub fn next_field(&self, field: &FormField, value: Option<&FieldValue>) -> Option<&FormField> {
        let name = field.next_field_name(value, self.following(&field.name))?;
        self.field(&name)
    }

    /// Every transition of the form graph; `None` is the end.
    pub fn next_field_names(&self) -> BTreeMap<String, BTreeSet<Option<String>>> {
        self.fields
            .iter()
            .map(|f| {
                let next = f.possible_next(self.following(&f.name)).into_iter().collect();
                (f.name.clone(), next)
            })
            .collect()
    }

    /// Names of the fields reachable from the start without passing through `avoid`.
    fn reachable_from_start(&self, avoid: Option<&str>) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let start = self.start_field().name.as_str();
        if Some(start) == avoid {
            return seen;
        }
        let mut queue = vec![start];
        while let Some(name) = queue.pop() {
            if !seen.insert(name) {
                continue;
            }
            let Some(field) = self.field(name) else {
                continue;
            };
            for next in field.possible_next(self.following(name)).into_iter().flatten() {
                if let Some(next_field) = self.field(&next) {
                    if Some(next_field.name.as_str()) != avoid {
                        queue.push(next_field.name.as_str());
                    }
                }
            }
        }
        seen
    }

    fn can_complete(&self, avoid: &str) -> bool {
        self.reachable_from_start(Some(avoid)).into_iter().any(|name| {
            self.field(name)
                .is_some_and(|f| f.possible_next(self.following(name)).contains(&None))
        })
    }

    /// Fields every completed form passes through.
    pub fn globally_required_fields(&self) -> BTreeSet<String> {
        self.fields
            .iter()
            .filter(|f| !self.can_complete(&f.name))
            .map(|f| f.name.clone())
            .collect()
    }

    /// `<b>descr</b>: value` per described field in form order; undescribed filled fields are
    /// only counted.
    pub fn result_to_html(&self, result: &FormResult, language: Option<&LanguageData>) -> ComponentResult<String> {
        let mut lines = Vec::new();
        let mut omitted = 0;
        for field in &self.fields {
            let Some(Some(value)) = result.get(&field.name) else {
                continue;
            };
            let Some(formatting) = &field.result_formatting else {
                omitted += 1;
                continue;
            };
            let descr = html_escape(formatting.descr.to_str(language)?);
            let value = html_escape(&field.value_to_str(value, language)?);
            if formatting.is_multiline {
                lines.push(format!("<b>{}</b>\n{}", descr, value));
            } else {
                lines.push(format!("<b>{}</b>: {}", descr, value));
            }
        }
        if omitted > 0 {
            lines.push(format!("<i>+{} omitted</i>", omitted));
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> FormField {
        FormField::plain_text(name, name, "empty")
    }

    fn next(names: &[Option<&str>]) -> BTreeSet<Option<String>> {
        names.iter().map(|n| n.map(str::to_string)).collect()
    }

    #[test]
    fn test_linear_form() {
        let form = Form::new(vec![field("a"), field("b"), field("c")]).unwrap();
        assert_eq!(form.start_field().name, "a");
        assert_eq!(form.next_field_names()["b"], next(&[Some("c")]));
        assert_eq!(form.next_field_names()["c"], next(&[None]));
        let required: Vec<String> = form.globally_required_fields().into_iter().collect();
        assert_eq!(required, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_branching_form_graph() {
        let form = Form::new(vec![
            field("a"),
            field("b").then(NextField::ByValue {
                mapping: vec![
                    ("one".to_string(), Some("c1".to_string())),
                    ("two".to_string(), Some("c2".to_string())),
                ],
                default: Some("c3".to_string()),
            }),
            field("c1").then(NextField::Named("d".to_string())),
            field("c2").then(NextField::Named("c4".to_string())),
            field("c4").then(NextField::Named("c5".to_string())),
            field("c5").then(NextField::Named("d".to_string())),
            field("c3").then(NextField::Named("d".to_string())),
            field("d"),
            field("e"),
        ])
        .unwrap();
        assert_eq!(form.next_field_names()["b"], next(&[Some("c1"), Some("c2"), Some("c3")]));
        assert_eq!(form.next_field_names()["c4"], next(&[Some("c5")]));
        let required: Vec<String> = form.globally_required_fields().into_iter().collect();
        assert_eq!(required, vec!["a", "b", "d", "e"]);

        let b = form.field("b").unwrap();
        let picked = form.next_field(b, Some(&FieldValue::Text("two".to_string())));
        assert_eq!(picked.map(|f| f.name.as_str()), Some("c2"));
        assert_eq!(form.next_field(b, None).map(|f| f.name.as_str()), Some("c3"));
    }

    #[test]
    fn test_invalid_forms() {
        assert!(Form::new(vec![]).is_err());
        assert!(Form::new(vec![field("a"), field("a")]).is_err());
        assert!(Form::new(vec![field("a").then(NextField::Named("nope".to_string()))]).is_err());
        // "b" is skipped by "a" and nothing else leads there
        assert!(Form::new(vec![field("a").then(NextField::Named("c".to_string())), field("b"), field("c")]).is_err());
        assert!(Form::new(vec![field("a:b")]).is_err());
    }

    #[test]
    fn test_result_to_html() {
        let form = Form::new(vec![
            field("message").described("Message", false),
            field("name").described("Name", false),
            FormField::single_select(
                "gdpr",
                "?",
                vec![SelectOption::new("yes", "✅"), SelectOption::new("maybe", "🧐")],
                "",
            )
            .described("GDPR OK?", false),
            field("long_description").described("Description", true),
            field("extra_info"),
            field("pet").optional().described("Pet", false),
        ])
        .unwrap();
        let mut result = FormResult::new();
        result.insert("message".into(), Some(FieldValue::Text("Hello <world>".into())));
        result.insert("name".into(), Some(FieldValue::Text("Igor".into())));
        result.insert("gdpr".into(), Some(FieldValue::Selected("maybe".into())));
        result.insert("long_description".into(), Some(FieldValue::Text("Lorem ipsum".into())));
        result.insert("extra_info".into(), Some(FieldValue::Text("hi".into())));
        result.insert("pet".into(), None);
        assert_eq!(
            form.result_to_html(&result, None).unwrap(),
            "<b>Message</b>: Hello &lt;world&gt;\n<b>Name</b>: Igor\n<b>GDPR OK?</b>: 🧐\n\
             <b>Description</b>\nLorem ipsum\n<i>+1 omitted</i>"
        );
    }
}
