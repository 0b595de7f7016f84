//! String rewriting applied to values read from or written to the offline
//! stores. The live registry never goes through it.

use crate::value::{RegValue, ValueType};

/// One rewrite step. Returning `None` leaves the text unchanged.
pub trait ValueAlteration: Send + Sync {
    fn after_read(&self, text: &str) -> Option<String>;
    fn before_write(&self, text: &str) -> Option<String>;
}

/// Ordered list of alterations. Reads apply them first to last, writes last
/// to first, so a write followed by a read gives back what was written.
#[derive(Default)]
pub struct AlterationPipeline {
    steps: Vec<Box<dyn ValueAlteration>>,
}

impl AlterationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, step: impl ValueAlteration + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// `None` when no step changed the text.
    fn read_text(&self, text: &str) -> Option<String> {
        self.steps.iter().fold(None, |changed, step| {
            step.after_read(changed.as_deref().unwrap_or(text)).or(changed)
        })
    }

    fn write_text(&self, text: &str) -> Option<String> {
        self.steps.iter().rev().fold(None, |changed, step| {
            step.before_write(changed.as_deref().unwrap_or(text)).or(changed)
        })
    }

    pub fn after_read(&self, value: RegValue) -> RegValue {
        self.apply(value, |text| self.read_text(text))
    }

    pub fn before_write(&self, value: RegValue) -> RegValue {
        self.apply(value, |text| self.write_text(text))
    }

    /// Re-encodes the value only when some step rewrote its text, so stored
    /// bytes pass through untouched otherwise.
    fn apply(&self, value: RegValue, rewrite: impl Fn(&str) -> Option<String>) -> RegValue {
        if self.is_empty() || !value.kind.is_string() {
            return value;
        }
        if value.kind == ValueType::MULTI_SZ {
            let Some(items) = value.as_multi_string() else {
                return value;
            };
            let rewritten: Vec<Option<String>> = items.iter().map(|item| rewrite(item)).collect();
            if rewritten.iter().all(Option::is_none) {
                return value;
            }
            let items: Vec<String> = items
                .into_iter()
                .zip(rewritten)
                .map(|(item, changed)| changed.unwrap_or(item))
                .collect();
            return RegValue::multi_sz(&items);
        }
        match value.as_string().and_then(|text| rewrite(&text)) {
            Some(text) => RegValue::string(value.kind, &text),
            None => value,
        }
    }
}

/// Rewrites a leading path prefix: `stored` in the offline stores, `visible`
/// to the application. Matching is case-insensitive and stops at path
/// separators, so `C:\App` does not match `C:\Apple`.
pub struct PrefixRebase {
    stored: String,
    visible: String,
}

impl PrefixRebase {
    pub fn new(stored: &str, visible: &str) -> Self {
        Self {
            stored: stored.trim_end_matches('\\').to_string(),
            visible: visible.trim_end_matches('\\').to_string(),
        }
    }

    fn rebase(text: &str, from: &str, to: &str) -> Option<String> {
        let head = text.get(..from.len())?;
        if from.is_empty() || !head.eq_ignore_ascii_case(from) {
            return None;
        }
        let rest = &text[from.len()..];
        if !(rest.is_empty() || rest.starts_with('\\')) {
            return None;
        }
        Some(format!("{to}{rest}"))
    }
}

impl ValueAlteration for PrefixRebase {
    fn after_read(&self, text: &str) -> Option<String> {
        Self::rebase(text, &self.stored, &self.visible)
    }

    fn before_write(&self, text: &str) -> Option<String> {
        Self::rebase(text, &self.visible, &self.stored)
    }
}
