use serde::{Deserialize, Serialize};

/// A problem with one row (CSV) or entry (LDIF). Row 1 is the CSV header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub row: usize,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(row: usize, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            row,
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn missing(row: usize, field: &str) -> Self {
        Self::new(row, field, format!("Missing required field: {}", field))
    }
}

/// Outcome of one import call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportResult {
    pub total_rows: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<ValidationError>,
}

impl ImportResult {
    pub fn new(total_rows: usize) -> Self {
        Self {
            total_rows,
            ..Self::default()
        }
    }

    /// True when upfront validation rejected the whole batch.
    pub fn rejected(&self) -> bool {
        !self.errors.is_empty() && self.created + self.updated + self.skipped == 0
    }

    pub(crate) fn skip(&mut self, error: ValidationError) {
        self.skipped += 1;
        self.errors.push(error);
    }
}
