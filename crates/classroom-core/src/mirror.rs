//! Latest editor contents per student.

use std::collections::HashMap;

use crate::StudentId;

/// Session-scoped snapshot of each student's editor.
///
/// Last write wins; this is a presentation copy for admins, not a
/// collaborative document.
#[derive(Debug, Default, Clone)]
pub struct CodeMirror {
    snapshots: HashMap<StudentId, String>,
}

impl CodeMirror {
    /// Create an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored code for a student.
    pub fn update(&mut self, student_id: &str, code: impl Into<String>) {
        let code = code.into();
        if let Some(existing) = self.snapshots.get_mut(student_id) {
            *existing = code;
        } else {
            self.snapshots.insert(student_id.to_owned(), code);
        }
    }

    /// Stored code, if the student has edited anything yet.
    #[must_use]
    pub fn get(&self, student_id: &str) -> Option<&str> {
        self.snapshots.get(student_id).map(String::as_str)
    }

    /// Stored code, or `template` when the student has not edited yet.
    #[must_use]
    pub fn read(&self, student_id: &str, template: Option<&str>) -> String {
        self.get(student_id)
            .or(template)
            .unwrap_or_default()
            .to_owned()
    }

    /// Forget a student's snapshot.
    pub fn remove(&mut self, student_id: &str) -> Option<String> {
        self.snapshots.remove(student_id)
    }

    /// Number of students with a snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no student has a snapshot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
