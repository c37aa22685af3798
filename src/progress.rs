/// Receives per-row progress of a long-running read or write.
pub trait ProgressListener {
    fn started(&mut self);
    /// `percent` runs from 0 to 100.
    fn progress(&mut self, percent: f32);
    fn complete(&mut self);
}

/// A listener that ignores every report.
#[derive(Clone, Copy, Debug, Default)]
pub struct DummyProgressListener;

impl ProgressListener for DummyProgressListener {
    fn started(&mut self) {}

    fn progress(&mut self, _percent: f32) {}

    fn complete(&mut self) {}
}

/// Result of an operation that can be cancelled between rows.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Finished(T),
    Aborted,
}

impl<T> Outcome<T> {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Outcome::Aborted)
    }

    pub fn finished(self) -> Option<T> {
        match self {
            Outcome::Finished(value) => Some(value),
            Outcome::Aborted => None,
        }
    }
}

pub(crate) fn percent(row: usize, total: usize) -> f32 {
    if total == 0 {
        100.0
    } else {
        100.0 * row as f32 / total as f32
    }
}
