use crate::error::ReplError;

/// The collected-lines buffer: at most one block of lines, filled by the
/// collector commands and read by commands with line semantics.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    lines: Option<Vec<String>>,
}

impl LineBuffer {
    /// Removes and returns the collected lines.
    pub(crate) fn take(&mut self) -> Result<Vec<String>, ReplError> {
        self.lines.take().ok_or_else(no_collected_lines)
    }

    /// Returns a copy of the collected lines, keeping them.
    pub(crate) fn peek(&self) -> Result<Vec<String>, ReplError> {
        self.lines.clone().ok_or_else(no_collected_lines)
    }

    /// Stores `lines` and returns the report printed by the collectors.
    ///
    /// When appending to a non-empty buffer the report includes the new total.
    pub(crate) fn store(&mut self, lines: Vec<String>, append: bool) -> String {
        let added = lines.len();
        match self.lines.as_mut() {
            Some(existing) if append && !existing.is_empty() => {
                existing.extend(lines);
                format!("{added} added ({} total)", existing.len())
            }
            _ => {
                self.lines = Some(lines);
                format!("{added} collected")
            }
        }
    }
}

fn no_collected_lines() -> ReplError {
    ReplError::invalid_input("no collected lines")
}
