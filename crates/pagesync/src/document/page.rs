use super::{Action, Operation};
use crate::transform;

/// Materialized content of one page plus the log of operations that produced it
///
/// The revision of a page is the number of operations in its log. Clients name
/// the revision they edited against, and everything logged after it is what
/// their operation gets transformed past.
#[derive(Debug, Clone, Default)]
pub struct Page {
    content: String,
    char_len: usize,
    log: Vec<Operation>,
}

impl Page {
    /// Create an empty page
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a page by applying `ops` to empty content in order
    pub fn replay<'a, I>(ops: I) -> Self
    where
        I: IntoIterator<Item = &'a Operation>,
    {
        let mut page = Self::new();
        for op in ops {
            page.apply(op.clone());
        }
        page
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Length of the content in characters
    pub fn len(&self) -> usize {
        self.char_len
    }

    pub fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    pub fn revision(&self) -> u64 {
        self.log.len() as u64
    }

    pub fn log(&self) -> &[Operation] {
        &self.log
    }

    /// Operations logged after `revision`
    ///
    /// A revision beyond the head yields an empty slice.
    pub fn since(&self, revision: u64) -> &[Operation] {
        let start = usize::try_from(revision)
            .unwrap_or(usize::MAX)
            .min(self.log.len());
        &self.log[start..]
    }

    /// Apply an operation and append it to the log
    ///
    /// The operation is clamped to the current content first, and the clamped
    /// form is what gets logged. Returns whether the content changed; an
    /// operation without effect is still logged.
    pub fn apply(&mut self, op: Operation) -> bool {
        let op = transform::clamp(op, self.char_len);
        let changed = !op.is_noop();

        match op.action {
            Action::Insert => {
                let at = byte_offset(&self.content, op.position);
                self.content.insert_str(at, &op.content);
                self.char_len += op.inserted_len();
            }
            Action::Delete => {
                let start = byte_offset(&self.content, op.position);
                let end = byte_offset(&self.content, op.position + op.length);
                self.content.replace_range(start..end, "");
                self.char_len -= op.length;
            }
        }

        self.log.push(op);
        changed
    }
}

fn byte_offset(s: &str, char_pos: usize) -> usize {
    s.char_indices()
        .nth(char_pos)
        .map(|(offset, _)| offset)
        .unwrap_or(s.len())
}
