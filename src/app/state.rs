use time::{OffsetDateTime, UtcOffset};
use unicode_segmentation::UnicodeSegmentation;

use crate::calendar::MonthCursor;
use crate::journaling::EntryLifecycleController;
use crate::model::{Entry, EntrySnapshot};
use crate::repository::{EntryRepository, RequestError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeField {
    Mood,
    Body,
}

/// Single text buffer with a byte cursor that always sits on a grapheme
/// boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextField {
    buffer: String,
    cursor: usize,
}

impl TextField {
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_blank(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    pub fn insert_char(&mut self, ch: char) {
        let mut scratch = [0u8; 4];
        let encoded = ch.encode_utf8(&mut scratch);
        self.buffer.insert_str(self.cursor, encoded);
        self.cursor += encoded.len();
    }

    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let prev = prev_grapheme_boundary(&self.buffer, self.cursor);
        self.buffer.drain(prev..self.cursor);
        self.cursor = prev;
        true
    }

    pub fn delete(&mut self) -> bool {
        if self.cursor >= self.buffer.len() {
            return false;
        }
        let next = next_grapheme_boundary(&self.buffer, self.cursor);
        self.buffer.drain(self.cursor..next);
        true
    }

    pub fn move_left(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor = prev_grapheme_boundary(&self.buffer, self.cursor);
        true
    }

    pub fn move_right(&mut self) -> bool {
        if self.cursor >= self.buffer.len() {
            return false;
        }
        self.cursor = next_grapheme_boundary(&self.buffer, self.cursor);
        true
    }

    pub fn move_home(&mut self) {
        self.cursor = self.buffer[..self.cursor]
            .rfind('\n')
            .map(|idx| idx + 1)
            .unwrap_or(0);
    }

    pub fn move_end(&mut self) {
        self.cursor = self.buffer[self.cursor..]
            .find('\n')
            .map(|idx| self.cursor + idx)
            .unwrap_or(self.buffer.len());
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }
}

/// The compose form. Cleared only after a successful save.
#[derive(Debug, Clone)]
pub struct ComposeForm {
    pub mood: TextField,
    pub body: TextField,
    focus: ComposeField,
}

impl Default for ComposeForm {
    fn default() -> Self {
        Self {
            mood: TextField::default(),
            body: TextField::default(),
            focus: ComposeField::Mood,
        }
    }
}

impl ComposeForm {
    pub fn focus(&self) -> ComposeField {
        self.focus
    }

    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            ComposeField::Mood => ComposeField::Body,
            ComposeField::Body => ComposeField::Mood,
        };
    }

    pub fn focus_body(&mut self) {
        self.focus = ComposeField::Body;
    }

    pub fn active_mut(&mut self) -> &mut TextField {
        match self.focus {
            ComposeField::Mood => &mut self.mood,
            ComposeField::Body => &mut self.body,
        }
    }

    pub fn insert_newline(&mut self) {
        match self.focus {
            ComposeField::Mood => self.focus = ComposeField::Body,
            ComposeField::Body => self.body.insert_char('\n'),
        }
    }

    pub fn clear(&mut self) {
        self.mood.clear();
        self.body.clear();
        self.focus = ComposeField::Mood;
    }
}

/// Everything the terminal front-end renders from.
pub struct AppState {
    pub form: ComposeForm,
    pub snapshot: EntrySnapshot,
    pub controller: EntryLifecycleController,
    pub cursor: MonthCursor,
    pub selected: usize,
    status_message: Option<String>,
    offset: UtcOffset,
}

impl AppState {
    pub fn new(offset: UtcOffset) -> Self {
        let today = OffsetDateTime::now_utc().to_offset(offset).date();
        Self {
            form: ComposeForm::default(),
            snapshot: EntrySnapshot::default(),
            controller: EntryLifecycleController::new(),
            cursor: MonthCursor::containing(today),
            selected: 0,
            status_message: None,
            offset,
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    /// Foreground reload of the entry list. Returns whether the snapshot
    /// changed.
    pub fn refresh(
        &mut self,
        repo: &dyn EntryRepository,
        limit: usize,
    ) -> Result<bool, RequestError> {
        let entries = repo.list_entries(Some(limit))?;
        let changed = self.snapshot.replace(entries);
        self.clamp_selection();
        Ok(changed)
    }

    pub fn entries(&self) -> &[Entry] {
        self.snapshot.entries()
    }

    pub fn selected_entry(&self) -> Option<&Entry> {
        self.entries().get(self.selected)
    }

    pub fn move_selection(&mut self, delta: isize) {
        let len = self.entries().len();
        if len == 0 {
            self.selected = 0;
            return;
        }
        let next = self.selected as isize + delta;
        self.selected = next.clamp(0, len as isize - 1) as usize;
    }

    pub fn clamp_selection(&mut self) {
        let len = self.entries().len();
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }

    pub fn show_previous_month(&mut self) {
        self.cursor = self.cursor.previous();
    }

    pub fn show_next_month(&mut self) {
        self.cursor = self.cursor.next();
    }

    pub fn show_current_month(&mut self) {
        self.cursor = MonthCursor::containing(self.now().date());
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }

    pub fn clear_status_message(&mut self) {
        self.status_message = None;
    }
}

fn prev_grapheme_boundary(text: &str, cursor: usize) -> usize {
    if cursor == 0 {
        return 0;
    }
    let mut last = 0;
    for (idx, _) in text[..cursor].grapheme_indices(true) {
        last = idx;
    }
    last
}

fn next_grapheme_boundary(text: &str, cursor: usize) -> usize {
    if cursor >= text.len() {
        return text.len();
    }
    text[cursor..]
        .grapheme_indices(true)
        .nth(1)
        .map(|(idx, _)| cursor + idx)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{entry, noon};
    use crate::repository::testing::ScriptedRepository;
    use time::macros::offset;

    #[test]
    fn backspace_removes_whole_graphemes() {
        let mut field = TextField::default();
        for ch in "nap 👍🏽".chars() {
            field.insert_char(ch);
        }
        assert!(field.backspace());
        assert_eq!(field.buffer(), "nap ");
        assert!(field.move_left());
        field.insert_char('!');
        assert_eq!(field.buffer(), "nap! ");
    }

    #[test]
    fn home_and_end_stay_on_the_current_line() {
        let mut field = TextField::default();
        for ch in "first\nsecond".chars() {
            field.insert_char(ch);
        }
        field.move_home();
        assert_eq!(field.cursor(), 6);
        field.move_end();
        assert_eq!(field.cursor(), field.buffer().len());
    }

    #[test]
    fn enter_in_mood_moves_to_body() {
        let mut form = ComposeForm::default();
        form.active_mut().insert_char('x');
        form.insert_newline();
        assert_eq!(form.focus(), ComposeField::Body);
        form.insert_newline();
        assert_eq!(form.body.buffer(), "\n");
        form.clear();
        assert_eq!(form.focus(), ComposeField::Mood);
        assert!(form.mood.is_blank() && form.body.is_blank());
    }

    #[test]
    fn refresh_clamps_the_selection() {
        let repo = ScriptedRepository::new();
        repo.push_list(Ok(vec![entry(1, noon())]));
        let mut state = AppState::new(offset!(UTC));
        state.selected = 5;

        assert!(state.refresh(&repo, 100).expect("refresh"));
        assert_eq!(state.selected, 0);
        state.move_selection(3);
        assert_eq!(state.selected, 0);
    }

    #[test]
    fn failed_refresh_leaves_the_snapshot_alone() {
        let repo = ScriptedRepository::new();
        repo.push_list(Err(RequestError::new("offline")));
        let mut state = AppState::new(offset!(UTC));
        state.snapshot = EntrySnapshot::new(vec![entry(1, noon())]);

        assert!(state.refresh(&repo, 100).is_err());
        assert_eq!(state.entries().len(), 1);
    }
}
