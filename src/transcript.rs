//! Terminal view model: the transcript, the input buffer, and command
//! history navigation.

use chrono::{DateTime, Utc};

use crate::completion::TabState;

/// How a transcript line should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Input,
    Output,
    Error,
    Success,
}

/// One line of the transcript. Append-only after creation; the only
/// mutations are bulk clearing and removal of the transient placeholder.
#[derive(Debug, Clone)]
pub struct Line {
    pub kind: LineKind,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Line {
    pub fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Ordered transcript of everything shown to the user.
#[derive(Debug, Default)]
pub struct Transcript {
    lines: Vec<Line>,
}

impl Transcript {
    /// Append a line, returning its index (used to remove the transient
    /// "executing" placeholder later).
    pub fn push(&mut self, kind: LineKind, text: impl Into<String>) -> usize {
        self.lines.push(Line::new(kind, text));
        self.lines.len() - 1
    }

    pub fn push_line(&mut self, line: Line) -> usize {
        self.lines.push(line);
        self.lines.len() - 1
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn remove(&mut self, index: usize) {
        if index < self.lines.len() {
            self.lines.remove(index);
        }
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Input buffer plus history cursor plus tab state. Keystroke handling
/// lives here; what the keystrokes *do* to the session is the pipeline's
/// business.
#[derive(Debug, Default)]
pub struct Terminal {
    pub transcript: Transcript,
    input: String,
    history: Vec<String>,
    cursor: Option<usize>,
    tab: Option<TabState>,
}

impl Terminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: String) {
        self.input = input;
    }

    /// Insert a typed character. Invalidates tab suggestions but leaves
    /// the history cursor alone.
    pub fn insert_char(&mut self, c: char) {
        self.input.push(c);
        self.tab = None;
    }

    pub fn backspace(&mut self) {
        self.input.pop();
        self.tab = None;
    }

    /// Take the input buffer for submission, recording it in history.
    pub fn take_input(&mut self) -> String {
        let line = std::mem::take(&mut self.input);
        if !line.trim().is_empty() {
            self.history.push(line.clone());
        }
        self.cursor = None;
        self.tab = None;
        line
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Up arrow: move from most-recent toward oldest, saturating at the
    /// oldest entry.
    pub fn history_up(&mut self) {
        self.tab = None;
        if self.history.is_empty() {
            return;
        }
        let next = match self.cursor {
            None => self.history.len() - 1,
            Some(0) => 0,
            Some(i) => i - 1,
        };
        self.cursor = Some(next);
        self.input = self.history[next].clone();
    }

    /// Down arrow: show the entry at the cursor, then step toward the
    /// most recent; once past it, clear the input buffer.
    pub fn history_down(&mut self) {
        self.tab = None;
        let Some(i) = self.cursor else { return };
        if i < self.history.len() {
            self.input = self.history[i].clone();
            self.cursor = Some(i + 1);
        } else {
            self.cursor = None;
            self.input.clear();
        }
    }

    pub fn tab_state(&self) -> Option<&TabState> {
        self.tab.as_ref()
    }

    pub fn tab_state_mut(&mut self) -> Option<&mut TabState> {
        self.tab.as_mut()
    }

    pub fn set_tab_state(&mut self, tab: Option<TabState>) {
        self.tab = tab;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_removal_only_touches_the_given_line() {
        let mut t = Transcript::default();
        t.push(LineKind::Input, "ls");
        let placeholder = t.push(LineKind::Output, "executing...");
        t.push(LineKind::Error, "session expired");
        t.remove(placeholder);
        let texts: Vec<&str> = t.lines().iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["ls", "session expired"]);
    }

    #[test]
    fn clear_empties_the_transcript() {
        let mut t = Transcript::default();
        t.push(LineKind::Output, "a");
        t.push(LineKind::Output, "b");
        t.clear();
        assert!(t.is_empty());
    }

    fn submitted(terminal: &mut Terminal, cmd: &str) {
        terminal.set_input(cmd.to_string());
        terminal.take_input();
    }

    #[test]
    fn history_navigation_walks_back_and_forth() {
        let mut term = Terminal::new();
        submitted(&mut term, "ls");
        submitted(&mut term, "pwd");
        submitted(&mut term, "whoami");

        term.history_up();
        assert_eq!(term.input(), "whoami");
        term.history_up();
        assert_eq!(term.input(), "pwd");
        term.history_up();
        assert_eq!(term.input(), "ls");

        // Before the oldest: no effect.
        term.history_up();
        assert_eq!(term.input(), "ls");

        // Down re-shows the cursor entry before stepping forward.
        term.history_down();
        assert_eq!(term.input(), "ls");
        term.history_down();
        assert_eq!(term.input(), "pwd");
        term.history_down();
        assert_eq!(term.input(), "whoami");

        // Past the most recent: clears the buffer.
        term.history_down();
        assert_eq!(term.input(), "");
    }

    #[test]
    fn up_three_then_down_two_lands_on_the_middle_command() {
        let mut term = Terminal::new();
        submitted(&mut term, "ls");
        submitted(&mut term, "pwd");
        submitted(&mut term, "whoami");

        for _ in 0..3 {
            term.history_up();
        }
        term.history_down();
        term.history_down();
        assert_eq!(term.input(), "pwd");
    }

    #[test]
    fn history_keeps_duplicates_and_skips_blank_lines() {
        let mut term = Terminal::new();
        submitted(&mut term, "ls");
        submitted(&mut term, "   ");
        submitted(&mut term, "ls");
        assert_eq!(term.history(), &["ls".to_string(), "ls".to_string()]);
    }

    #[test]
    fn typing_does_not_move_the_history_cursor() {
        let mut term = Terminal::new();
        submitted(&mut term, "pwd");
        submitted(&mut term, "ls");
        term.history_up();
        term.history_up();
        assert_eq!(term.input(), "pwd");
        term.insert_char('x');
        term.history_down();
        assert_eq!(term.input(), "pwd");
    }
}
