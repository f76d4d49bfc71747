//! Keystroke-at-a-time line editor.
//!
//! Network sessions deliver single bytes from the event loop, so the editor
//! is a pure state machine: every byte advances the edit state and returns
//! the echo bytes to transmit. There is no blocking read anywhere.

use crate::error::SessionError;

/// Capacity of the per-session line buffer. One more byte kills the session.
pub const LINE_BUFFER_CAPACITY: usize = 1024;

const HISTORY_CAPACITY: usize = 100;

const CTRL_A: u8 = 0x01;
const CTRL_B: u8 = 0x02;
const CTRL_D: u8 = 0x04;
const CTRL_E: u8 = 0x05;
const CTRL_F: u8 = 0x06;
const CTRL_H: u8 = 0x08;
const CTRL_K: u8 = 0x0b;
const CTRL_L: u8 = 0x0c;
const CTRL_N: u8 = 0x0e;
const CTRL_P: u8 = 0x10;
const CTRL_U: u8 = 0x15;
const CTRL_W: u8 = 0x17;
const ESC: u8 = 0x1b;
const DEL: u8 = 0x7f;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EscapeState {
    None,
    Escape,
    Csi,
}

#[derive(Debug, Eq, PartialEq)]
/// Editor-level outcome of one keystroke.
pub enum EditorEvent {
    /// Keystroke handled; echo bytes may have been produced.
    None,
    /// Ctrl-D on an empty line: the peer is done.
    EndOfInput,
}

/// Line editing state for one session.
pub struct LineEditor {
    buffer: String,
    cursor: usize,
    history: Vec<String>,
    history_pos: Option<usize>,
    stashed_line: String,
    escape: EscapeState,
}

impl Default for LineEditor {
    fn default() -> Self {
        Self {
            buffer: String::new(),
            cursor: 0,
            history: Vec::new(),
            history_pos: None,
            stashed_line: String::new(),
            escape: EscapeState::None,
        }
    }
}

fn backspaces(n: usize) -> String {
    "\u{8}".repeat(n)
}

fn spaces(n: usize) -> String {
    " ".repeat(n)
}

impl LineEditor {
    /// The current edit line.
    pub fn line(&self) -> &str {
        &self.buffer
    }

    /// The cursor position within the edit line.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// True while in the middle of an ANSI escape sequence; callers must not
    /// intercept bytes (like `?`) that belong to the sequence.
    pub fn in_escape_sequence(&self) -> bool {
        self.escape != EscapeState::None
    }

    /// Take the finished line, record it in the history and reset the editor.
    pub fn take_line(&mut self) -> String {
        let line = std::mem::take(&mut self.buffer);
        self.cursor = 0;
        self.history_pos = None;
        self.escape = EscapeState::None;
        if !line.trim().is_empty() {
            if self.history.len() == HISTORY_CAPACITY {
                self.history.remove(0);
            }
            self.history.push(line.clone());
        }
        line
    }

    /// Discard the current line without touching the history.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.history_pos = None;
        self.escape = EscapeState::None;
    }

    /// Echo bytes that repaint prompt and line with the cursor restored.
    pub fn redraw(&self, prompt: &str) -> String {
        let mut out = String::from("\r\u{1b}[K");
        out.push_str(prompt);
        out.push_str(&self.buffer);
        out.push_str(&backspaces(self.buffer.len() - self.cursor));
        out
    }

    /// Insert text at the cursor, as used by word completion.
    pub fn insert_str(&mut self, text: &str) -> Result<String, SessionError> {
        let mut echo = String::new();
        for c in text.chars() {
            echo.push_str(&self.insert_char(c)?);
        }
        Ok(echo)
    }

    /// Advance the editor by one input byte and return the echo bytes.
    pub fn handle_byte(
        &mut self,
        byte: u8,
        prompt: &str,
    ) -> Result<(String, EditorEvent), SessionError> {
        match self.escape {
            EscapeState::Escape => {
                self.escape = if byte == b'[' {
                    EscapeState::Csi
                } else {
                    EscapeState::None
                };
                return Ok((String::new(), EditorEvent::None));
            }
            EscapeState::Csi => {
                let echo = self.handle_csi(byte, prompt);
                return Ok((echo, EditorEvent::None));
            }
            EscapeState::None => (),
        }

        let echo = match byte {
            ESC => {
                self.escape = EscapeState::Escape;
                String::new()
            }
            CTRL_A => self.move_to_start(),
            CTRL_E => self.move_to_end(),
            CTRL_B => self.move_left(),
            CTRL_F => self.move_right(),
            CTRL_H | DEL => self.delete_before_cursor(),
            CTRL_D => {
                if self.buffer.is_empty() {
                    return Ok((String::new(), EditorEvent::EndOfInput));
                }
                self.delete_under_cursor()
            }
            CTRL_K => self.kill_to_end(),
            CTRL_U => self.kill_line(),
            CTRL_W => self.delete_word_before_cursor(),
            CTRL_L => format!("\r\n{}", self.redraw(prompt)),
            CTRL_P => self.history_previous(prompt),
            CTRL_N => self.history_next(prompt),
            0x20..=0x7e => self.insert_char(byte as char)?,
            _ => String::new(),
        };
        Ok((echo, EditorEvent::None))
    }

    fn handle_csi(&mut self, byte: u8, prompt: &str) -> String {
        match byte {
            b'0'..=b'9' | b';' => return String::new(),
            _ => self.escape = EscapeState::None,
        }
        match byte {
            b'A' => self.history_previous(prompt),
            b'B' => self.history_next(prompt),
            b'C' => self.move_right(),
            b'D' => self.move_left(),
            b'~' => self.delete_under_cursor(),
            _ => String::new(),
        }
    }

    fn insert_char(&mut self, c: char) -> Result<String, SessionError> {
        if self.buffer.len() >= LINE_BUFFER_CAPACITY {
            return Err(SessionError::BufferFull);
        }
        self.buffer.insert(self.cursor, c);
        self.cursor += 1;
        if self.cursor == self.buffer.len() {
            Ok(c.to_string())
        } else {
            // Mid-line insert: repaint the tail and restore the cursor
            let tail = &self.buffer[self.cursor - 1..];
            Ok(format!("{}{}", tail, backspaces(tail.len() - 1)))
        }
    }

    fn delete_before_cursor(&mut self) -> String {
        if self.cursor == 0 {
            return String::new();
        }
        self.cursor -= 1;
        self.buffer.remove(self.cursor);
        let tail = self.buffer[self.cursor..].to_string();
        format!("\u{8}{} {}", tail, backspaces(tail.len() + 1))
    }

    fn delete_under_cursor(&mut self) -> String {
        if self.cursor >= self.buffer.len() {
            return String::new();
        }
        self.buffer.remove(self.cursor);
        let tail = self.buffer[self.cursor..].to_string();
        format!("{} {}", tail, backspaces(tail.len() + 1))
    }

    fn delete_word_before_cursor(&mut self) -> String {
        let head = &self.buffer[..self.cursor];
        let trimmed = head.trim_end();
        let word_start = trimmed.rfind(' ').map(|i| i + 1).unwrap_or(0);
        if word_start == self.cursor {
            return String::new();
        }
        let removed = self.cursor - word_start;
        self.buffer.replace_range(word_start..self.cursor, "");
        self.cursor = word_start;
        let tail = self.buffer[self.cursor..].to_string();
        format!(
            "{}{}{}{}",
            backspaces(removed),
            tail,
            spaces(removed),
            backspaces(tail.len() + removed)
        )
    }

    fn kill_to_end(&mut self) -> String {
        let killed = self.buffer.len() - self.cursor;
        self.buffer.truncate(self.cursor);
        format!("{}{}", spaces(killed), backspaces(killed))
    }

    fn kill_line(&mut self) -> String {
        let len = self.buffer.len();
        let echo = format!("{}{}{}", backspaces(self.cursor), spaces(len), backspaces(len));
        self.buffer.clear();
        self.cursor = 0;
        echo
    }

    fn move_to_start(&mut self) -> String {
        let echo = backspaces(self.cursor);
        self.cursor = 0;
        echo
    }

    fn move_to_end(&mut self) -> String {
        let echo = self.buffer[self.cursor..].to_string();
        self.cursor = self.buffer.len();
        echo
    }

    fn move_left(&mut self) -> String {
        if self.cursor == 0 {
            return String::new();
        }
        self.cursor -= 1;
        backspaces(1)
    }

    fn move_right(&mut self) -> String {
        if self.cursor >= self.buffer.len() {
            return String::new();
        }
        let echo = self.buffer[self.cursor..=self.cursor].to_string();
        self.cursor += 1;
        echo
    }

    fn replace_line(&mut self, line: String, prompt: &str) -> String {
        self.buffer = line;
        self.cursor = self.buffer.len();
        self.redraw(prompt)
    }

    fn history_previous(&mut self, prompt: &str) -> String {
        let pos = match self.history_pos {
            None if self.history.is_empty() => return String::new(),
            None => {
                self.stashed_line = self.buffer.clone();
                self.history.len() - 1
            }
            Some(0) => return String::new(),
            Some(p) => p - 1,
        };
        self.history_pos = Some(pos);
        self.replace_line(self.history[pos].clone(), prompt)
    }

    fn history_next(&mut self, prompt: &str) -> String {
        match self.history_pos {
            None => String::new(),
            Some(p) if p + 1 < self.history.len() => {
                self.history_pos = Some(p + 1);
                self.replace_line(self.history[p + 1].clone(), prompt)
            }
            Some(_) => {
                self.history_pos = None;
                let stashed = std::mem::take(&mut self.stashed_line);
                self.replace_line(stashed, prompt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn type_str(editor: &mut LineEditor, text: &str) -> Result<String> {
        let mut echo = String::new();
        for b in text.bytes() {
            let (e, _) = editor.handle_byte(b, "> ")?;
            echo.push_str(&e);
        }
        Ok(echo)
    }

    #[test]
    fn typing_echoes_and_accumulates() -> Result<()> {
        let mut editor = LineEditor::default();
        let echo = type_str(&mut editor, "show version")?;
        assert_eq!(echo, "show version");
        assert_eq!(editor.line(), "show version");
        assert_eq!(editor.cursor(), 12);
        Ok(())
    }

    #[test]
    fn backspace_removes_and_repaints() -> Result<()> {
        let mut editor = LineEditor::default();
        type_str(&mut editor, "shox")?;
        let (echo, _) = editor.handle_byte(0x7f, "> ")?;
        assert_eq!(editor.line(), "sho");
        assert_eq!(echo, "\u{8} \u{8}");
        Ok(())
    }

    #[test]
    fn mid_line_insert_repaints_tail() -> Result<()> {
        let mut editor = LineEditor::default();
        type_str(&mut editor, "shw")?;
        editor.handle_byte(CTRL_B, "> ")?;
        let (echo, _) = editor.handle_byte(b'o', "> ")?;
        assert_eq!(editor.line(), "show");
        assert_eq!(echo, "ow\u{8}");
        assert_eq!(editor.cursor(), 3);
        Ok(())
    }

    #[test]
    fn home_and_end_movement() -> Result<()> {
        let mut editor = LineEditor::default();
        type_str(&mut editor, "abc")?;
        let (echo, _) = editor.handle_byte(CTRL_A, "> ")?;
        assert_eq!(echo, "\u{8}\u{8}\u{8}");
        assert_eq!(editor.cursor(), 0);
        let (echo, _) = editor.handle_byte(CTRL_E, "> ")?;
        assert_eq!(echo, "abc");
        assert_eq!(editor.cursor(), 3);
        Ok(())
    }

    #[test]
    fn ctrl_w_deletes_word() -> Result<()> {
        let mut editor = LineEditor::default();
        type_str(&mut editor, "show version")?;
        editor.handle_byte(CTRL_W, "> ")?;
        assert_eq!(editor.line(), "show ");
        assert_eq!(editor.cursor(), 5);
        Ok(())
    }

    #[test]
    fn ctrl_u_kills_line() -> Result<()> {
        let mut editor = LineEditor::default();
        type_str(&mut editor, "junk")?;
        editor.handle_byte(CTRL_U, "> ")?;
        assert_eq!(editor.line(), "");
        assert_eq!(editor.cursor(), 0);
        Ok(())
    }

    #[test]
    fn history_recall_via_arrows() -> Result<()> {
        let mut editor = LineEditor::default();
        type_str(&mut editor, "first")?;
        editor.take_line();
        type_str(&mut editor, "second")?;
        editor.take_line();

        // Up arrow twice, down once
        type_str(&mut editor, "\u{1b}[A")?;
        assert_eq!(editor.line(), "second");
        type_str(&mut editor, "\u{1b}[A")?;
        assert_eq!(editor.line(), "first");
        type_str(&mut editor, "\u{1b}[B")?;
        assert_eq!(editor.line(), "second");
        Ok(())
    }

    #[test]
    fn take_line_resets_state() -> Result<()> {
        let mut editor = LineEditor::default();
        type_str(&mut editor, "show")?;
        assert_eq!(editor.take_line(), "show");
        assert_eq!(editor.line(), "");
        assert_eq!(editor.cursor(), 0);
        Ok(())
    }

    #[test]
    fn blank_lines_are_not_recorded() -> Result<()> {
        let mut editor = LineEditor::default();
        type_str(&mut editor, "   ")?;
        editor.take_line();
        let echo = type_str(&mut editor, "\u{1b}[A")?;
        assert_eq!(echo, "");
        assert_eq!(editor.line(), "");
        Ok(())
    }

    #[test]
    fn ctrl_d_on_empty_line_ends_input() -> Result<()> {
        let mut editor = LineEditor::default();
        let (_, event) = editor.handle_byte(CTRL_D, "> ")?;
        assert_eq!(event, EditorEvent::EndOfInput);

        type_str(&mut editor, "ab")?;
        editor.handle_byte(CTRL_A, "> ")?;
        let (_, event) = editor.handle_byte(CTRL_D, "> ")?;
        assert_eq!(event, EditorEvent::None);
        assert_eq!(editor.line(), "b");
        Ok(())
    }

    #[test]
    fn buffer_overflow_is_fatal() -> Result<()> {
        let mut editor = LineEditor::default();
        for _ in 0..LINE_BUFFER_CAPACITY {
            editor.handle_byte(b'a', "> ")?;
        }
        let res = editor.handle_byte(b'a', "> ");
        assert!(matches!(res, Err(SessionError::BufferFull)));
        Ok(())
    }
}
