//! Output pagination buffer.
//!
//! Buffered output is kept as logical lines; a logical line may wrap to
//! several terminal rows depending on the window width, and all scroll
//! arithmetic works on terminal rows.

pub const MORE_PROMPT: &str = " --More-- ";
pub const MORE_PROMPT_END: &str = " --More-- (END) ";

#[derive(Debug, Default)]
/// Buffered output lines plus the index of the next line to display.
pub struct PageBuffer {
    lines: Vec<String>,
    last_line: usize,
}

impl PageBuffer {
    /// Number of buffered logical lines.
    pub fn lines_n(&self) -> usize {
        self.lines.len()
    }

    /// Index of the next line to display.
    pub fn last_line_n(&self) -> usize {
        self.last_line
    }

    pub fn set_last_line_n(&mut self, v: usize) {
        self.last_line = v;
    }

    pub fn incr_last_line_n(&mut self) {
        self.last_line += 1;
    }

    pub fn decr_last_line_n(&mut self) {
        if self.last_line > 0 {
            self.last_line -= 1;
        }
    }

    pub fn line(&self, n: usize) -> &str {
        &self.lines[n]
    }

    pub fn append_line(&mut self, line: String) {
        self.lines.push(line);
    }

    /// Concatenate onto the last buffered line, which must be incomplete.
    pub fn concat_last_line(&mut self, chunk: &str) {
        if let Some(last) = self.lines.last_mut() {
            last.push_str(chunk);
        }
    }

    /// True if the last buffered line has no trailing newline yet.
    pub fn is_last_line_incomplete(&self) -> bool {
        self.lines
            .last()
            .map_or(false, |l| !l.is_empty() && !l.ends_with('\n'))
    }

    pub fn reset(&mut self) {
        self.lines.clear();
        self.last_line = 0;
    }

    /// Terminal rows needed for one buffered line. Trailing `\r` and `\n`
    /// are not counted; a pure-newline line still occupies one row.
    pub fn window_lines_n(&self, line_n: usize, width: usize) -> usize {
        let width = width.max(1);
        let line = &self.lines[line_n];
        let mut size = line.len();
        let mut has_newline = false;
        while size > 0 {
            let c = line.as_bytes()[size - 1];
            if c == b'\r' || c == b'\n' {
                size -= 1;
                has_newline = true;
                continue;
            }
            break;
        }
        let mut rows = size / width + usize::from(size % width != 0);
        if size == 0 && has_newline {
            rows += 1;
        }
        rows
    }

    /// Terminal rows needed for the whole buffer.
    pub fn total_window_lines(&self, width: usize) -> usize {
        (0..self.lines.len())
            .map(|i| self.window_lines_n(i, width))
            .sum()
    }

    /// Terminal rows occupied up to (and excluding) the next display line.
    pub fn displayed_window_lines(&self, width: usize) -> usize {
        (0..self.last_line)
            .map(|i| self.window_lines_n(i, width))
            .sum()
    }

    /// Walk backwards from `last_line_n` to find the first buffer line so
    /// that the covered lines fit into `max_window_size` terminal rows.
    pub fn first_line_for_window(
        &self,
        last_line_n: usize,
        max_window_size: usize,
        width: usize,
    ) -> usize {
        if last_line_n == 0 {
            return 0;
        }
        let mut first = last_line_n - 1;
        let mut window_size = self.window_lines_n(first, width);
        while window_size < max_window_size {
            if first == 0 {
                break;
            }
            window_size += self.window_lines_n(first - 1, width);
            if window_size > max_window_size {
                break;
            }
            first -= 1;
        }
        first
    }
}

/// The prompt to show while paging, depending on remaining output.
pub fn more_prompt(buffer: &PageBuffer) -> &'static str {
    if buffer.last_line_n() < buffer.lines_n() {
        MORE_PROMPT
    } else {
        MORE_PROMPT_END
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(lines: &[&str]) -> PageBuffer {
        let mut buffer = PageBuffer::default();
        for l in lines {
            buffer.append_line(l.to_string());
        }
        buffer
    }

    #[test]
    fn short_line_is_one_row() {
        let buffer = buffer_with(&["hello\r\n"]);
        assert_eq!(buffer.window_lines_n(0, 80), 1);
    }

    #[test]
    fn long_line_wraps() {
        let line = format!("{}\r\n", "x".repeat(100));
        let buffer = buffer_with(&[&line]);
        assert_eq!(buffer.window_lines_n(0, 80), 2);
        assert_eq!(buffer.window_lines_n(0, 100), 1);
        assert_eq!(buffer.window_lines_n(0, 25), 4);
    }

    #[test]
    fn pure_newline_counts_one_row() {
        let buffer = buffer_with(&["\r\n"]);
        assert_eq!(buffer.window_lines_n(0, 80), 1);
    }

    #[test]
    fn empty_line_counts_zero_rows() {
        let buffer = buffer_with(&[""]);
        assert_eq!(buffer.window_lines_n(0, 80), 0);
    }

    #[test]
    fn zero_width_does_not_divide_by_zero() {
        let buffer = buffer_with(&["abc\n"]);
        assert_eq!(buffer.window_lines_n(0, 0), 3);
    }

    #[test]
    fn total_rows_sum_over_lines() {
        let long = format!("{}\n", "y".repeat(90));
        let buffer = buffer_with(&["a\n", &long, "b\n"]);
        assert_eq!(buffer.total_window_lines(80), 4);
    }

    #[test]
    fn first_line_for_window_walks_back() {
        let buffer = buffer_with(&["1\n", "2\n", "3\n", "4\n", "5\n"]);
        // A window of three rows above line five starts at line three
        assert_eq!(buffer.first_line_for_window(5, 3, 80), 2);
        assert_eq!(buffer.first_line_for_window(0, 3, 80), 0);
    }

    #[test]
    fn first_line_for_window_respects_wrapping() {
        let long = format!("{}\n", "z".repeat(160));
        let buffer = buffer_with(&["1\n", &long, "3\n"]);
        // The wrapped line occupies two rows, filling a two-row window alone
        assert_eq!(buffer.first_line_for_window(3, 2, 80), 2);
    }

    #[test]
    fn incomplete_line_tracking() {
        let mut buffer = buffer_with(&["done\n"]);
        assert!(!buffer.is_last_line_incomplete());
        buffer.append_line("partial".into());
        assert!(buffer.is_last_line_incomplete());
        buffer.concat_last_line(" rest\n");
        assert!(!buffer.is_last_line_incomplete());
        assert_eq!(buffer.line(1), "partial rest\n");
    }

    #[test]
    fn more_prompt_tracks_position() {
        let mut buffer = buffer_with(&["a\n", "b\n"]);
        assert_eq!(more_prompt(&buffer), MORE_PROMPT);
        buffer.set_last_line_n(2);
        assert_eq!(more_prompt(&buffer), MORE_PROMPT_END);
    }
}
