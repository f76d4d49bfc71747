//! Per-session CLI state machine.
//!
//! One `CliClient` exists per connected operator. It consumes decoded
//! terminal bytes one at a time, drives the line editor, dispatches
//! completed lines against the command tree, runs the pipe chain over the
//! produced output and pages it. All output is collected in an internal
//! byte buffer which the transport drains after every call; nothing here
//! performs I/O.

use crate::{
    command::{
        completion::attempt_completion,
        pipe::{PipeKind, PipeModes, PipeStage},
        CommandHandler, CommandRequest, CommandTree, InterruptCallback, NodeId,
    },
    dispatch::CommandDispatcher,
    editor::{EditorEvent, LineEditor},
    error::{DispatchError, RemoteError, SessionError},
    pager::{more_prompt, PageBuffer},
    telnet::{TelnetCodec, TelnetEvent},
    token::{copy_token, has_more_tokens, pop_token, vec_to_line},
};
use log::{debug, trace, warn};
use std::{
    collections::BTreeSet,
    net::{IpAddr, Ipv4Addr},
    rc::Rc,
    time::{Duration, Instant},
};

const CTRL_A: u8 = 0x01;
const CTRL_B: u8 = 0x02;
const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const CTRL_E: u8 = 0x05;
const CTRL_F: u8 = 0x06;
const CTRL_H: u8 = 0x08;
const CTRL_K: u8 = 0x0b;
const CTRL_L: u8 = 0x0c;
const CTRL_N: u8 = 0x0e;
const CTRL_P: u8 = 0x10;
const CTRL_U: u8 = 0x15;
const CTRL_X: u8 = 0x18;

/// Budget for one batch of input processing; leftovers go to
/// `pending_input` and are rescheduled so other sessions make progress.
const INPUT_TIME_SLICE: Duration = Duration::from_millis(1);

/// How long a session waits for a remote command reply before giving up.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

const PAGE_MODE_HELP: &str = "                   SUMMARY OF MORE COMMANDS\n\
\n\
    -- Get Help --\n\
  h                 *  Display this help.\n\
\n\
    -- Scroll Down --\n\
  Enter   Return  j *  Scroll down one line.\n\
  ^M  ^N  DownArrow\n\
  Tab d   ^D  ^X    *  Scroll down one-half screen.\n\
  Space   ^F        *  Scroll down one whole screen.\n\
  ^E  G             *  Scroll down to the bottom of the output.\n\
  N                 *  Display the output all at once instead of one\n\
                       screen at a time. (Same as specifying the\n\
                       | no-more command.)\n\
\n\
    -- Scroll Up --\n\
  k   ^H  ^P        *  Display the previous line of output.\n\
  UpArrow\n\
  u   ^U            *  Scroll up one-half screen.\n\
  b   ^B            *  Scroll up one whole screen.\n\
  ^A  g             *  Scroll up to the top of the output.\n\
\n\
    -- Misc Commands --\n\
  ^L                *  Redraw the output on the screen.\n\
  q   Q   ^C  ^K    *  Interrupt the display of output.\n\
\n";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// Which page buffer is live: regular command output or the pager help.
enum ActivePage {
    Output,
    Help,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
/// What the transport should do after an input batch.
pub enum InputStatus {
    /// All input consumed.
    Continue,
    /// Input remains in `pending_input`; call
    /// [`process_pending_input`](CliClient::process_pending_input) again
    /// after a short delay.
    Resched,
}

/// Snapshot of the command currently being executed, kept for the
/// interrupt path and for correlating remote replies.
struct ExecutedCommand {
    global_name: String,
    args: Vec<String>,
    server_name: String,
    remote: bool,
    interrupt: Option<InterruptCallback>,
}

/// The state of one CLI session.
pub struct CliClient {
    user_name: String,
    term_name: String,
    session_id: u32,
    peer_addr: IpAddr,
    start_time: Instant,
    is_network: bool,

    current_node: NodeId,
    /// The prompt while editing; page mode temporarily replaces
    /// `current_prompt` and this is what gets restored.
    base_prompt: String,
    current_prompt: String,

    editor: LineEditor,
    last_byte_was_cr: bool,

    telnet: Option<TelnetCodec>,
    window_width: u16,
    window_height: u16,

    pipe_stages: Vec<PipeStage>,
    pipe_modes: PipeModes,
    is_pipe_mode: bool,
    buffer_line: String,

    output_page: PageBuffer,
    help_page: PageBuffer,
    active_page: ActivePage,
    is_output_buffer_mode: bool,
    is_help_buffer_mode: bool,
    is_page_mode: bool,
    is_help_mode: bool,
    is_prompt_flushed: bool,

    is_waiting_for_data: bool,
    executed_command: Option<ExecutedCommand>,
    watchdog_deadline: Option<Instant>,
    remote_timeout: Duration,

    pending_input: Vec<u8>,
    out: Vec<u8>,

    is_log_output: bool,

    dispatcher: Rc<dyn CommandDispatcher>,
}

impl CliClient {
    /// Create a session positioned at the tree root with the startup prompt.
    pub fn new(
        root: NodeId,
        startup_prompt: &str,
        is_network: bool,
        dispatcher: Rc<dyn CommandDispatcher>,
    ) -> Self {
        Self {
            user_name: "guest".to_string(),
            term_name: String::new(),
            session_id: !0,
            peer_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            start_time: Instant::now(),
            is_network,
            current_node: root,
            base_prompt: startup_prompt.to_string(),
            current_prompt: startup_prompt.to_string(),
            editor: LineEditor::default(),
            last_byte_was_cr: false,
            telnet: if is_network {
                Some(TelnetCodec::default())
            } else {
                None
            },
            window_width: 80,
            window_height: 24,
            pipe_stages: Vec::new(),
            pipe_modes: PipeModes::default(),
            is_pipe_mode: false,
            buffer_line: String::new(),
            output_page: PageBuffer::default(),
            help_page: PageBuffer::default(),
            active_page: ActivePage::Output,
            is_output_buffer_mode: false,
            is_help_buffer_mode: false,
            is_page_mode: false,
            is_help_mode: false,
            is_prompt_flushed: false,
            is_waiting_for_data: false,
            executed_command: None,
            watchdog_deadline: None,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            pending_input: Vec::new(),
            out: Vec::new(),
            is_log_output: false,
            dispatcher,
        }
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn term_name(&self) -> &str {
        &self.term_name
    }

    pub fn set_term_name(&mut self, v: &str) {
        self.term_name = v.to_string();
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn set_session_id(&mut self, v: u32) {
        self.session_id = v;
    }

    pub fn peer_addr(&self) -> IpAddr {
        self.peer_addr
    }

    pub fn set_peer_addr(&mut self, v: IpAddr) {
        self.peer_addr = v;
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn is_network(&self) -> bool {
        self.is_network
    }

    fn is_interactive(&self) -> bool {
        true
    }

    pub fn is_waiting_for_data(&self) -> bool {
        self.is_waiting_for_data
    }

    pub fn set_is_waiting_for_data(&mut self, v: bool) {
        self.is_waiting_for_data = v;
        if !v {
            self.watchdog_deadline = None;
        }
    }

    pub fn is_log_output(&self) -> bool {
        self.is_log_output
    }

    pub fn set_log_output(&mut self, v: bool) {
        self.is_log_output = v;
    }

    pub fn is_page_mode(&self) -> bool {
        self.is_page_mode
    }

    /// The tree node this session has "cd"-ed into.
    pub fn current_node(&self) -> NodeId {
        self.current_node
    }

    /// Move the session back to the tree root, as done when the node it
    /// was positioned on gets deleted from the tree.
    pub fn reset_to_root(&mut self, tree: &CommandTree) {
        self.set_current_node(tree, tree.root());
    }

    pub fn current_prompt(&self) -> &str {
        &self.current_prompt
    }

    pub fn window_size(&self) -> (u16, u16) {
        (self.window_width, self.window_height)
    }

    /// The instant the remote-reply watchdog fires, while waiting.
    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog_deadline
    }

    pub fn set_remote_timeout(&mut self, v: Duration) {
        self.remote_timeout = v;
    }

    /// Drain the bytes produced since the last call.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    pub fn has_output(&self) -> bool {
        !self.out.is_empty()
    }

    /// Send the telnet option burst, the welcome banner and the first prompt.
    pub fn start_connection(&mut self, banner: &str) {
        if self.is_network {
            let burst = TelnetCodec::initial_negotiation();
            self.out.extend_from_slice(&burst);
        }
        self.cli_print(banner);
        let prompt = self.current_prompt.clone();
        self.cli_print(&prompt);
    }

    /// Honor a window-size update; zero dimensions are rejected with a
    /// printed warning.
    pub fn update_window_size(&mut self, width: u16, height: u16) {
        if width > 0 {
            self.window_width = width;
        } else {
            let msg = format!(
                "Invalid window width ({}); window width unchanged ({})\n",
                width, self.window_width
            );
            self.cli_print(&msg);
        }
        if height > 0 {
            self.window_height = height;
        } else {
            let msg = format!(
                "Invalid window height ({}); window height unchanged ({})\n",
                height, self.window_height
            );
            self.cli_print(&msg);
        }
        trace!(
            "Client window size changed to width = {} height = {}",
            self.window_width,
            self.window_height
        );
    }

    fn is_binary(&self) -> bool {
        self.telnet.as_ref().map_or(false, |t| t.is_binary())
    }

    fn page(&self) -> &PageBuffer {
        match self.active_page {
            ActivePage::Output => &self.output_page,
            ActivePage::Help => &self.help_page,
        }
    }

    fn page_mut(&mut self) -> &mut PageBuffer {
        match self.active_page {
            ActivePage::Output => &mut self.output_page,
            ActivePage::Help => &mut self.help_page,
        }
    }

    fn is_page_buffer_mode(&self) -> bool {
        match self.active_page {
            ActivePage::Output => self.is_output_buffer_mode,
            ActivePage::Help => self.is_help_buffer_mode,
        }
    }

    fn set_page_buffer_mode(&mut self, v: bool) {
        match self.active_page {
            ActivePage::Output => self.is_output_buffer_mode = v,
            ActivePage::Help => self.is_help_buffer_mode = v,
        }
    }

    fn set_page_mode(&mut self, v: bool) {
        if self.is_page_mode != v {
            trace!("Session {} page mode: {}", self.term_name, v);
            self.is_page_mode = v;
        }
    }

    fn process_line_through_pipes(&mut self, line: &mut String) {
        if !self.is_pipe_mode {
            return;
        }
        for stage in self.pipe_stages.iter_mut() {
            stage.process(line);
            if line.is_empty() {
                break;
            }
        }
    }

    /// Print a message to the session.
    ///
    /// Complete lines are fed through the pipe chain; on a terminal `\n`
    /// becomes `\r\n` unless binary mode is on or a `\r` is already there.
    /// While the page buffer is filling, overflowing the window height
    /// switches the session into page mode instead of transmitting.
    ///
    /// An empty message is the EOF sentinel: it pushes any buffered partial
    /// line through the pipe chain.
    pub fn cli_print(&mut self, msg: &str) {
        let is_eof_input = msg.is_empty();
        let mut is_incomplete_last_line = self.page().is_last_line_incomplete();

        // Feed the data through the pipes, one line at a time
        let mut pipe_line = std::mem::take(&mut self.buffer_line);
        let mut pipe_result = String::new();
        for c in msg.chars() {
            pipe_line.push(c);
            if c == '\n' {
                self.process_line_through_pipes(&mut pipe_line);
                pipe_result.push_str(&pipe_line);
                pipe_line.clear();
            }
        }
        if !pipe_line.is_empty() {
            if !self.pipe_stages.is_empty() {
                if is_eof_input {
                    self.process_line_through_pipes(&mut pipe_line);
                } else {
                    // Keep the partial line for the next call
                    self.buffer_line.push_str(&pipe_line);
                    pipe_line.clear();
                }
            }
            pipe_result.push_str(&pipe_line);
        }

        // Carriage-return injection and page buffering
        let chars: Vec<char> = pipe_result.chars().collect();
        let mut chunk = String::new();
        let mut output_string = String::new();
        let width = usize::from(self.window_width);
        let height = usize::from(self.window_height);
        for (i, &c) in chars.iter().enumerate() {
            if c == '\n' && !self.is_binary() && !(i > 0 && chars[i - 1] == '\r') {
                chunk.push('\r');
            }
            chunk.push(c);
            if self.is_page_buffer_mode() && c == '\n' {
                if is_incomplete_last_line {
                    self.page_mut().concat_last_line(&chunk);
                } else {
                    self.page_mut().append_line(chunk.clone());
                }
                if self.page().total_window_lines(width) >= height && !self.pipe_modes.nomore {
                    self.set_page_mode(true);
                } else {
                    if !is_incomplete_last_line {
                        self.page_mut().incr_last_line_n();
                    }
                    output_string.push_str(&chunk);
                }
                chunk.clear();
                is_incomplete_last_line = false;
            }
        }

        if !chunk.is_empty() && self.is_page_buffer_mode() {
            // Buffer the remaining partial line
            if is_incomplete_last_line {
                self.page_mut().concat_last_line(&chunk);
            } else {
                self.page_mut().append_line(chunk.clone());
            }
            if self.page().total_window_lines(width) >= height && !self.pipe_modes.nomore {
                self.set_page_mode(true);
            } else if !is_incomplete_last_line {
                self.page_mut().incr_last_line_n();
            }
        }
        if !(self.is_page_buffer_mode() && self.is_page_mode) && !chunk.is_empty() {
            output_string.push_str(&chunk);
        }

        self.out.extend_from_slice(output_string.as_bytes());
    }

    /// Flush hook for the transport layer; output is collected in-memory,
    /// so there is nothing to do beyond draining [`take_output`](Self::take_output).
    pub fn cli_flush(&mut self) {}

    /// Decode raw connection bytes and process the resulting terminal input.
    pub fn process_input(
        &mut self,
        tree: &mut CommandTree,
        data: &[u8],
    ) -> Result<InputStatus, SessionError> {
        for &byte in data {
            let val = match self.telnet.as_mut() {
                Some(codec) => match codec.decode(byte)? {
                    TelnetEvent::Data(b) => b,
                    TelnetEvent::Consumed => continue,
                    TelnetEvent::WindowSize { width, height } => {
                        self.update_window_size(width, height);
                        continue;
                    }
                },
                None => byte,
            };
            self.pending_input.push(val);
        }
        self.process_pending_input(tree)
    }

    /// Process buffered terminal bytes under the cooperative time slice.
    pub fn process_pending_input(
        &mut self,
        tree: &mut CommandTree,
    ) -> Result<InputStatus, SessionError> {
        let input = std::mem::take(&mut self.pending_input);
        let mut stop_processing = false;
        let slice_start = Instant::now();

        for (idx, &val) in input.iter().enumerate() {
            if val == CTRL_C {
                // Interrupt cancels whatever input was still pending
                self.interrupt_command();
                self.pending_input.clear();
                return Ok(InputStatus::Continue);
            }
            if stop_processing {
                // Keep scanning the rest, primarily to catch Ctrl-C
                continue;
            }

            let mut ignore_current = false;
            if self.is_waiting_for_data && !self.is_page_mode {
                stop_processing = true;
                ignore_current = true;
            }
            if !stop_processing {
                self.process_terminal_byte(tree, val, &mut stop_processing)?;
            }
            if slice_start.elapsed() >= INPUT_TIME_SLICE {
                stop_processing = true;
            }
            if stop_processing {
                let from = if ignore_current { idx } else { idx + 1 };
                if from < input.len() {
                    self.pending_input = input[from..].to_vec();
                }
            }
        }

        if self.pending_input.is_empty() {
            Ok(InputStatus::Continue)
        } else {
            Ok(InputStatus::Resched)
        }
    }

    fn process_terminal_byte(
        &mut self,
        tree: &mut CommandTree,
        val: u8,
        stop_processing: &mut bool,
    ) -> Result<(), SessionError> {
        if self.is_page_mode {
            self.process_char_page_mode(val);
            self.last_byte_was_cr = val == b'\r';
            return Ok(());
        }

        let was_cr = self.last_byte_was_cr;
        self.last_byte_was_cr = val == b'\r';

        match val {
            b'\r' | b'\n' => {
                if val == b'\n' && was_cr {
                    // The LF of a CRLF pair; the CR already ran the command
                    return Ok(());
                }
                self.out.extend_from_slice(b"\r\n");
                let line = self.editor.take_line();
                self.set_page_buffer_mode(true);
                self.process_command(tree, &line);
                self.post_process_command();
                if self.is_waiting_for_data {
                    *stop_processing = true;
                }
                Ok(())
            }
            b'?' if !self.editor.in_escape_sequence() => {
                self.out.push(b'?');
                self.command_line_help(tree);
                let redraw = self.editor.redraw(&self.current_prompt);
                self.out.extend_from_slice(redraw.as_bytes());
                Ok(())
            }
            b'\t' if !self.editor.in_escape_sequence() => self.attempt_word_completion(tree),
            b' ' if !self.editor.in_escape_sequence()
                && tree.is_multi_command_prefix(
                    self.current_node,
                    &self.editor.line()[..self.editor.cursor()],
                ) =>
            {
                self.attempt_word_completion(tree)
            }
            _ => {
                let prompt = self.current_prompt.clone();
                let (echo, event) = self.editor.handle_byte(val, &prompt).map_err(|e| {
                    warn!(
                        "Removing client {}: {}",
                        self.term_name, e
                    );
                    e
                })?;
                self.out.extend_from_slice(echo.as_bytes());
                if event == EditorEvent::EndOfInput {
                    self.cli_print("\nEnd of connection.\n");
                    return Err(SessionError::IoClosed);
                }
                Ok(())
            }
        }
    }

    /// Print contextual help for the current partial line, as done for `?`.
    fn command_line_help(&mut self, tree: &mut CommandTree) {
        let line = self.editor.line()[..self.editor.cursor()].to_string();
        let mut help_strings = BTreeSet::new();
        let mut is_found = false;
        for child in tree.children(self.current_node) {
            is_found |= tree.find_command_help(child, &line, &mut help_strings);
        }
        if is_found {
            self.cli_print("\nPossible completions:\n");
            for help in &help_strings {
                self.cli_print(help);
            }
        } else {
            let msg = format!(
                "\nsyntax error, command \"{}\" is not recognized.\n",
                line.trim()
            );
            self.cli_print(&msg);
        }
    }

    /// Try to extend the word under the cursor; fall back to a listing when
    /// the input is ambiguous or only typed arguments match.
    fn attempt_word_completion(&mut self, tree: &mut CommandTree) -> Result<(), SessionError> {
        let line = self.editor.line()[..self.editor.cursor()].to_string();
        let result = attempt_completion(tree, self.current_node, &line);

        if result.completions.is_empty() && result.type_names.is_empty() {
            self.cli_print("\nNot a XORP command!\n");
            let redraw = self.editor.redraw(&self.current_prompt);
            self.out.extend_from_slice(redraw.as_bytes());
            return Ok(());
        }

        if result.completions.len() == 1 {
            let completion = result.completions[0].clone();
            let insert = format!("{}{}", completion.name_suffix, completion.cont_suffix);
            let echo = self.editor.insert_str(&insert)?;
            self.out.extend_from_slice(echo.as_bytes());
            return Ok(());
        }

        let common = result.common_suffix();
        if !common.is_empty() {
            let echo = self.editor.insert_str(&common)?;
            self.out.extend_from_slice(echo.as_bytes());
            return Ok(());
        }

        if result.is_ambiguous() {
            let mut last_token = String::new();
            let mut rest = line.clone();
            loop {
                let token = pop_token(&mut rest);
                if token.is_empty() {
                    break;
                }
                last_token = token;
            }
            let msg = format!("\n`{}' is ambiguous.\n", last_token);
            self.cli_print(&msg);
            self.cli_print("Possible completions:\n");
            let mut help_strings = BTreeSet::new();
            for child in tree.children(self.current_node) {
                tree.find_command_help(child, &line, &mut help_strings);
            }
            for help in &help_strings {
                self.cli_print(help);
            }
        } else {
            self.command_line_help(tree);
        }
        let redraw = self.editor.redraw(&self.current_prompt);
        self.out.extend_from_slice(redraw.as_bytes());
        Ok(())
    }

    fn set_current_node(&mut self, tree: &CommandTree, id: NodeId) {
        self.current_node = id;
        let cd_prompt = tree.node(id).cd_prompt();
        if !cd_prompt.is_empty() {
            self.base_prompt = cd_prompt.to_string();
            self.current_prompt = cd_prompt.to_string();
        }
        debug!(
            "Session {} now at '{}'",
            self.term_name,
            tree.node(id).global_name_str()
        );
    }

    fn print_caret(&mut self, offset: isize) {
        let n = offset.max(0) as usize;
        let msg = format!("{}^\n", " ".repeat(n));
        self.cli_print(&msg);
    }

    fn print_syntax_error(
        &mut self,
        tree: &mut CommandTree,
        parent: NodeId,
        token: &str,
        offset_next: isize,
    ) {
        let mut offset = offset_next - token.len() as isize;

        // Unknown command: nothing beyond the current node matched
        if parent == self.current_node {
            self.print_caret(offset);
            let msg = format!("{}.\n", DispatchError::UnknownCommand);
            self.cli_print(&msg);
            return;
        }

        if token.is_empty() {
            offset += 1;
        }

        // Command that cannot be executed
        if tree.children(parent).is_empty() {
            let cmd_name = tree.node(parent).global_name_str();
            let error = if token.is_empty() {
                DispatchError::NotExecutable(cmd_name)
            } else {
                DispatchError::BadArgument(cmd_name, token.to_string())
            };
            let msg = format!("syntax error, {}.\n", error);
            self.cli_print(&msg);
            return;
        }

        // Command with invalid sub-parts
        self.print_caret(offset);
        self.cli_print("syntax error, expecting");
        let children = tree.children(parent);
        if children.len() > 4 {
            self.cli_print(" <command>.\n");
            return;
        }
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                self.cli_print(",");
                if i + 1 == children.len() {
                    self.cli_print(" or");
                }
            }
            let msg = format!(" `{}'", tree.node(*child).name());
            self.cli_print(&msg);
        }
        self.cli_print(".\n");
    }

    /// Parse and dispatch one completed command line.
    pub fn process_command(&mut self, tree: &mut CommandTree, command_line: &str) {
        if !has_more_tokens(command_line) {
            // Empty line: no dispatch, the prompt is reprinted afterwards
            return;
        }

        let mut token_line = command_line.to_string();
        let mut parent = self.current_node;
        let mut offset_next = self.current_prompt.len() as isize;
        let mut old_len = token_line.len() as isize;
        let mut command_global_name: Vec<String> = tree.node(parent).global_name().to_vec();
        let mut found_type_match = false;
        let mut last_token = String::new();

        // Walk the tree as far as the tokens match
        loop {
            let token = pop_token(&mut token_line);
            if token.is_empty() {
                break;
            }
            if token != "|" {
                let child = tree.command_find(parent, &token);
                let new_len = token_line.len() as isize;
                offset_next += old_len - new_len;
                old_len = new_len;
                if let Some(child_id) = child {
                    if !tree.node(child_id).is_command_argument() {
                        parent = child_id;
                        found_type_match |= tree.node(child_id).has_type_match();
                        if !found_type_match {
                            command_global_name = tree.node(child_id).global_name().to_vec();
                        } else {
                            // Type-matched tokens become part of the name
                            command_global_name.push(copy_token(&token));
                        }
                        continue;
                    }
                }
            }
            // Put back the token; what follows are arguments or pipes
            token_line = format!("{}{}", copy_token(&token), token_line);
            break;
        }

        if tree.node(parent).handler().is_some() {
            // The rest of the tokens are arguments and pipe commands
            let mut args_vector: Vec<String> = Vec::new();
            let mut pipe_specs: Vec<(String, Vec<String>)> = Vec::new();
            let mut is_process_func_arguments = true;
            let mut is_pipe_command_arguments = false;
            let mut pipe_command_empty = false;
            let mut pipe_command_name = String::new();
            let mut pipe_command_args: Vec<String> = Vec::new();
            loop {
                let token = pop_token(&mut token_line);
                if token.is_empty() {
                    break;
                }
                if token == "|" {
                    if !tree.node(parent).can_pipe() || tree.pipe_node().is_none() {
                        // We cannot use a pipe with this command
                        self.print_syntax_error(tree, parent, &token, offset_next);
                        return;
                    }
                    is_process_func_arguments = false;
                    is_pipe_command_arguments = false;
                    pipe_command_empty = true;
                    if !pipe_command_name.is_empty() {
                        pipe_specs.push((
                            std::mem::take(&mut pipe_command_name),
                            std::mem::take(&mut pipe_command_args),
                        ));
                    }
                    continue;
                }
                if is_process_func_arguments {
                    args_vector.push(token);
                    continue;
                }
                if !is_pipe_command_arguments {
                    is_pipe_command_arguments = true;
                    pipe_command_empty = false;
                    pipe_command_name = token;
                    continue;
                }
                pipe_command_args.push(token);
            }
            if !pipe_command_name.is_empty() {
                pipe_specs.push((pipe_command_name, pipe_command_args));
            }

            if pipe_command_empty {
                // A trailing `|` without a pipe command name
                let pipe_parent = tree.pipe_node().unwrap_or(parent);
                self.print_syntax_error(tree, pipe_parent, &last_token, offset_next);
                return;
            }

            for (name, args) in pipe_specs {
                match PipeKind::from_name(&name) {
                    Some(kind) => self.pipe_stages.push(PipeStage::new(kind, args)),
                    None => warn!("Ignoring unknown pipe command '{}'", name),
                }
            }
            self.is_pipe_mode = !self.pipe_stages.is_empty();

            if tree.node(parent).default_nomore_mode() {
                self.pipe_modes.nomore = true;
            }

            // Start the pipe stages; a failure unwinds the started ones
            let mut start_error = None;
            let mut started = 0;
            for stage in self.pipe_stages.iter_mut() {
                match stage.start(&mut self.pipe_modes) {
                    Ok(()) => started += 1,
                    Err(e) => {
                        start_error = Some(e);
                        break;
                    }
                }
            }
            if let Some(e) = start_error {
                let mut stages = std::mem::take(&mut self.pipe_stages);
                for stage in stages[..started].iter_mut().rev() {
                    stage.stop(&mut self.pipe_modes);
                }
                stages.clear();
                self.is_pipe_mode = false;
                if self.is_interactive() {
                    self.pipe_modes.nomore = false;
                }
                let msg = format!("ERROR: {}\n", e);
                self.cli_print(&msg);
                return;
            }

            let global_name_str = vec_to_line(&command_global_name);
            let server_name = tree.node(parent).server_name().to_string();
            let request = CommandRequest {
                server_name: server_name.clone(),
                term_name: self.term_name.clone(),
                session_id: self.session_id,
                command_global_name: global_name_str.clone(),
                args: args_vector.clone(),
            };
            let handler = tree.node(parent).handler().cloned();
            self.executed_command = Some(ExecutedCommand {
                global_name: global_name_str,
                args: args_vector,
                server_name,
                remote: matches!(handler, Some(CommandHandler::Remote)),
                interrupt: tree.node(parent).interrupt_callback().cloned(),
            });

            match handler {
                Some(CommandHandler::Process(callback)) => match callback(&request) {
                    Ok(text) => self.cli_print(&text),
                    Err(msg) => {
                        let msg = format!("ERROR: {}\n", msg);
                        self.cli_print(&msg);
                    }
                },
                Some(CommandHandler::Remote) => {
                    self.is_waiting_for_data = true;
                    self.watchdog_deadline = Some(Instant::now() + self.remote_timeout);
                    let args_joined = request.args.join(" ");
                    self.dispatcher.send(
                        &request.server_name,
                        &request.server_name,
                        &request.term_name,
                        request.session_id,
                        &request.command_global_name,
                        &args_joined,
                    );
                }
                None => (),
            }
            return;
        }

        // No processing function; test if we can "cd" into the node
        let token = pop_token(&mut token_line);
        if token.is_empty() && tree.node(parent).allow_cd() {
            self.set_current_node(tree, parent);
            return;
        }
        last_token = token;
        self.print_syntax_error(tree, parent, &last_token, offset_next);
    }

    /// Finish a command: flush the pipes, settle pager state and reprint
    /// the prompt. A no-op while a remote reply is still outstanding.
    pub fn post_process_command(&mut self) {
        if self.is_waiting_for_data {
            return;
        }

        self.executed_command = None;

        // EOF: clear out any buffered partial line through the pipes
        self.cli_print("");
        let mut final_string = String::new();
        let mut stages = std::mem::take(&mut self.pipe_stages);
        for stage in stages.iter_mut() {
            stage.process(&mut final_string);
            stage.eof(&mut final_string, &mut self.pipe_modes);
        }
        stages.clear();
        if !final_string.is_empty() {
            let old_pipe_mode = self.is_pipe_mode;
            self.is_pipe_mode = false;
            self.cli_print(&final_string);
            self.is_pipe_mode = old_pipe_mode;
        }
        self.is_pipe_mode = false;

        if self.pipe_modes.hold {
            self.set_page_mode(true);
            self.pipe_modes.hold = false;
        }

        if !self.is_page_mode {
            self.page_mut().reset();
        }
        self.set_page_buffer_mode(false);
        if self.is_page_mode {
            self.current_prompt = more_prompt(self.page()).to_string();
        } else {
            self.page_mut().reset();
            if self.is_interactive() {
                self.pipe_modes.nomore = false;
            }
            self.current_prompt = self.base_prompt.clone();
        }

        self.editor.reset();
        if !self.is_prompt_flushed {
            let prompt = self.current_prompt.clone();
            self.cli_print(&prompt);
        }
        self.is_prompt_flushed = false;
    }

    /// Re-flush the pager prompt while intermediate remote output arrives.
    pub fn flush_process_command_output(&mut self) {
        if !self.is_waiting_for_data || self.is_help_mode {
            return;
        }
        if self.is_page_mode && !self.is_prompt_flushed {
            let old_mode = self.is_page_buffer_mode();
            self.set_page_buffer_mode(false);
            self.current_prompt = more_prompt(self.page()).to_string();
            let prompt = self.current_prompt.clone();
            self.cli_print(&prompt);
            self.set_page_buffer_mode(old_mode);
            self.is_prompt_flushed = true;
        }
    }

    /// Handle a reply from a remote command processor.
    pub fn receive_remote_output(&mut self, text: &str) {
        self.cli_print(text);
        self.set_is_waiting_for_data(false);
        self.post_process_command();
    }

    /// The watchdog fired before the remote processor replied.
    pub fn handle_watchdog_expiry(&mut self) {
        if !self.is_waiting_for_data {
            return;
        }
        warn!("Session {}: {}", self.term_name, RemoteError::NoReply);
        self.set_is_waiting_for_data(false);
        self.cli_print("\nCommand timeout\n");
        self.post_process_command();
    }

    /// Ctrl-C: cancel the executing command (if any) and reset the editor.
    pub fn interrupt_command(&mut self) {
        let was_waiting = self.is_waiting_for_data;
        if was_waiting {
            if let Some(exec) = &self.executed_command {
                let request = CommandRequest {
                    server_name: exec.server_name.clone(),
                    term_name: self.term_name.clone(),
                    session_id: self.session_id,
                    command_global_name: exec.global_name.clone(),
                    args: exec.args.clone(),
                };
                if let Some(callback) = &exec.interrupt {
                    callback(&request);
                } else if exec.remote {
                    self.dispatcher.interrupt(
                        &exec.server_name,
                        &self.term_name,
                        self.session_id,
                        &exec.global_name,
                        &exec.args,
                    );
                }
            }
        }

        // Reset everything about the command
        self.executed_command = None;
        self.pipe_stages.clear();
        self.is_pipe_mode = false;
        self.pipe_modes.hold = false;
        self.set_page_mode(false);
        self.is_help_mode = false;
        self.active_page = ActivePage::Output;
        self.output_page.reset();
        self.help_page.reset();
        self.is_output_buffer_mode = false;
        self.is_help_buffer_mode = false;
        if self.is_interactive() {
            self.pipe_modes.nomore = false;
        }

        if was_waiting {
            self.cli_print("\n");
            self.cli_print("Command interrupted!\n");
        }

        // Ignore the current line; reset buffer, cursor and prompt
        self.current_prompt = self.base_prompt.clone();
        self.cli_print("\n");
        self.editor.reset();
        let redraw = self.editor.redraw(&self.current_prompt);
        self.out.extend_from_slice(redraw.as_bytes());

        self.is_prompt_flushed = false;
        self.set_is_waiting_for_data(false);
    }

    /// Process one input character while in page mode.
    fn process_char_page_mode(&mut self, val: u8) {
        enum After {
            Line,
            Screen,
            Exit,
        }

        let old_page_buffer_mode = self.is_page_buffer_mode();
        let width = usize::from(self.window_width);
        let height = usize::from(self.window_height).max(1);
        let mut restore_prompt = self.base_prompt.clone();

        let mut after = match val {
            b'h' => {
                if !self.is_help_mode {
                    self.is_help_mode = true;
                    self.active_page = ActivePage::Help;
                    self.set_page_buffer_mode(true);
                    self.cli_print(PAGE_MODE_HELP);
                    self.set_page_buffer_mode(false);
                }
                After::Screen
            }
            b'q' | b'Q' | CTRL_K => {
                if self.is_waiting_for_data {
                    self.interrupt_command();
                }
                After::Exit
            }
            b'\n' | b'\r' | b'j' | CTRL_N => {
                if self.page().last_line_n() < self.page().lines_n() {
                    self.set_page_buffer_mode(false);
                    let line = self.page().line(self.page().last_line_n()).to_string();
                    self.cli_print(&line);
                    self.set_page_buffer_mode(old_page_buffer_mode);
                    self.page_mut().incr_last_line_n();
                }
                After::Line
            }
            b'\t' | b'd' | CTRL_D | CTRL_X => {
                self.scroll_down_rows(height / 2, old_page_buffer_mode, width);
                After::Line
            }
            b' ' | CTRL_F => {
                self.scroll_down_rows(height - 1, old_page_buffer_mode, width);
                After::Line
            }
            b'G' | CTRL_E => {
                let n = self.page().lines_n();
                self.page_mut().set_last_line_n(n);
                After::Screen
            }
            b'N' => {
                while self.page().last_line_n() < self.page().lines_n() {
                    self.set_page_buffer_mode(false);
                    let line = self.page().line(self.page().last_line_n()).to_string();
                    self.cli_print(&line);
                    self.set_page_buffer_mode(old_page_buffer_mode);
                    self.page_mut().incr_last_line_n();
                }
                After::Line
            }
            b'k' | CTRL_H | CTRL_P => {
                self.page_mut().decr_last_line_n();
                After::Screen
            }
            b'u' | CTRL_U => {
                if self.page().last_line_n() > 0 {
                    let start =
                        self.page()
                            .first_line_for_window(self.page().last_line_n(), height / 2, width);
                    self.page_mut().set_last_line_n(start);
                }
                After::Screen
            }
            b'b' | CTRL_B => {
                if self.page().last_line_n() > 0 {
                    let start = self.page().first_line_for_window(
                        self.page().last_line_n(),
                        height - 1,
                        width,
                    );
                    self.page_mut().set_last_line_n(start);
                }
                After::Screen
            }
            b'g' | CTRL_A => {
                self.page_mut().set_last_line_n(0);
                After::Screen
            }
            CTRL_L => After::Screen,
            _ => After::Line,
        };

        loop {
            match after {
                After::Exit => {
                    self.page_mut().reset();
                    if self.is_interactive() {
                        self.pipe_modes.nomore = false;
                    }
                    if !self.is_help_mode {
                        self.set_page_mode(false);
                        self.editor.reset();
                        restore_prompt = self.base_prompt.clone();
                        after = After::Line;
                    } else {
                        // Leave the help pager, back to the real output
                        self.is_help_mode = false;
                        self.active_page = ActivePage::Output;
                        after = After::Screen;
                    }
                }
                After::Screen => {
                    let old_mode = self.is_page_buffer_mode();
                    self.set_page_buffer_mode(false);
                    // Clean up the previous window
                    for _ in 0..height.saturating_sub(1) {
                        self.cli_print("\n");
                    }
                    let start = if self.page().last_line_n() > 0 {
                        self.page().first_line_for_window(
                            self.page().last_line_n(),
                            height - 1,
                            width,
                        )
                    } else {
                        0
                    };
                    self.page_mut().set_last_line_n(start);
                    let mut rows = 0;
                    while rows <= height - 1 {
                        if self.page().last_line_n() >= self.page().lines_n() {
                            break;
                        }
                        rows += self
                            .page()
                            .window_lines_n(self.page().last_line_n(), width);
                        if rows > height - 1 {
                            break;
                        }
                        let line = self.page().line(self.page().last_line_n()).to_string();
                        self.cli_print(&line);
                        self.page_mut().incr_last_line_n();
                    }
                    // Fill up the rest of the window
                    while rows < height.saturating_sub(1) {
                        self.cli_print("\n");
                        rows += 1;
                    }
                    self.set_page_buffer_mode(old_mode);
                    after = After::Line;
                }
                After::Line => {
                    if self.is_page_mode {
                        restore_prompt = more_prompt(self.page()).to_string();
                    }
                    self.current_prompt = restore_prompt;
                    let repaint = format!("\r\u{1b}[K{}", self.current_prompt);
                    self.out.extend_from_slice(repaint.as_bytes());
                    return;
                }
            }
        }
    }

    fn scroll_down_rows(&mut self, max_rows: usize, old_page_buffer_mode: bool, width: usize) {
        let mut rows = 0;
        while rows <= max_rows {
            if self.page().last_line_n() >= self.page().lines_n() {
                break;
            }
            rows += self.page().window_lines_n(self.page().last_line_n(), width);
            if rows > max_rows {
                break;
            }
            self.set_page_buffer_mode(false);
            let line = self.page().line(self.page().last_line_n()).to_string();
            self.cli_print(&line);
            self.set_page_buffer_mode(old_page_buffer_mode);
            self.page_mut().incr_last_line_n();
        }
    }
}
