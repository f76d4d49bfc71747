//! Local terminal handling for stdio sessions.

use anyhow::{Context, Result};
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use std::os::unix::io::RawFd;

/// Scoped raw-mode guard.
///
/// Puts the terminal into non-canonical, non-echo mode with signals
/// disabled so control characters are delivered as input, and restores the
/// saved attributes when dropped, on every exit path.
pub struct RawModeGuard {
    fd: RawFd,
    saved: Termios,
}

impl RawModeGuard {
    pub fn new(fd: RawFd) -> Result<Self> {
        let saved = termios::tcgetattr(fd).context("get terminal attributes")?;

        let mut raw = saved.clone();
        raw.local_flags &= !(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(fd, SetArg::TCSADRAIN, &raw).context("set terminal attributes")?;

        Ok(Self { fd, saved })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(self.fd, SetArg::TCSADRAIN, &self.saved) {
            log::error!("Cannot restore terminal attributes: {}", e);
        }
    }
}

/// Query the terminal size of a local TTY; `None` if the descriptor is not
/// a terminal or reports a zero-sized window.
pub fn terminal_size(fd: RawFd) -> Option<(u16, u16)> {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ret = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut size) };
    if ret != 0 || size.ws_col == 0 || size.ws_row == 0 {
        return None;
    }
    Some((size.ws_col, size.ws_row))
}
