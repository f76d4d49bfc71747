//! The network front-end: TCP listener, per-session transport tasks and
//! signal handling.
//!
//! Everything runs on a current-thread runtime with a `LocalSet`; the CLI
//! core is single-threaded and shared between tasks via `Rc<RefCell<_>>`.
//! Sessions never block each other: input processing is bounded by the
//! session time slice and leftovers are rescheduled on a short timer.

use crate::{
    client::InputStatus,
    config::Config,
    dispatch::NullDispatcher,
    node::CliNode,
    tty,
};
use anyhow::{Context, Result};
use clap::crate_name;
use log::{debug, info, warn};
use std::{cell::RefCell, env, os::unix::io::AsRawFd, rc::Rc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    signal::unix::{signal, SignalKind},
    task::LocalSet,
    time::{sleep, sleep_until, Instant},
};

/// Delay before deferred session input is processed again.
const PENDING_INPUT_DELAY: Duration = Duration::from_millis(10);

/// Poll interval for flushing output that arrives outside the read path
/// (remote replies, log fan-out).
const FLUSH_POLL_DELAY: Duration = Duration::from_millis(50);

/// Server is the main instance running the CLI service.
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the server until a termination signal arrives.
    pub fn start(self) -> Result<()> {
        self.set_logging_verbosity()
            .context("set logging verbosity")?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build runtime")?;
        let local = LocalSet::new();
        local.block_on(&runtime, self.run())
    }

    /// Initialize the logger and set the verbosity to the provided level.
    fn set_logging_verbosity(&self) -> Result<()> {
        // Set the logging verbosity via the env
        env::set_var(
            "RUST_LOG",
            format!("{}={}", crate_name!(), self.config.log_level()),
        );

        // Initialize the logger
        env_logger::try_init().context("init env logger")
    }

    async fn run(self) -> Result<()> {
        let node = Rc::new(RefCell::new(CliNode::new(Rc::new(NullDispatcher))));
        node.borrow_mut()
            .set_max_connections(self.config.max_connections());
        node.borrow_mut()
            .set_startup_prompt(self.config.startup_prompt());

        if self.config.stdio() {
            return serve_stdio(node).await;
        }

        let listener = TcpListener::bind((self.config.bind_addr(), self.config.port()))
            .await
            .context("bind CLI listener")?;
        info!(
            "CLI server listening on {}",
            listener.local_addr().context("get local address")?
        );

        // Handle shutdown based on signals
        let mut shutdown_terminate = signal(SignalKind::terminate())?;
        let mut shutdown_interrupt = signal(SignalKind::interrupt())?;

        loop {
            tokio::select! {
                res = listener.accept() => {
                    let (stream, peer) = res.context("accept CLI connection")?;
                    let session_id = match node.borrow_mut().add_connection(Some(peer.ip()), true) {
                        Ok(id) => id,
                        Err(e) => {
                            warn!("Cannot accept CLI connection: {}", e);
                            continue;
                        }
                    };
                    tokio::task::spawn_local(serve_session(node.clone(), stream, session_id));
                }
                _ = shutdown_interrupt.recv() => {
                    info!("Got interrupt signal, shutting down server");
                    break;
                }
                _ = shutdown_terminate.recv() => {
                    info!("Got termination signal, shutting down server");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Drain pending session output onto the connection.
async fn flush_output(
    node: &Rc<RefCell<CliNode>>,
    stream: &mut TcpStream,
    session_id: u32,
) -> std::io::Result<()> {
    let out = node.borrow_mut().take_output(session_id);
    if !out.is_empty() {
        stream.write_all(&out).await?;
        stream.flush().await?;
    }
    Ok(())
}

/// Transport loop for one network session.
async fn serve_session(node: Rc<RefCell<CliNode>>, mut stream: TcpStream, session_id: u32) {
    let mut buf = [0u8; 1024];
    let mut resched = false;

    if flush_output(&node, &mut stream, session_id).await.is_err() {
        node.borrow_mut().delete_connection(session_id);
        return;
    }

    loop {
        let watchdog = node.borrow().watchdog_deadline(session_id);
        let watchdog_at = watchdog
            .map(Instant::from_std)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
        let waiting = node
            .borrow()
            .find_cli_by_session_id(session_id)
            .map_or(false, |c| c.is_waiting_for_data());

        let status = tokio::select! {
            res = stream.read(&mut buf) => {
                let n = res.unwrap_or(0);
                if n == 0 {
                    // Peer closed the connection
                    debug!("Session {} closed by peer", session_id);
                    break;
                }
                node.borrow_mut().process_input(session_id, &buf[..n])
            }
            _ = sleep(PENDING_INPUT_DELAY), if resched => {
                node.borrow_mut().process_pending_input(session_id)
            }
            _ = sleep_until(watchdog_at), if watchdog.is_some() => {
                node.borrow_mut().handle_watchdog_expiry(session_id);
                Ok(InputStatus::Continue)
            }
            _ = sleep(FLUSH_POLL_DELAY), if waiting => {
                Ok(InputStatus::Continue)
            }
        };

        match status {
            Ok(s) => resched = s == InputStatus::Resched,
            Err(e) => {
                warn!("Removing client (session ID {}): {}", session_id, e);
                break;
            }
        }

        if flush_output(&node, &mut stream, session_id).await.is_err() {
            break;
        }
    }

    if let Some(mut client) = node.borrow_mut().delete_connection(session_id) {
        let _ = stream.write_all(&client.take_output()).await;
    }
    let _ = stream.shutdown().await;
}

/// Interactive session on the local terminal.
async fn serve_stdio(node: Rc<RefCell<CliNode>>) -> Result<()> {
    let stdin = std::io::stdin();
    let _raw_guard = tty::RawModeGuard::new(stdin.as_raw_fd()).context("set terminal raw mode")?;

    let session_id = node
        .borrow_mut()
        .add_connection(None, false)
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("attach local session")?;
    if let Some((width, height)) = tty::terminal_size(stdin.as_raw_fd()) {
        node.borrow_mut()
            .update_window_size(session_id, width, height);
    }

    let mut input = tokio::io::stdin();
    let mut output = tokio::io::stdout();
    let mut winch = signal(SignalKind::window_change())?;
    let mut shutdown_terminate = signal(SignalKind::terminate())?;
    let mut buf = [0u8; 1024];
    let mut resched = false;

    let out = node.borrow_mut().take_output(session_id);
    output.write_all(&out).await?;
    output.flush().await?;

    loop {
        let status = tokio::select! {
            res = input.read(&mut buf) => {
                let n = res.unwrap_or(0);
                if n == 0 {
                    break;
                }
                node.borrow_mut().process_input(session_id, &buf[..n])
            }
            _ = sleep(PENDING_INPUT_DELAY), if resched => {
                node.borrow_mut().process_pending_input(session_id)
            }
            _ = winch.recv() => {
                if let Some((width, height)) = tty::terminal_size(stdin.as_raw_fd()) {
                    node.borrow_mut().update_window_size(session_id, width, height);
                }
                Ok(InputStatus::Continue)
            }
            _ = shutdown_terminate.recv() => break,
        };

        match status {
            Ok(s) => resched = s == InputStatus::Resched,
            Err(e) => {
                warn!("Closing local session: {}", e);
                break;
            }
        }

        let out = node.borrow_mut().take_output(session_id);
        if !out.is_empty() {
            output.write_all(&out).await?;
            output.flush().await?;
        }
    }

    if let Some(mut client) = node.borrow_mut().delete_connection(session_id) {
        let _ = output.write_all(&client.take_output()).await;
        let _ = output.flush().await;
    }
    Ok(())
}
