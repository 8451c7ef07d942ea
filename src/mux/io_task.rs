//! Link I/O task: the single context that owns a [`Server`].
//!
//! Runs in a dedicated thread using `edge-executor` for cooperative
//! scheduling and `async-io-mini` for reactor-driven timers (no
//! busy-spinning). Two concurrent futures:
//!
//! 1. **Mailbox**: truly async via `Mailbox::take().await`
//!    (wakes instantly when a marshaled link posts a command)
//! 2. **Read**: polls the transport every `read_poll_interval_ms`
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────┐
//!  │  motorlink-io thread                                 │
//!  │  ┌────────────────────────────────────────────────┐  │
//!  │  │  edge_executor::LocalExecutor                  │  │
//!  │  │                                                │  │
//!  │  │  ┌──────────────────┐   ┌──────────────────┐   │  │
//!  │  │  │ Mailbox (async)  │   │ Read poll        │   │  │
//!  │  │  │ wake-on-send     │   │ 1ms ⏱            │   │  │
//!  │  │  └────────┬─────────┘   └────────┬─────────┘   │  │
//!  │  │           └──────▶ Server ◀──────┘             │  │
//!  │  └────────────────────────────────────────────────┘  │
//!  └──────────────────────────────────────────────────────┘
//! ```
//!
//! Both futures run on the same thread, so the server is never touched
//! concurrently and needs no lock.

use core::time::Duration;
use std::thread::JoinHandle;

use anyhow::Context;
use log::info;

use super::channels::{Command, Mailbox};
use super::server::{Server, ServerHandle};
use super::transport::Transport;
use crate::config::LinkConfig;

/// Size of the stack buffer each read poll reads into.
pub const READ_BUF_SIZE: usize = 1024;

/// Pause after a failed read before polling again.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

const THREAD_NAME: &str = "motorlink-io";

// ── Async loops ──────────────────────────────────────────────

/// Read task: drains the transport into the matcher, then sleeps on a
/// reactor timer so the mailbox task can run between ticks.
async fn read_loop<T: Transport + 'static>(server: Server<T>, interval: Duration, chunk: usize) {
    let mut read_buf = [0u8; READ_BUF_SIZE];
    let buf = &mut read_buf[..chunk.clamp(1, READ_BUF_SIZE)];
    loop {
        let pause = match server.poll_transport(buf) {
            Ok(_) => interval,
            Err(_) => READ_ERROR_BACKOFF,
        };
        async_io_mini::Timer::after(pause).await;
    }
}

/// Mailbox task: applies commands in arrival order until `Shutdown`.
async fn mailbox_loop<T: Transport + 'static>(server: Server<T>) {
    loop {
        match server.mailbox().take().await {
            Command::Shutdown => {
                info!("IO: shutdown requested");
                return;
            }
            command => server.dispatch(command),
        }
    }
}

/// Entry point for the I/O thread.
fn run_io_loop<T, F>(server: Server<T>, config: &LinkConfig, setup: F)
where
    T: Transport + 'static,
    F: FnOnce(&Server<T>),
{
    setup(&server);

    let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();
    executor
        .spawn(read_loop(
            server.clone(),
            Duration::from_millis(u64::from(config.read_poll_interval_ms)),
            usize::from(config.read_chunk_size),
        ))
        .detach();

    info!(
        "IO task started on {} @ {} baud (poll {}ms)",
        server.port_name(),
        server.baud_rate(),
        config.read_poll_interval_ms
    );

    // The mailbox loop is the only task that ever finishes; the read poll
    // is dropped with the executor.
    futures_lite::future::block_on(executor.run(mailbox_loop(server.clone())));

    info!("IO task stopped. {}", server.stats());
}

// ── Thread spawn ─────────────────────────────────────────────

/// Running io thread plus the handle used to talk to it.
pub struct IoTask {
    handle: ServerHandle,
    thread: JoinHandle<()>,
}

impl IoTask {
    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    /// Stop after the commands already in the mailbox, then wait for the
    /// thread to exit.
    pub fn shutdown_and_join(self) -> anyhow::Result<()> {
        self.handle
            .shutdown()
            .context("cannot post shutdown to io task")?;
        self.thread
            .join()
            .map_err(|_| anyhow::anyhow!("{THREAD_NAME} thread panicked"))
    }
}

/// Spawn the I/O task in a dedicated thread that takes ownership of
/// `transport`.
///
/// The server is built on the new thread and `setup` runs there before any
/// command is processed, so it may register [`Direct`](super::client::Direct)
/// clients. The returned handle is usable immediately: commands posted
/// before the thread starts wait in the mailbox.
pub fn spawn<T, F>(transport: T, config: &LinkConfig, setup: F) -> anyhow::Result<IoTask>
where
    T: Transport + Send + 'static,
    F: FnOnce(&Server<T>) + Send + 'static,
{
    config.validate().map_err(anyhow::Error::new)?;

    let mailbox = Mailbox::new();
    let handle = ServerHandle::new(mailbox.clone());
    let config = config.clone();

    let thread = std::thread::Builder::new()
        .name(THREAD_NAME.into())
        .spawn(move || {
            let server = Server::with_mailbox(transport, &config, mailbox);
            run_io_loop(server, &config, setup);
        })
        .context("cannot spawn io thread")?;

    Ok(IoTask { handle, thread })
}
