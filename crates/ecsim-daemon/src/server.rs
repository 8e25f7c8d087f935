//! Standalone slave server.
//!
//! [`SlaveServer`] listens on one endpoint and serves one master at a time on
//! a dedicated thread: read a length-prefixed frame, step the simulator, run
//! the frame through an in-process [`SimSocket`], and write the processed
//! frame back. Every blocking wait is bounded by the configured poll interval
//! so [`SlaveServer::stop`] returns within one interval.

use crate::diagnostics::DiagnosticsState;
use crate::endpoint::{parse_endpoint, Endpoint};
use crate::framing::{read_frame, write_frame, Received};
use crate::transport::{Connection, Listener};
use ecsim_bus::devices::{self, El1258};
use ecsim_bus::{NetworkSimulator, SimSocket};
use ecsim_common::config::SimConfig;
use ecsim_common::error::{SimError, SimResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Longest sleep between accept attempts and reply polls.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Build the registry a new connection starts from.
///
/// Slaves get station addresses 1..=N, the configured identity overrides,
/// and device default PDO mappings; the link is up.
#[must_use]
pub fn populate_simulator(config: &SimConfig) -> NetworkSimulator {
    let sim = NetworkSimulator::with_logical_memory(config.logical_memory_size);
    sim.set_latency(config.latency);

    let mut identity = devices::default_identity(config.device);
    if let Some(vendor_id) = config.vendor_id {
        identity.vendor_id = vendor_id;
    }
    if let Some(product_code) = config.product_code {
        identity.product_code = product_code;
    }

    for position in 0..config.slave_count {
        let address = u16::try_from(position + 1).unwrap_or(u16::MAX);
        let mut slave = devices::build_slave(config.device, address, identity);
        if let Some(el) = slave.profile_as_mut::<El1258>() {
            el.apply_default_tx_pdo_mapping();
        }
        slave.refresh_input_mapping();
        sim.add_virtual_slave(slave);
    }
    sim.set_link_up(true);
    sim
}

/// Everything the server thread needs.
struct ServeContext {
    config: SimConfig,
    stop: Arc<AtomicBool>,
    diagnostics: Arc<DiagnosticsState>,
}

impl ServeContext {
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn idle(&self) {
        thread::sleep(IDLE_POLL.min(self.config.poll_interval));
    }
}

/// Running slave server.
pub struct SlaveServer {
    local: Endpoint,
    stop_signal: Arc<AtomicBool>,
    diagnostics: Arc<DiagnosticsState>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SlaveServer {
    /// Parse `config.endpoint`, bind it and start serving.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidEndpoint`] for a malformed endpoint and
    /// [`SimError::Transport`] if binding fails.
    pub fn start(config: &SimConfig) -> SimResult<Self> {
        let endpoint = parse_endpoint(&config.endpoint)?;
        Self::start_at(&endpoint, config)
    }

    /// Bind `endpoint` and start serving; `config.endpoint` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Transport`] if binding fails and
    /// [`SimError::Config`] for an invalid configuration.
    pub fn start_at(endpoint: &Endpoint, config: &SimConfig) -> SimResult<Self> {
        config
            .validate()
            .map_err(|e| SimError::Config(e.to_string()))?;

        let listener = Listener::bind(endpoint)?;
        let local = listener.local_endpoint().clone();
        info!(
            endpoint = %local,
            slaves = config.slave_count,
            device = ?config.device,
            "slave server listening"
        );

        let ctx = ServeContext {
            config: config.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            diagnostics: Arc::new(DiagnosticsState::new()),
        };
        let stop_signal = Arc::clone(&ctx.stop);
        let diagnostics = Arc::clone(&ctx.diagnostics);

        let thread_handle = thread::Builder::new()
            .name("ecsim-server".into())
            .spawn(move || accept_loop(&listener, &ctx))?;

        Ok(Self {
            local,
            stop_signal,
            diagnostics,
            thread_handle: Some(thread_handle),
        })
    }

    /// The bound endpoint (TCP port 0 resolved to the assigned port).
    #[must_use]
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    /// Server counters.
    #[must_use]
    pub fn diagnostics(&self) -> &Arc<DiagnosticsState> {
        &self.diagnostics
    }

    /// Whether the server thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Ask the server thread to stop without waiting for it.
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    /// Stop the server and wait for its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.request_stop();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("server thread panicked");
            }
        }
    }
}

impl Drop for SlaveServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: &Listener, ctx: &ServeContext) {
    while !ctx.stopping() {
        match listener.accept() {
            Ok(Some(mut conn)) => {
                info!("client connected");
                ctx.diagnostics.connection_opened();
                let failed = match serve_connection(&mut conn, ctx) {
                    Ok(()) => false,
                    Err(e) => {
                        warn!(error = %e, "client connection closed with error");
                        true
                    }
                };
                ctx.diagnostics.connection_closed(failed);
                info!(stats = %ctx.diagnostics.snapshot().to_json(), "client disconnected");
            }
            Ok(None) => ctx.idle(),
            Err(e) => {
                error!(error = %e, "accept failed");
                ctx.idle();
            }
        }
    }
    info!("slave server stopped");
}

fn serve_connection(conn: &mut Connection, ctx: &ServeContext) -> SimResult<()> {
    conn.set_timeouts(Some(ctx.config.poll_interval))?;

    let sim = Arc::new(populate_simulator(&ctx.config));
    let socket = SimSocket::new(Arc::clone(&sim));
    let mut reply = vec![0u8; ctx.config.max_frame_size];
    let mut last_stats = Instant::now();

    loop {
        if ctx.stopping() {
            return Ok(());
        }
        let frame = match read_frame(conn, ctx.config.max_frame_size, Some(&ctx.stop))? {
            Received::Frame(frame) => frame,
            Received::Closed | Received::Stopped => return Ok(()),
        };

        sim.run_once();
        let summary = socket.write(&frame)?;
        ctx.diagnostics.record_frame(&summary);
        debug!(
            len = frame.len(),
            datagrams = summary.datagrams,
            wkc = summary.wkc_total,
            "frame processed"
        );

        let n = loop {
            let n = socket.read(&mut reply)?;
            if n > 0 {
                break n;
            }
            if ctx.stopping() {
                return Ok(());
            }
            thread::sleep(IDLE_POLL.min(sim.latency()));
        };

        match write_frame(conn, &reply[..n], Some(&ctx.stop)) {
            Ok(()) => {}
            Err(_) if ctx.stopping() => return Ok(()),
            Err(e) => return Err(e),
        }

        let interval = ctx.config.stats_interval;
        if !interval.is_zero() && last_stats.elapsed() >= interval {
            info!(stats = %ctx.diagnostics.snapshot().to_json(), "server statistics");
            last_stats = Instant::now();
        }
    }
}
