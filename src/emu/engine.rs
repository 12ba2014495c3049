//! Convolution engine.
//!
//! The engine owns every piece of on-chip state for one accelerator
//! instance: control registers, coefficient cache, line buffer bank,
//! accumulators, memory ports and the pipeline clock. Nothing is global,
//! so independent engines can run side by side.
//!
//! # Run Lifecycle
//!
//! ```text
//!          program registers, CTRL.START
//!   Idle ─────────────────────────────► Running ──── last pixel ───► Done
//!    ▲                                   │  │                         │
//!    │                        CTRL.ABORT │  │ error                   │
//!    │                                   ▼  ▼                         │
//!    └────────── CTRL.START ────── Aborted / Faulted ◄── CTRL.START ──┘
//! ```
//!
//! One [`ConvEngine::step`] computes one output pixel of the active filter
//! group, first loading the group's coefficients and fetching whatever
//! input rows the pixel needs. Filter groups are the outermost loop: the
//! image is streamed once per group.
//!
//! # Usage
//!
//! ```ignore
//! let mut engine = ConvEngine::new(EngineConfig::default())?;
//! engine.program(&params)?;
//! engine.start()?;
//! let stats = engine.run(&mut mem)?;
//! ```

use crate::config::EngineConfig;
use crate::device::burst::{BurstInterface, BurstRead, PortKind, PortStats};
use crate::device::coeff_cache::CoefficientCache;
use crate::device::host_memory::{self, HostMemory};
use crate::device::line_buffer::LineBufferBank;
use crate::device::params::{KERNEL_SIZE, KERNEL_TAPS};
use crate::device::registers::{ctrl, offsets, ControlRegisters, RunParams};
use crate::error::{ConvError, Result, StateError};
use crate::fixed::Fixed16;

use super::accumulate::AccumulatorSet;
use super::fuse::{self, OutputSlot};
use super::pipeline::{PipelineClock, StallReason};

/// Engine execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// No run started since creation.
    Idle,
    /// A run is in progress.
    Running,
    /// The last run completed.
    Done,
    /// The last run was cancelled by the host.
    Aborted,
    /// The last run stopped on an error.
    Faulted,
}

impl EngineStatus {
    /// Lower-case name for messages.
    pub fn name(self) -> &'static str {
        match self {
            EngineStatus::Idle => "idle",
            EngineStatus::Running => "running",
            EngineStatus::Done => "done",
            EngineStatus::Aborted => "aborted",
            EngineStatus::Faulted => "faulted",
        }
    }
}

/// Where the engine is in the output stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamPosition {
    /// Active filter group.
    pub group: usize,
    /// Output row of the next pixel.
    pub out_row: usize,
    /// Output column of the next pixel.
    pub out_col: usize,
    /// Next image row to fetch for this group.
    pub next_input_row: usize,
}

impl StreamPosition {
    /// Ordering key; strictly increases with every computed pixel.
    pub fn key(&self) -> (usize, usize, usize) {
        (self.group, self.out_row, self.out_col)
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Cycles from start until the last output write lands.
    pub cycles: u64,
    /// MAC steps issued (each covers every filter lane).
    pub mac_steps: u64,
    /// Cycles compute waited on memory.
    pub stall_cycles: u64,
    /// Stalls by cause.
    pub stalls: Vec<StallReason>,
    /// Output pixels computed, counted once per filter group.
    pub pixels: u64,
    /// Filter groups completed.
    pub groups: usize,
    /// Image rows fetched through the input port.
    pub rows_fetched: u64,
    /// Line buffer rows evicted.
    pub evictions: u64,
    /// Port counters in [`PortKind::ALL`] order.
    pub ports: [PortStats; 4],
}

impl RunStats {
    /// Counters for one port.
    pub fn port(&self, kind: PortKind) -> PortStats {
        let index = PortKind::ALL.iter().position(|&k| k == kind).unwrap_or(0);
        self.ports[index]
    }

    /// Fraction of cycles that issued a MAC step.
    pub fn mac_utilization(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.mac_steps as f64 / self.cycles as f64
        }
    }
}

/// Streaming 3x3 convolution engine.
pub struct ConvEngine {
    config: EngineConfig,
    regs: ControlRegisters,
    cache: CoefficientCache,
    lines: LineBufferBank,
    bus: BurstInterface,
    acc: AccumulatorSet,
    clock: PipelineClock,
    status: EngineStatus,
    params: Option<RunParams>,
    pos: StreamPosition,
    group_active: bool,
    prefetch: Option<(usize, BurstRead)>,
    preloaded: bool,
    pixels: u64,
    groups_done: usize,
    rows_fetched: u64,
    eviction_base: u64,
}

impl ConvEngine {
    /// Build an engine, rejecting invalid configurations.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let bus = BurstInterface::new(config.burst, config.ports.clone())?;

        Ok(Self {
            regs: ControlRegisters::new(),
            cache: CoefficientCache::new(config.max_input_channels, config.filter_group_size),
            lines: LineBufferBank::new(config.max_width, config.max_input_channels),
            acc: AccumulatorSet::new(config.filter_group_size),
            clock: PipelineClock::new(config.mac_latency_cycles, config.fuse_latency_cycles),
            bus,
            config,
            status: EngineStatus::Idle,
            params: None,
            pos: StreamPosition::default(),
            group_active: false,
            prefetch: None,
            preloaded: false,
            pixels: 0,
            groups_done: 0,
            rows_fetched: 0,
            eviction_base: 0,
        })
    }

    /// Engine parameters.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current status.
    pub fn status(&self) -> EngineStatus {
        self.status
    }

    /// True while a run is in progress.
    pub fn is_running(&self) -> bool {
        self.status == EngineStatus::Running
    }

    /// Current stream position.
    pub fn position(&self) -> StreamPosition {
        self.pos
    }

    /// Register file.
    pub fn registers(&self) -> &ControlRegisters {
        &self.regs
    }

    /// Coefficient cache contents.
    pub fn cache(&self) -> &CoefficientCache {
        &self.cache
    }

    /// Parameters of the current or last run.
    pub fn run_params(&self) -> Option<&RunParams> {
        self.params.as_ref()
    }

    /// Read a control register.
    pub fn read_register(&self, offset: u32) -> Result<u32> {
        Ok(self.regs.read(offset)?)
    }

    /// Write a control register.
    ///
    /// Parameter registers are frozen while a run is in progress. Writing
    /// `CTRL.START` launches a run; `CTRL.ABORT` cancels one.
    pub fn write_register(&mut self, offset: u32, value: u32) -> Result<()> {
        if offset != offsets::CTRL {
            if self.is_running() {
                return Err(StateError::EngineBusy.into());
            }
            self.regs.write(offset, value)?;
            return Ok(());
        }

        self.regs.write(offset, value)?;
        if self.regs.take_abort() {
            self.abort();
        }
        if self.regs.take_start() {
            if self.is_running() {
                return Err(StateError::EngineBusy.into());
            }
            self.launch()?;
        }
        Ok(())
    }

    /// Program every parameter register from `params`.
    pub fn program(&mut self, params: &RunParams) -> Result<()> {
        if self.is_running() {
            return Err(StateError::EngineBusy.into());
        }
        self.regs.program(params)?;
        Ok(())
    }

    /// Set `CTRL.START`.
    pub fn start(&mut self) -> Result<()> {
        self.write_register(offsets::CTRL, ctrl::START)
    }

    /// Preload the coefficient cache from the host side.
    ///
    /// The next run uses these for filter group 0 instead of fetching them,
    /// provided the shape matches. Not allowed while a run is in progress.
    pub fn load_coefficients(
        &mut self,
        coefficients: &[Fixed16],
        bias: &[Fixed16],
        input_channels: usize,
    ) -> Result<()> {
        if self.is_running() {
            return Err(StateError::EngineBusy.into());
        }
        self.cache.load(coefficients, bias, input_channels)?;
        self.preloaded = true;
        Ok(())
    }

    /// Cancel the run in progress. No-op when idle.
    pub fn abort(&mut self) {
        if !self.is_running() {
            return;
        }
        log::warn!("run aborted at {:?}", self.pos);
        self.status = EngineStatus::Aborted;
        self.release();
    }

    /// Compute one output pixel.
    ///
    /// Returns `true` while the run has more pixels to compute. Any error
    /// faults the run.
    pub fn step(&mut self, mem: &mut HostMemory) -> Result<bool> {
        if !self.is_running() {
            return Err(StateError::NotRunning { status: self.status.name() }.into());
        }

        match self.advance(mem) {
            Ok(()) => Ok(self.is_running()),
            Err(err) => {
                log::warn!("run faulted at {:?}: {}", self.pos, err);
                self.status = EngineStatus::Faulted;
                self.release();
                Err(err)
            }
        }
    }

    /// Step until the run completes.
    pub fn run(&mut self, mem: &mut HostMemory) -> Result<RunStats> {
        while self.step(mem)? {}

        match self.status {
            EngineStatus::Done => Ok(self.stats()),
            EngineStatus::Aborted => Err(ConvError::Aborted),
            status => Err(StateError::NotRunning { status: status.name() }.into()),
        }
    }

    /// Counters for the current or last run.
    pub fn stats(&self) -> RunStats {
        RunStats {
            cycles: self.clock.cycle,
            mac_steps: self.clock.mac_steps,
            stall_cycles: self.clock.stall_cycles,
            stalls: self.clock.stalls.clone(),
            pixels: self.pixels,
            groups: self.groups_done,
            rows_fetched: self.rows_fetched,
            evictions: self.lines.evictions() - self.eviction_base,
            ports: PortKind::ALL.map(|kind| self.bus.stats(kind)),
        }
    }

    fn launch(&mut self) -> Result<()> {
        let params = self.regs.run_params(&self.config)?;

        self.bus.reset();
        self.clock.reset();
        self.lines.reset();
        self.cache.unlock();
        self.pos = StreamPosition::default();
        self.group_active = false;
        self.prefetch = None;
        self.pixels = 0;
        self.groups_done = 0;
        self.rows_fetched = 0;
        self.eviction_base = self.lines.evictions();
        self.params = Some(params);
        self.status = EngineStatus::Running;
        self.regs.set_busy();

        log::info!(
            "run started: {}x{}x{} -> {} filters in {} group(s)",
            params.height,
            params.width,
            params.in_channels,
            params.out_channels,
            params.groups(self.config.filter_group_size)
        );
        Ok(())
    }

    /// Drop per-run on-chip state after an abort or fault.
    fn release(&mut self) {
        self.cache.unlock();
        self.lines.reset();
        self.group_active = false;
        self.prefetch = None;
        self.regs.set_idle(false);
    }

    fn advance(&mut self, mem: &mut HostMemory) -> Result<()> {
        let params = self
            .params
            .ok_or(StateError::NotRunning { status: self.status.name() })?;

        if !self.group_active {
            self.begin_group(mem, &params)?;
        }
        while self.pos.next_input_row < self.pos.out_row + KERNEL_SIZE {
            self.fetch_row(mem, &params)?;
        }
        self.compute_pixel(mem, &params)?;

        self.pos.out_col += 1;
        if self.pos.out_col < params.out_width() {
            return Ok(());
        }
        self.pos.out_col = 0;
        self.pos.out_row += 1;
        if self.pos.out_row < params.out_height() {
            return Ok(());
        }

        self.end_group(mem);
        self.pos.out_row = 0;
        self.pos.next_input_row = 0;
        self.pos.group += 1;
        if self.pos.group == params.groups(self.config.filter_group_size) {
            self.finish();
        }
        Ok(())
    }

    /// Load the active group's coefficients and bias, lock the cache and
    /// start streaming the image.
    fn begin_group(&mut self, mem: &mut HostMemory, params: &RunParams) -> Result<()> {
        let group = self.pos.group;
        let group_size = self.config.filter_group_size;
        let first = group * group_size;
        let filters = group_size.min(params.out_channels - first);
        let channels = params.in_channels;
        let issue_at = self.clock.cycle;

        // Row 0 streams on the input bundle while coefficients load.
        let row0 = self.read_row(mem, params, 0, issue_at)?;
        self.prefetch = Some((0, row0));

        // A preload covers the first group of one run only.
        let reuse = group == 0
            && std::mem::take(&mut self.preloaded)
            && self.cache.filters() == filters
            && self.cache.input_channels() == channels;
        if reuse {
            log::debug!("group 0: using preloaded coefficients");
        } else {
            let len = filters * channels * KERNEL_TAPS;
            let coeff_addr = host_memory::address_at(params.coeff_addr, first * channels * KERNEL_TAPS)?;
            let bias_addr = host_memory::address_at(params.bias_addr, first)?;

            let coeffs = self.bus.read(PortKind::Coefficients, mem, coeff_addr, len, issue_at)?;
            let bias = self.bus.read(PortKind::Bias, mem, bias_addr, filters, issue_at)?;
            self.clock.wait_for(coeffs.ready_at.max(bias.ready_at), |cycles| {
                StallReason::Coefficients { group, cycles }
            });
            self.cache.load(&coeffs.data, &bias.data, channels)?;
        }

        self.cache.lock()?;
        self.lines.begin_image(params.width, channels)?;
        self.group_active = true;

        log::debug!(
            "group {}: filters {}..{} at cycle {}",
            group,
            first,
            first + filters,
            self.clock.cycle
        );
        Ok(())
    }

    /// Enqueue the next image row, then prefetch the one after it.
    fn fetch_row(&mut self, mem: &mut HostMemory, params: &RunParams) -> Result<()> {
        let row = self.pos.next_input_row;
        let read = match self.prefetch.take() {
            Some((prefetched, read)) if prefetched == row => read,
            _ => self.read_row(mem, params, row, self.clock.cycle)?,
        };

        self.clock.wait_for(read.ready_at, |cycles| StallReason::InputRow { row, cycles });
        self.lines.enqueue_row(&read.data)?;
        self.rows_fetched += 1;
        self.pos.next_input_row += 1;

        let next = row + 1;
        if next < params.height {
            let read = self.read_row(mem, params, next, self.clock.cycle)?;
            self.prefetch = Some((next, read));
        }
        Ok(())
    }

    fn read_row(
        &mut self,
        mem: &mut HostMemory,
        params: &RunParams,
        row: usize,
        issue_at: u64,
    ) -> Result<BurstRead> {
        let len = params.input_row_len();
        let addr = host_memory::address_at(params.input_addr, row * len)?;
        self.bus.read(PortKind::Input, mem, addr, len, issue_at)
    }

    fn compute_pixel(&mut self, mem: &mut HostMemory, params: &RunParams) -> Result<()> {
        self.acc.clear();
        let steps = self.acc.accumulate_pixel(&self.lines, &self.cache, self.pos.out_col)?;
        let last_mac = self.clock.issue_macs(steps);
        let fused_at = self.clock.schedule_fuse(last_mac);

        let slot = OutputSlot::new(
            params.output_addr,
            params.out_width(),
            params.out_channels,
            self.pos.out_row,
            self.pos.out_col,
            self.pos.group * self.config.filter_group_size,
            self.cache.filters(),
        )?;
        fuse::fuse_and_write(self.acc.lanes(), self.cache.bias(), slot, &mut self.bus, mem, fused_at)?;
        self.pixels += 1;
        Ok(())
    }

    fn end_group(&mut self, mem: &mut HostMemory) {
        let drained = self.clock.drained_at();
        let idle = self.bus.flush_output(mem, drained);
        self.cache.unlock();
        self.group_active = false;
        self.prefetch = None;
        self.groups_done += 1;
        log::debug!(
            "group {} complete: compute drained at {}, output idle at {}",
            self.pos.group,
            drained,
            idle
        );
    }

    fn finish(&mut self) {
        let end = self.clock.drained_at().max(self.bus.busy_until(PortKind::Output));
        self.clock.advance_to(end);
        self.status = EngineStatus::Done;
        self.regs.set_idle(true);

        let stats = self.stats();
        log::info!(
            "run done: {} cycles, {} MAC steps, {} stall cycles",
            stats.cycles,
            stats.mac_steps,
            stats.stall_cycles
        );
    }
}
