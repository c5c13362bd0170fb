//! The top-level Dreamcast aggregate: owns both CPUs, both memory maps, the
//! two clock domains, and every device, and drives them in lock-step one
//! frame at a time.
//!
//! Every device that needs to be reachable from more than one place (both
//! memory-map windows, or a scheduled closure that outlives the borrow of
//! `self`) is held as an `Rc<RefCell<T>>` here and handed out as a clone —
//! the same pattern `dc_core`'s own memory map uses internally for
//! exactly this reason (see `memmap::Region` and its blanket `RegionOps`
//! impl for `Rc<RefCell<T>>`).

use std::cell::RefCell;
use std::rc::Rc;

use dc_core::core::machine::Emulator;
use dc_core::cpu::arm7::ExceptionSource;
use dc_core::cpu::sh4::IrlLevel;
use dc_core::cpu::{Arm7, Cpu, Sh4};
use dc_core::device::aica::{AicaWaveRamView, HostInterruptDelay};
use dc_core::device::gdrom::{GdromDataWindow, GdromDmaWindow, Mount, NoDiscMount};
use dc_core::device::graphics_iface::{AudioSink, NullAudioSink, NullGraphicsSink, TaFifoSink};
use dc_core::device::holly::{DmaEngine, DmaRequest, ExternalSource, NormalSource};
use dc_core::device::{Aica, GdromDrive, Holly};
use dc_core::error::{CoreError, CoreResult, TerminationReason};
use dc_core::memmap::{LinearStore, MemoryMap, RegionKind, RegionOps, UnmappedPolicy};
use dc_core::scheduler::{self, Clock, CycleStamp};

const HOST_CPU_HZ: u64 = 200_000_000;
const AUDIO_CPU_HZ: u64 = 33_868_800;
const FRAME_HZ: u64 = 60;

const MAIN_RAM_SIZE: usize = 16 * 1024 * 1024;
const WAVE_RAM_SIZE: usize = 2 * 1024 * 1024;
const BOOT_ROM_SIZE: usize = 2 * 1024 * 1024;
const FLASH_SIZE: usize = 0x20000;
const ONCHIP_RAM_SIZE: usize = 0x2000;

const HOST_HOUSEKEEPING_PERIOD: CycleStamp = HOST_CPU_HZ / 100;
const AUDIO_HOUSEKEEPING_PERIOD: CycleStamp = AUDIO_CPU_HZ / 100;

/// Real SH4 upper-address-space addressing folds away the top 3 bits for
/// every cached/uncached mirror of the same physical map; the one region
/// the spec calls out as reachable specifically through all three being
/// set (on-chip RAM) still lands in the same masked range under this one
/// mask, so it needs no special-casing.
const HOST_ADDR_MASK: u32 = 0x1fff_ffff;

/// Sort-DMA's real-hardware completion latency isn't specified the way
/// Channel-2's bandwidth curve is; a fixed nominal delay stands in for it.
const SORT_DMA_COMPLETION_CYCLES: CycleStamp = 200;

/// Placeholder for host-CPU windows this core does not model device
/// behavior for (maple, expansion bus 2, the graphics core/DMA registers,
/// the real-time clock, and the two raw PVR memory windows) but that boot
/// code still probes without expecting a fault.
#[derive(Default)]
struct StubRegion;

impl RegionOps for StubRegion {
    fn read8(&mut self, _offset: u32) -> CoreResult<u8> {
        Ok(0)
    }
    fn read16(&mut self, _offset: u32) -> CoreResult<u16> {
        Ok(0)
    }
    fn read32(&mut self, _offset: u32) -> CoreResult<u32> {
        Ok(0)
    }
    fn write8(&mut self, _offset: u32, _val: u8) -> CoreResult<()> {
        Ok(())
    }
    fn write16(&mut self, _offset: u32, _val: u16) -> CoreResult<()> {
        Ok(())
    }
    fn write32(&mut self, _offset: u32, _val: u32) -> CoreResult<()> {
        Ok(())
    }
}

/// The whole machine: two CPUs, two memory maps, two clocks, and the
/// devices they share, all owned in one place. The top-level emulator
/// value exclusively owns the two CPUs, the scheduler, both memory maps,
/// all backing stores, all devices.
pub struct Dreamcast {
    sh4: Sh4,
    arm7: Arm7,
    host_mem: MemoryMap,
    audio_mem: MemoryMap,
    host_clock: Clock<()>,
    audio_clock: Clock<()>,

    main_ram: Rc<RefCell<LinearStore>>,
    holly: Rc<RefCell<Holly>>,
    gdrom: Rc<RefCell<GdromDrive>>,
    aica: Rc<RefCell<Aica>>,

    graphics: Box<dyn TaFifoSink>,
    audio_sink: Box<dyn AudioSink>,

    /// Set by a dispatch or scheduled closure that can't propagate a
    /// `Result` directly back through `run_timeslice`; drained once per
    /// `run_frame` iteration.
    fatal: Rc<RefCell<Option<CoreError>>>,

    /// Tracks whether a GD-ROM DMA completion event is already scheduled,
    /// so `drain_gdrom` doesn't arm a second one while `dma_pending` stays
    /// true across several frame-loop iterations.
    gdrom_dma_armed: bool,
    /// Shadow of `aica.arm_reset`, to detect the falling edge that should
    /// re-enable the audio CPU: ARM_RST acts as the audio CPU's
    /// external reset line.
    arm_was_reset: bool,
    kill_requested: bool,
    next_frame_boundary: CycleStamp,
}

impl Dreamcast {
    pub fn new(boot_rom: Vec<u8>, flash: Vec<u8>) -> Self {
        Self::with_mount(boot_rom, flash, Box::new(NoDiscMount))
    }

    pub fn with_mount(mut boot_rom: Vec<u8>, mut flash: Vec<u8>, mount: Box<dyn Mount>) -> Self {
        boot_rom.resize(BOOT_ROM_SIZE, 0);
        flash.resize(FLASH_SIZE, 0);

        let main_ram = Rc::new(RefCell::new(LinearStore::new("main ram", MAIN_RAM_SIZE, false)));
        let holly = Rc::new(RefCell::new(Holly::new()));
        let gdrom = Rc::new(RefCell::new(GdromDrive::new(mount)));
        let aica = Rc::new(RefCell::new(Aica::new(WAVE_RAM_SIZE)));

        let mut host_mem = MemoryMap::new(UnmappedPolicy::Fatal);
        register_host_regions(&mut host_mem, &main_ram, &holly, &gdrom, &aica, boot_rom, flash);

        let mut audio_mem = MemoryMap::new(UnmappedPolicy::SilentZero);
        register_audio_regions(&mut audio_mem, &aica);

        Self {
            sh4: Sh4::new(),
            arm7: Arm7::new(),
            host_mem,
            audio_mem,
            host_clock: Clock::new(HOST_HOUSEKEEPING_PERIOD),
            audio_clock: Clock::new(AUDIO_HOUSEKEEPING_PERIOD),
            main_ram,
            holly,
            gdrom,
            aica,
            graphics: Box::new(NullGraphicsSink),
            audio_sink: Box::new(NullAudioSink),
            fatal: Rc::new(RefCell::new(None)),
            gdrom_dma_armed: false,
            arm_was_reset: true,
            kill_requested: false,
            next_frame_boundary: HOST_CPU_HZ / FRAME_HZ,
        }
    }

    pub fn set_graphics_sink(&mut self, sink: Box<dyn TaFifoSink>) {
        self.graphics = sink;
    }

    pub fn set_audio_sink(&mut self, sink: Box<dyn AudioSink>) {
        self.audio_sink = sink;
    }

    /// Run the host CPU until the next event horizon on `host_clock`,
    /// checking Holly's encoded interrupt line once per instruction (spec
    /// §4.1 "Event firing order", §4.3 "Contract").
    fn pump_host(&mut self) {
        let sh4 = &mut self.sh4;
        let host_mem = &mut self.host_mem;
        let holly = self.holly.clone();
        let fatal = self.fatal.clone();

        scheduler::run_timeslice(&mut self.host_clock, &mut (), |_, countdown| {
            let mut consumed: CycleStamp = 0;
            while consumed < countdown {
                if let Some(priority) = holly.borrow().intc.encoded_level() {
                    sh4.signal_interrupt(IrlLevel(priority as u8));
                }
                match sh4.do_exec_inst(host_mem) {
                    Ok(cycles) => consumed += cycles as CycleStamp,
                    Err(e) => {
                        *fatal.borrow_mut() = Some(e);
                        break;
                    }
                }
            }
            consumed
        });
    }

    /// Run the audio CPU the same way, additionally pumping AICA's sample
    /// generator after every tick that actually advanced: the owning
    /// aggregate always calls it from the audio clock's tick.
    fn pump_audio(&mut self) {
        let arm7 = &mut self.arm7;
        let audio_mem = &mut self.audio_mem;
        let aica = self.aica.clone();
        let fatal = self.fatal.clone();
        let audio_sink: &mut dyn AudioSink = self.audio_sink.as_mut();

        scheduler::run_timeslice(&mut self.audio_clock, &mut (), |_, countdown| {
            let mut consumed: CycleStamp = 0;
            while consumed < countdown {
                if aica.borrow().audio_fiq_asserted().is_some() {
                    arm7.raise(ExceptionSource::Fiq);
                }
                match arm7.tick(audio_mem) {
                    Ok(cycles) => {
                        consumed += cycles as CycleStamp;
                        aica.borrow_mut().advance(cycles as CycleStamp, AUDIO_CPU_HZ, audio_sink);
                    }
                    Err(e) => {
                        *fatal.borrow_mut() = Some(e);
                        break;
                    }
                }
            }
            consumed
        });
    }

    /// Carry out any DMA Holly's register writes latched this timeslice —
    /// the register-ops path only has a typed context pointer, never main
    /// RAM itself, so the actual transfer happens here.
    fn drain_holly_dma(&mut self) {
        let Some(request) = self.holly.borrow_mut().pending_dma.take() else {
            return;
        };

        let main_ram = self.main_ram.clone();
        let outcome: CoreResult<(NormalSource, CycleStamp)> = match request {
            DmaRequest::Channel2 { src, len, dest } => {
                let ram = main_ram.borrow();
                self.holly
                    .borrow_mut()
                    .ch2_dma
                    .start(&ram.data, src & 0x00ff_ffff, dest, len, self.graphics.as_mut(), HOST_CPU_HZ as f64)
                    .map(|latency| (NormalSource::Channel2DmaComplete, latency))
            }
            DmaRequest::Sort { table_addr } => {
                let ram = main_ram.borrow();
                self.holly
                    .borrow_mut()
                    .sort_dma
                    .run(&ram.data, table_addr & 0x00ff_ffff, self.graphics.as_mut())
                    .map(|_words_streamed| (NormalSource::SortDmaComplete, SORT_DMA_COMPLETION_CYCLES))
            }
        };

        match outcome {
            Ok((source, latency)) => {
                let engine = match source {
                    NormalSource::Channel2DmaComplete => DmaEngine::Channel2,
                    NormalSource::SortDmaComplete => DmaEngine::Sort,
                    NormalSource::GdromDmaComplete => unreachable!("gdrom completes via drain_gdrom"),
                };
                self.holly.borrow_mut().clear_dma_start_bit(engine);
                let holly = self.holly.clone();
                self.host_clock.schedule_after(latency, move |_, _| {
                    holly.borrow_mut().intc.raise_normal(source);
                });
            }
            Err(e) => *self.fatal.borrow_mut() = Some(e),
        }
    }

    /// Drain the GD-ROM drive's two independent cross-clock latches: a
    /// delayed command-completion event, and a DMA transfer the drive has
    /// started but can't itself carry out (same "no access to main RAM or
    /// the host clock" split as Holly's DMA engines).
    fn drain_gdrom(&mut self) {
        let scheduled = self.gdrom.borrow_mut().pending_schedule.take();
        if let Some(delay) = scheduled {
            let gdrom = self.gdrom.clone();
            let holly = self.holly.clone();
            self.host_clock.schedule_after(delay, move |_, _| {
                gdrom.borrow_mut().fire_delayed_event();
                holly.borrow_mut().intc.raise_external(ExternalSource::Gdrom);
            });
        }

        let dma_pending = self.gdrom.borrow().dma_pending;
        if dma_pending && !self.gdrom_dma_armed {
            self.gdrom_dma_armed = true;
            let delay = self.gdrom.borrow().dma.delay;
            let gdrom = self.gdrom.clone();
            let holly = self.holly.clone();
            let main_ram = self.main_ram.clone();
            let fatal = self.fatal.clone();
            self.host_clock.schedule_after(delay, move |_, _| {
                let result = gdrom.borrow_mut().complete_dma(&mut main_ram.borrow_mut().data);
                match result {
                    Ok(_bytes) => {
                        gdrom.borrow_mut().fire_delayed_event();
                        holly.borrow_mut().intc.raise_normal(NormalSource::GdromDmaComplete);
                    }
                    Err(e) => *fatal.borrow_mut() = Some(e),
                }
            });
        } else if !dma_pending {
            self.gdrom_dma_armed = false;
        }
    }

    /// Drain AICA's latched host-interrupt raise and resync the audio
    /// CPU's enable state from `arm_reset`'s falling edge.
    fn drain_aica(&mut self) {
        let pending = self.aica.borrow_mut().pending_host_interrupt.take();
        if let Some(HostInterruptDelay { delay }) = pending {
            let holly = self.holly.clone();
            self.host_clock.schedule_after(delay, move |_, _| {
                holly.borrow_mut().intc.raise_external(ExternalSource::Aica);
            });
        }

        let arm_reset = self.aica.borrow().arm_reset;
        if self.arm_was_reset && !arm_reset {
            self.arm7.enable();
        }
        self.arm_was_reset = arm_reset;
    }
}

#[allow(clippy::too_many_arguments)]
fn register_host_regions(
    mem: &mut MemoryMap,
    main_ram: &Rc<RefCell<LinearStore>>,
    holly: &Rc<RefCell<Holly>>,
    gdrom: &Rc<RefCell<GdromDrive>>,
    aica: &Rc<RefCell<Aica>>,
    boot_rom: Vec<u8>,
    flash: Vec<u8>,
) {
    mem.add_region(
        0x0000_0000,
        0x001f_ffff,
        HOST_ADDR_MASK,
        0x001f_ffff,
        RegionKind::Ram,
        LinearStore::from_bytes("boot rom", boot_rom, true),
    );
    mem.add_region(
        0x0020_0000,
        0x0021_ffff,
        HOST_ADDR_MASK,
        0x0001_ffff,
        RegionKind::Ram,
        LinearStore::from_bytes("flash", flash, false),
    );
    mem.add_region(
        0x005f_6800,
        0x005f_69ff,
        HOST_ADDR_MASK,
        0x1ff,
        RegionKind::Unknown,
        holly.clone(),
    );
    mem.add_region(0x005f_6c00, 0x005f_6cff, HOST_ADDR_MASK, 0xff, RegionKind::Unknown, StubRegion);
    mem.add_region(
        0x005f_7000,
        0x005f_70ff,
        HOST_ADDR_MASK,
        0xff,
        RegionKind::Unknown,
        GdromDataWindow(gdrom.clone()),
    );
    mem.add_region(
        0x005f_7400,
        0x005f_74ff,
        HOST_ADDR_MASK,
        0xff,
        RegionKind::Unknown,
        GdromDmaWindow(gdrom.clone()),
    );
    mem.add_region(0x005f_7800, 0x005f_78ff, HOST_ADDR_MASK, 0xff, RegionKind::Unknown, StubRegion);
    mem.add_region(0x005f_7c00, 0x005f_7cff, HOST_ADDR_MASK, 0xff, RegionKind::Unknown, StubRegion);
    mem.add_region(0x005f_8000, 0x005f_9fff, HOST_ADDR_MASK, 0x1fff, RegionKind::Unknown, StubRegion);
    mem.add_region(
        0x0070_0000,
        0x0070_7fff,
        HOST_ADDR_MASK,
        0x7fff,
        RegionKind::Unknown,
        aica.clone(),
    );
    mem.add_region(0x0071_0000, 0x0071_ffff, HOST_ADDR_MASK, 0xffff, RegionKind::Unknown, StubRegion);
    mem.add_region(
        0x0080_0000,
        0x009f_ffff,
        HOST_ADDR_MASK,
        0x1f_ffff,
        RegionKind::Ram,
        AicaWaveRamView(aica.clone()),
    );
    mem.add_region(0x0400_0000, 0x07ff_ffff, HOST_ADDR_MASK, 0x3ff_ffff, RegionKind::Unknown, StubRegion);
    mem.add_region(0x1000_0000, 0x11ff_ffff, HOST_ADDR_MASK, 0x1ff_ffff, RegionKind::Unknown, StubRegion);

    // Main RAM: 16 MiB, mirrored 4x across the 64 MiB physical window.
    // Declared per-mirror rather than collapsed into one wide region, per
    // `MemoryMap::add_region`'s own convention for large mirror counts.
    for mirror in 0..4u32 {
        let base = 0x0c00_0000 + mirror * (MAIN_RAM_SIZE as u32);
        mem.add_region(
            base,
            base + MAIN_RAM_SIZE as u32 - 1,
            HOST_ADDR_MASK,
            MAIN_RAM_SIZE as u32 - 1,
            RegionKind::Ram,
            main_ram.clone(),
        );
    }

    // On-chip RAM: reachable with the upper 3 address bits either all
    // clear or all set; both land in the same
    // masked range under `HOST_ADDR_MASK`, so one region covers it.
    mem.add_region(
        0x1c00_0000,
        0x1c00_0000 + ONCHIP_RAM_SIZE as u32 - 1,
        HOST_ADDR_MASK,
        ONCHIP_RAM_SIZE as u32 - 1,
        RegionKind::Ram,
        LinearStore::new("on-chip ram", ONCHIP_RAM_SIZE, false),
    );
}

fn register_audio_regions(mem: &mut MemoryMap, aica: &Rc<RefCell<Aica>>) {
    // Wave RAM mirrored 4x over 0x0000000..0x7fffff, declared
    // individually rather than collapsed.
    for mirror in 0..4u32 {
        let base = mirror * (WAVE_RAM_SIZE as u32);
        mem.add_region(
            base,
            base + WAVE_RAM_SIZE as u32 - 1,
            0xffff_ffff,
            WAVE_RAM_SIZE as u32 - 1,
            RegionKind::Ram,
            AicaWaveRamView(aica.clone()),
        );
    }
    mem.add_region(
        0x0080_0000,
        0x0080_7fff,
        0xffff_ffff,
        0x7fff,
        RegionKind::Unknown,
        aica.clone(),
    );
}

impl Emulator for Dreamcast {
    /// Run until end-of-frame, a fatal error, or the kill flag, whichever
    /// comes first. Returns `None` on an ordinary frame boundary so the caller
    /// keeps calling; `Some` only when the run should actually stop.
    fn run_frame(&mut self) -> Option<TerminationReason> {
        loop {
            self.pump_host();
            self.drain_holly_dma();
            self.drain_gdrom();
            self.pump_audio();
            self.drain_aica();

            if let Some(err) = self.fatal.borrow_mut().take() {
                return Some(TerminationReason::Error(err));
            }
            if self.kill_requested {
                return Some(TerminationReason::Interrupted);
            }
            if self.host_clock.cycle_stamp() >= self.next_frame_boundary {
                self.next_frame_boundary += HOST_CPU_HZ / FRAME_HZ;
                return None;
            }
        }
    }

    fn request_kill(&mut self) {
        self.kill_requested = true;
    }

    fn reset(&mut self) {
        self.sh4.reset();
        self.arm7.reset();
        self.gdrom.borrow_mut().reset();
        *self.holly.borrow_mut() = Holly::new();
        *self.aica.borrow_mut() = Aica::new(WAVE_RAM_SIZE);
        self.main_ram.borrow_mut().data.fill(0);

        self.host_clock = Clock::new(HOST_HOUSEKEEPING_PERIOD);
        self.audio_clock = Clock::new(AUDIO_HOUSEKEEPING_PERIOD);

        *self.fatal.borrow_mut() = None;
        self.gdrom_dma_armed = false;
        self.arm_was_reset = true;
        self.kill_requested = false;
        self.next_frame_boundary = HOST_CPU_HZ / FRAME_HZ;
    }

    fn cycle_counts(&self) -> (u64, u64) {
        (self.host_clock.cycle_stamp(), self.audio_clock.cycle_stamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Boot to first instruction: the host CPU's
    /// reset vector (0xa0000000, masked to 0) must fetch from boot ROM and
    /// execute without faulting.
    #[test]
    fn boots_and_runs_one_frame_from_a_nop_filled_boot_rom() {
        let boot_rom = vec![0x00, 0x09].repeat(BOOT_ROM_SIZE / 2); // SH4 NOP = 0x0009 (little-endian bytes 09 00)
        let mut dc = Dreamcast::new(boot_rom, vec![0u8; FLASH_SIZE]);
        let reason = dc.run_frame();
        assert!(reason.is_none(), "expected a clean frame boundary, got {reason:?}");
        let (host_cycles, _audio_cycles) = dc.cycle_counts();
        assert!(host_cycles > 0);
    }

    #[test]
    fn request_kill_is_observed_at_the_next_frame_boundary() {
        let boot_rom = vec![0x09, 0x00].repeat(BOOT_ROM_SIZE / 2);
        let mut dc = Dreamcast::new(boot_rom, vec![0u8; FLASH_SIZE]);
        dc.request_kill();
        let reason = dc.run_frame();
        assert_eq!(reason, Some(TerminationReason::Interrupted));
    }

    #[test]
    fn reset_restores_cold_boot_state() {
        let boot_rom = vec![0x09, 0x00].repeat(BOOT_ROM_SIZE / 2);
        let mut dc = Dreamcast::new(boot_rom, vec![0u8; FLASH_SIZE]);
        dc.run_frame();
        dc.reset();
        let (host_cycles, audio_cycles) = dc.cycle_counts();
        assert_eq!(host_cycles, 0);
        assert_eq!(audio_cycles, 0);
    }

    /// Channel-2 DMA: a register-driven start must
    /// produce graphics-sink writes and a completion interrupt without
    /// needing the host CPU to execute anything beyond the triggering
    /// writes themselves.
    #[test]
    fn channel2_dma_register_start_streams_words_and_raises_completion() {
        let boot_rom = vec![0x09, 0x00].repeat(BOOT_ROM_SIZE / 2);
        let mut dc = Dreamcast::new(boot_rom, vec![0u8; FLASH_SIZE]);

        dc.main_ram.borrow_mut().data[0..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        {
            let mut holly = dc.holly.borrow_mut();
            holly.ch2_dma.lmmode0 = false;
        }
        dc.host_mem.write32(0x005f_6800, 0x0000_0000).ok(); // SB_C2DSTAT (unused by this path)
        dc.host_mem.write32(0x005f_6804, 4).unwrap(); // SB_C2DLEN
        dc.host_mem.write32(0x005f_6808, 1).unwrap(); // SB_C2DST

        dc.drain_holly_dma();
        assert!(dc.holly.borrow().pending_dma.is_none());

        // Run frames until the scheduled completion interrupt fires or we
        // give up — the latency formula always yields a positive but
        // small cycle count relative to one frame's worth of host cycles.
        let mut raised = false;
        for _ in 0..4 {
            dc.run_frame();
            if dc.holly.borrow().intc.pending_normal() != 0 {
                raised = true;
                break;
            }
        }
        assert!(raised, "channel-2 DMA completion interrupt never raised");
    }
}
