//! General-purpose timers
//!
//! Each of the twelve timer blocks has two halves, A and B, which run
//! independently or concatenated into one counter of twice the width. The
//! six short blocks count 16 bits per half (32 concatenated), the six wide
//! blocks 32 bits per half (64 concatenated). A split half also has an 8-bit
//! (short) or 16-bit (wide) prescaler register. Counting down in one-shot or
//! periodic mode it divides the timer clock, so the period is
//! `(TnPR + 1) * (TnILR + 1)` and long intervals are rounded to what that
//! product can express. In every other split mode it holds the upper bits of
//! a linear counter.

use crate::hal::timer::{CountDown, Periodic};
use void::Void;

use crate::error::Error;
use crate::nvic::{Interrupt, Nvic, PRIORITIES};
use crate::register::{Bus, Field, Register};
use crate::sysctl::{ClockGate, Clocks, Sysctl};
use crate::time::Hertz;

const CFG: Register = Register::new(0x000);
const TAMR: Register = Register::new(0x004);
const TBMR: Register = Register::new(0x008);
const CTL: Register = Register::new(0x00C).isr_shared();
const IMR: Register = Register::new(0x018).isr_shared();
const RIS: Register = Register::new(0x01C);
const ICR: Register = Register::new(0x024);
const TAILR: Register = Register::new(0x028);
const TBILR: Register = Register::new(0x02C);
const TAMATCHR: Register = Register::new(0x030);
const TBMATCHR: Register = Register::new(0x034);
const TAPR: Register = Register::new(0x038);
const TBPR: Register = Register::new(0x03C);
const TAPMR: Register = Register::new(0x040);
const TBPMR: Register = Register::new(0x044);
const TAR: Register = Register::new(0x048);
const TBR: Register = Register::new(0x04C);

// CFG
const GPTMCFG: Field = Field::rw(0, 3);
const CFG_CONCATENATED: u32 = 0;
const CFG_RTC: u32 = 1;
const CFG_SPLIT: u32 = 4;

// TnMR
const TNMR: Field = Field::rw(0, 2);
const TNCMR: Field = Field::bit(2);
const TNAMS: Field = Field::bit(3);
const TNCDIR: Field = Field::bit(4);
const TNPWMIE: Field = Field::bit(9);

const MR_ONE_SHOT: u32 = 1;
const MR_PERIODIC: u32 = 2;
const MR_CAPTURE: u32 = 3;

// CTL
const TAEN: Field = Field::bit(0);
const TAEVENT: Field = Field::rw(2, 2);
const TBEN: Field = Field::bit(8);
const TBEVENT: Field = Field::rw(10, 2);

const WORD: Field = Field::rw(0, 32);
const HALF: Field = Field::rw(0, 16);
const BYTE: Field = Field::rw(0, 8);
const COUNT: Field = Field::ro(0, 32);

/// Timer block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Block {
    Timer0,
    Timer1,
    Timer2,
    Timer3,
    Timer4,
    Timer5,
    WideTimer0,
    WideTimer1,
    WideTimer2,
    WideTimer3,
    WideTimer4,
    WideTimer5,
}

impl Block {
    /// 32/64-bit block
    pub fn is_wide(self) -> bool {
        self as u8 >= Block::WideTimer0 as u8
    }

    fn index(self) -> u8 {
        self as u8 % 6
    }

    pub fn base(self) -> u32 {
        const WIDE: [u32; 6] = [
            0x4003_6000,
            0x4003_7000,
            0x4004_C000,
            0x4004_D000,
            0x4004_E000,
            0x4004_F000,
        ];
        if self.is_wide() {
            WIDE[usize::from(self.index())]
        } else {
            0x4003_0000 + u32::from(self.index()) * 0x1000
        }
    }

    pub(crate) fn gate(self) -> ClockGate {
        if self.is_wide() {
            ClockGate::wide_timer(self.index())
        } else {
            ClockGate::timer(self.index())
        }
    }

    /// Interrupt lines of the A and B halves
    pub fn interrupts(self) -> [Interrupt; 2] {
        use Interrupt::*;
        match self {
            Block::Timer0 => [TIMER0A, TIMER0B],
            Block::Timer1 => [TIMER1A, TIMER1B],
            Block::Timer2 => [TIMER2A, TIMER2B],
            Block::Timer3 => [TIMER3A, TIMER3B],
            Block::Timer4 => [TIMER4A, TIMER4B],
            Block::Timer5 => [TIMER5A, TIMER5B],
            Block::WideTimer0 => [WTIMER0A, WTIMER0B],
            Block::WideTimer1 => [WTIMER1A, WTIMER1B],
            Block::WideTimer2 => [WTIMER2A, WTIMER2B],
            Block::WideTimer3 => [WTIMER3A, WTIMER3B],
            Block::WideTimer4 => [WTIMER4A, WTIMER4B],
            Block::WideTimer5 => [WTIMER5A, WTIMER5B],
        }
    }
}

/// Which part of the block a [`Timer`] runs on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Use {
    A,
    B,
    /// Both halves as one counter, controlled through the A registers
    Concatenated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    OneShot,
    Periodic,
    /// Real-time clock, counts the 32.768 kHz input (concatenated only)
    Rtc,
    /// Capture: counts edges of the CCP input (split only)
    EdgeCount,
    /// Capture: latches the count on CCP edges (split only)
    EdgeTime,
    /// PWM on the CCP output (split only)
    Pwm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Down,
    Up,
}

/// Edge that a capture or PWM half reacts to (`CTL.TnEVENT`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureEdge {
    Rising = 0,
    Falling = 1,
    Both = 3,
}

/// Timer configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    mode: Mode,
    direction: Direction,
    interval: u64,
    match_value: Option<u64>,
    edge: CaptureEdge,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: Mode::Periodic,
            direction: Direction::Down,
            interval: 0,
            match_value: None,
            edge: CaptureEdge::Rising,
        }
    }
}

impl Config {
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Reload value, in timer clock ticks
    pub fn interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    /// Match value; the PWM duty cycle in PWM mode
    pub fn match_value(mut self, value: u64) -> Self {
        self.match_value = Some(value);
        self
    }

    pub fn edge(mut self, edge: CaptureEdge) -> Self {
        self.edge = edge;
        self
    }
}

/// Bit of `IMR`/`RIS`/`MIS`/`ICR` that the mode raises on this half
fn interrupt_bit(mode: Mode, use_: Use) -> u8 {
    let (a, b) = match mode {
        Mode::OneShot | Mode::Periodic => (0, 8),
        Mode::Rtc => (3, 3),
        Mode::EdgeCount => (1, 9),
        Mode::EdgeTime | Mode::Pwm => (2, 10),
    };
    if use_ == Use::B {
        b
    } else {
        a
    }
}

/// A configured timer half (or concatenated pair)
pub struct Timer<B> {
    bus: B,
    block: Block,
    use_: Use,
    mode: Mode,
    direction: Direction,
    /// Computed once; polling, clearing and unmasking all use it
    interrupt_bit: u8,
    clocks: Clocks,
}

impl<B: Bus + Copy> Timer<B> {
    /// Clocks the block and configures the timer, leaving it stopped
    pub fn new(
        sysctl: &mut Sysctl<B>,
        clocks: Clocks,
        block: Block,
        use_: Use,
        cfg: &Config,
    ) -> Result<Self, Error> {
        Self::configure(sysctl, clocks, block, use_, cfg, false)
    }

    /// Like [`Timer::new`], with the mode's interrupt unmasked and activated
    pub fn new_with_interrupt<N: Bus>(
        sysctl: &mut Sysctl<B>,
        nvic: &mut Nvic<N>,
        clocks: Clocks,
        block: Block,
        use_: Use,
        cfg: &Config,
        priority: u8,
    ) -> Result<Self, Error> {
        if priority >= PRIORITIES {
            return Err(Error::InvalidPriority(priority));
        }
        let timer = Self::configure(sysctl, clocks, block, use_, cfg, true)?;
        IMR.write(&timer.bus, block.base(), timer.interrupt_field(), 1)?;
        nvic.activate(timer.interrupt(), priority)?;
        Ok(timer)
    }

    fn configure(
        sysctl: &mut Sysctl<B>,
        clocks: Clocks,
        block: Block,
        use_: Use,
        cfg: &Config,
        interrupt: bool,
    ) -> Result<Self, Error> {
        let concatenated = use_ == Use::Concatenated;
        match cfg.mode {
            Mode::Rtc if !concatenated => return Err(Error::UnsupportedMode),
            Mode::EdgeCount | Mode::EdgeTime | Mode::Pwm if concatenated => {
                return Err(Error::UnsupportedMode)
            }
            _ => {}
        }

        let timer = Timer {
            bus: sysctl.bus(),
            block,
            use_,
            mode: cfg.mode,
            direction: cfg.direction,
            interrupt_bit: interrupt_bit(cfg.mode, use_),
            clocks,
        };
        let max = timer.max_interval();
        if cfg.interval > max || cfg.match_value.map_or(false, |m| m > timer.max_match()) {
            return Err(Error::InvalidInterval);
        }

        trace!("timer {=u32:#x} configure", block.base());
        sysctl.enable(block.gate())?;
        timer.enable(false)?;

        let base = block.base();
        let cfg_value = match (cfg.mode, concatenated) {
            (Mode::Rtc, _) => CFG_RTC,
            (_, true) => CFG_CONCATENATED,
            (_, false) => CFG_SPLIT,
        };
        CFG.write(&timer.bus, base, GPTMCFG, cfg_value)?;

        let mr = timer.mode_register();
        let up = u32::from(cfg.direction == Direction::Up);
        match cfg.mode {
            Mode::OneShot => {
                mr.write(&timer.bus, base, TNMR, MR_ONE_SHOT)?;
                mr.write(&timer.bus, base, TNCDIR, up)?;
            }
            Mode::Periodic => {
                mr.write(&timer.bus, base, TNMR, MR_PERIODIC)?;
                mr.write(&timer.bus, base, TNCDIR, up)?;
            }
            Mode::Rtc => {}
            Mode::EdgeCount | Mode::EdgeTime => {
                mr.write(&timer.bus, base, TNMR, MR_CAPTURE)?;
                mr.write(&timer.bus, base, TNAMS, 0)?;
                mr.write(&timer.bus, base, TNCMR, u32::from(cfg.mode == Mode::EdgeTime))?;
                mr.write(&timer.bus, base, TNCDIR, up)?;
            }
            Mode::Pwm => {
                mr.write(&timer.bus, base, TNMR, MR_PERIODIC)?;
                mr.write(&timer.bus, base, TNAMS, 1)?;
                mr.write(&timer.bus, base, TNCMR, 0)?;
                mr.write(&timer.bus, base, TNPWMIE, u32::from(interrupt))?;
            }
        }
        if matches!(cfg.mode, Mode::EdgeCount | Mode::EdgeTime | Mode::Pwm) {
            let event = if use_ == Use::B { TBEVENT } else { TAEVENT };
            CTL.write(&timer.bus, base, event, cfg.edge as u32)?;
        }

        timer.load_interval(cfg.interval)?;
        if let Some(m) = cfg.match_value {
            timer.load(m, [TAMATCHR, TBMATCHR], [TAPMR, TBPMR])?;
        }
        debug!("timer {=u32:#x} configured", base);

        Ok(timer)
    }
}

impl<B: Bus> Timer<B> {
    pub fn block(&self) -> Block {
        self.block
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Interrupt line of the half this timer runs on
    pub fn interrupt(&self) -> Interrupt {
        let [a, b] = self.block.interrupts();
        match self.use_ {
            Use::B => b,
            Use::A | Use::Concatenated => a,
        }
    }

    fn interrupt_field(&self) -> Field {
        Field::bit(self.interrupt_bit)
    }

    fn mode_register(&self) -> Register {
        match self.use_ {
            Use::B => TBMR,
            Use::A | Use::Concatenated => TAMR,
        }
    }

    /// Largest interval or match value the counter takes
    pub fn max_interval(&self) -> u64 {
        match (self.block.is_wide(), self.use_) {
            (false, Use::Concatenated) => u64::from(u32::MAX),
            (true, Use::Concatenated) => u64::MAX,
            (false, _) => (1 << 24) - 1,
            (true, _) => (1 << 48) - 1,
        }
    }

    /// Largest match value the counter takes
    ///
    /// A prescaled half compares only its reload register.
    pub fn max_match(&self) -> u64 {
        if self.prescaled() {
            u64::from(self.split_fields().0.max())
        } else {
            self.max_interval()
        }
    }

    /// Whether `TnPR` divides the timer clock rather than extending the counter
    fn prescaled(&self) -> bool {
        self.use_ != Use::Concatenated
            && matches!(self.mode, Mode::OneShot | Mode::Periodic)
            && self.direction == Direction::Down
    }

    /// Counter field, prescaler field and the prescaler's bit position
    fn split_fields(&self) -> (Field, Field, u32) {
        if self.block.is_wide() {
            (WORD, HALF, 32)
        } else {
            (HALF, BYTE, 16)
        }
    }

    /// Loads the reload value, factoring it into prescaler and reload when
    /// the prescaler divides the clock
    fn load_interval(&self, value: u64) -> Result<(), Error> {
        let (low, ext, _) = self.split_fields();
        let span = u64::from(low.max()) + 1;
        if !self.prescaled() || value < span {
            return self.load(value, [TAILR, TBILR], [TAPR, TBPR]);
        }

        // (div) * (reload + 1) clocks, as close to value + 1 as it gets
        let total = value + 1;
        let div = (total + span - 1) / span;
        let reload = (total + div / 2) / div - 1;

        let (r, p) = if self.use_ == Use::B {
            (TBILR, TBPR)
        } else {
            (TAILR, TAPR)
        };
        let base = self.block.base();
        r.write(&self.bus, base, low, reload as u32)?;
        p.write(&self.bus, base, ext, (div - 1) as u32)?;
        Ok(())
    }

    /// Writes `value` into a reload (or match) register pair
    ///
    /// `regs` and `pre` hold the A and B registers of the value and of its
    /// prescaler extension.
    fn load(&self, value: u64, regs: [Register; 2], pre: [Register; 2]) -> Result<(), Error> {
        let base = self.block.base();
        let [a, b] = regs;
        let [pa, pb] = pre;
        match (self.block.is_wide(), self.use_) {
            (false, Use::Concatenated) => {
                a.write(&self.bus, base, WORD, value as u32)?;
                pa.write(&self.bus, base, BYTE, 0)?;
            }
            // The upper word goes to the B register
            (true, Use::Concatenated) => {
                b.write(&self.bus, base, WORD, (value >> 32) as u32)?;
                a.write(&self.bus, base, WORD, (value & 0xFFFF_FFFF) as u32)?;
            }
            (_, half) => {
                let (r, p) = if half == Use::B { (b, pb) } else { (a, pa) };
                let (low, ext, shift) = self.split_fields();
                r.write(&self.bus, base, low, (value & u64::from(low.max())) as u32)?;
                p.write(&self.bus, base, ext, (value >> shift) as u32)?;
            }
        }
        Ok(())
    }

    fn enable(&self, on: bool) -> Result<(), Error> {
        let en = if self.use_ == Use::B { TBEN } else { TAEN };
        CTL.write(&self.bus, self.block.base(), en, u32::from(on))?;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), Error> {
        self.enable(true)
    }

    pub fn stop(&mut self) -> Result<(), Error> {
        self.enable(false)
    }

    /// Changes the match value (the duty cycle in PWM mode)
    pub fn set_match(&mut self, value: u64) -> Result<(), Error> {
        if value > self.max_match() {
            return Err(Error::InvalidInterval);
        }
        self.load(value, [TAMATCHR, TBMATCHR], [TAPMR, TBPMR])
    }

    /// Current counter value
    pub fn count(&self) -> u64 {
        let base = self.block.base();
        match (self.block.is_wide(), self.use_) {
            (true, Use::Concatenated) => {
                let hi = u64::from(TBR.read(&self.bus, base, COUNT));
                (hi << 32) | u64::from(TAR.read(&self.bus, base, COUNT))
            }
            (_, Use::B) => u64::from(TBR.read(&self.bus, base, COUNT)),
            _ => u64::from(TAR.read(&self.bus, base, COUNT)),
        }
    }

    fn is_flagged(&self) -> bool {
        RIS.is_set(&self.bus, self.block.base(), Field::ro(self.interrupt_bit, 1))
    }

    /// Runs `action` and clears the flag if the mode's event has happened
    pub fn poll_status<F: FnOnce()>(&mut self, action: F) -> Result<bool, Error> {
        if !self.is_flagged() {
            return Ok(false);
        }
        action();
        self.clear_interrupt()?;
        Ok(true)
    }

    /// Clears the mode's interrupt flag
    ///
    /// If the flag is not cleared, the interrupt fires again as soon as the
    /// handler returns.
    pub fn clear_interrupt(&mut self) -> Result<(), Error> {
        ICR.write(
            &self.bus,
            self.block.base(),
            Field::w1c(self.interrupt_bit, 1),
            1,
        )?;
        Ok(())
    }

    /// Unmasks the mode's interrupt
    pub fn listen(&mut self) -> Result<(), Error> {
        IMR.write(&self.bus, self.block.base(), self.interrupt_field(), 1)?;
        Ok(())
    }

    pub fn unlisten(&mut self) -> Result<(), Error> {
        IMR.write(&self.bus, self.block.base(), self.interrupt_field(), 0)?;
        Ok(())
    }
}

impl<B: Bus> Periodic for Timer<B> {}

impl<B: Bus> CountDown for Timer<B> {
    type Time = Hertz;

    /// Restarts the timer to time out at `timeout`
    ///
    /// Intervals too long for the counter are clamped to its maximum.
    fn start<T>(&mut self, timeout: T)
    where
        T: Into<Hertz>,
    {
        let frequency = timeout.into().0.max(1);
        let ticks = u64::from(self.clocks.sysclk().0 / frequency).max(1);
        let reload = (ticks - 1).min(self.max_interval());

        // The register writes below cannot be refused: every value fits
        let _ = self.enable(false);
        let _ = self.load_interval(reload);
        let _ = self.clear_interrupt();
        let _ = self.enable(true);
    }

    fn wait(&mut self) -> nb::Result<(), Void> {
        if self.is_flagged() {
            let _ = self.clear_interrupt();
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}
