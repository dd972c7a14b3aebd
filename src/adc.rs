//! Analog-to-Digital Converter
//!
//! Each ADC module has four sample sequencers. A sequencer holds a fixed
//! number of steps (8, 4, 4 and 1 for sequencers 0 to 3); each step selects an
//! input and either pushes its conversion into the sequencer's FIFO or routes
//! it to one of the eight digital comparators.
//!
//! A sequencer is configured while disabled, then armed with
//! [`AdcSampleSequencer::enable_sample_sequencer`]. From then on every trigger
//! runs the whole sequence. Completion is consumed either by polling
//! ([`AdcSampleSequencer::poll_status`]) or through the sequencer's interrupt.
//!
//! Reading the FIFO starts the next conversion, so a value popped from it was
//! queued one or more conversions earlier. [`AdcSampleSequencer::get_adc_sample`]
//! reads the FIFO one more time than it is deep to return a fresh value.

use crate::error::Error;
use crate::nvic::{Interrupt, Nvic, PRIORITIES};
use crate::register::{Bus, Field, FieldError, Register};
use crate::sysctl::{ClockGate, Sysctl};

const ACTSS: Register = Register::new(0x000);
const RIS: Register = Register::new(0x004);
const IM: Register = Register::new(0x008).isr_shared();
const ISC: Register = Register::new(0x00C);
const EMUX: Register = Register::new(0x014);
const SSPRI: Register = Register::new(0x020);
const PSSI: Register = Register::new(0x028);
const DCISC: Register = Register::new(0x034);

// Sample sequencer registers, 0x20 apart
const SSMUX: Register = Register::new(0x040);
const SSCTL: Register = Register::new(0x044);
const SSFIFO: Register = Register::new(0x048);
const SSFSTAT: Register = Register::new(0x04C);
const SSOP: Register = Register::new(0x050);
const SSDC: Register = Register::new(0x054);
const SEQUENCER_STRIDE: u32 = 0x20;

// Digital comparator registers
const DCRIC: Register = Register::new(0xD00);
const DCCTL: Register = Register::new(0xE00);
const DCCMP: Register = Register::new(0xE40);

// RIS
const INRDC: Field = Field::ro(16, 1);

// SSCTL nibble
const CTL_D: u32 = 1 << 0;
const CTL_END: u32 = 1 << 1;
const CTL_IE: u32 = 1 << 2;
const CTL_TS: u32 = 1 << 3;

const FIFO_DATA: Field = Field::ro(0, 12);
const FIFO_EMPTY: Field = Field::ro(8, 1);

// DCCTL
const CIM: Field = Field::rw(0, 2);
const CIC: Field = Field::rw(2, 2);
const CIE: Field = Field::bit(4);

// DCCMP
const COMP0: Field = Field::rw(0, 12);
const COMP1: Field = Field::rw(16, 12);

/// Number of digital comparators per module
pub const COMPARATORS: u8 = 8;

/// Largest conversion result
pub const MAX_SAMPLE: u16 = 0xFFF;

/// ADC module
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Module {
    Adc0,
    Adc1,
}

impl Module {
    pub fn base(self) -> u32 {
        match self {
            Module::Adc0 => 0x4003_8000,
            Module::Adc1 => 0x4003_9000,
        }
    }

    /// Interrupt lines of sequencers 0 to 3
    pub fn interrupts(self) -> [Interrupt; 4] {
        use Interrupt::*;
        match self {
            Module::Adc0 => [ADC0SS0, ADC0SS1, ADC0SS2, ADC0SS3],
            Module::Adc1 => [ADC1SS0, ADC1SS1, ADC1SS2, ADC1SS3],
        }
    }
}

/// Sample sequencer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Sequencer {
    /// Eight steps
    Ss0 = 0,
    /// Four steps
    Ss1 = 1,
    /// Four steps
    Ss2 = 2,
    /// One step
    Ss3 = 3,
}

impl Sequencer {
    /// Steps, and FIFO entries, of the sequencer
    pub fn depth(self) -> usize {
        match self {
            Sequencer::Ss0 => 8,
            Sequencer::Ss1 | Sequencer::Ss2 => 4,
            Sequencer::Ss3 => 1,
        }
    }

    fn index(self) -> u8 {
        self as u8
    }

    fn register(self, reg: Register) -> Register {
        reg.nth(u32::from(self.index()), SEQUENCER_STRIDE)
    }
}

/// Event that starts a sequence (`EMUX.EMn`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Trigger {
    /// Software, through [`AdcSampleSequencer::initiate_sampling`]
    Processor = 0x0,
    /// Analog comparator 0
    Comparator0 = 0x1,
    /// Analog comparator 1
    Comparator1 = 0x2,
    /// External GPIO pin
    External = 0x4,
    /// A timer configured for ADC triggering
    Timer = 0x5,
    /// PWM generator 0
    Pwm0 = 0x6,
    /// PWM generator 1
    Pwm1 = 0x7,
    /// PWM generator 2
    Pwm2 = 0x8,
    /// PWM generator 3
    Pwm3 = 0x9,
    /// Sample continuously
    Always = 0xF,
}

/// Analog input of a step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Input {
    Ain0 = 0,
    Ain1 = 1,
    Ain2 = 2,
    Ain3 = 3,
    Ain4 = 4,
    Ain5 = 5,
    Ain6 = 6,
    Ain7 = 7,
    Ain8 = 8,
    Ain9 = 9,
    Ain10 = 10,
    Ain11 = 11,
}

/// One step of a sample sequence
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    input: Input,
    differential: bool,
    temperature: bool,
    interrupt: bool,
    end: bool,
    comparator: Option<u8>,
}

impl Step {
    pub fn new(input: Input) -> Self {
        Step {
            input,
            differential: false,
            temperature: false,
            interrupt: false,
            end: false,
            comparator: None,
        }
    }

    /// Samples the input pair selected by `input` differentially
    pub fn differential(mut self) -> Self {
        self.differential = true;
        self
    }

    /// Samples the temperature sensor instead of `input`
    pub fn temperature(mut self) -> Self {
        self.temperature = true;
        self
    }

    /// Raises the sequencer's interrupt flag once this step completes
    pub fn interrupt(mut self) -> Self {
        self.interrupt = true;
        self
    }

    /// Marks the last step of the sequence
    pub fn end(mut self) -> Self {
        self.end = true;
        self
    }

    /// Sends the conversion to digital comparator `unit` instead of the FIFO
    pub fn route_to_comparator(mut self, unit: u8) -> Self {
        self.comparator = Some(unit);
        self
    }

    fn control(&self) -> u32 {
        let mut ctl = 0;
        if self.differential {
            ctl |= CTL_D;
        }
        if self.end {
            ctl |= CTL_END;
        }
        if self.interrupt {
            ctl |= CTL_IE;
        }
        if self.temperature {
            ctl |= CTL_TS;
        }
        ctl
    }
}

const MAX_STEPS: usize = 8;

/// Sample sequence configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceConfig {
    trigger: Trigger,
    steps: [Step; MAX_STEPS],
    /// Steps added, which may exceed what fits
    len: usize,
    priority: Option<u8>,
}

impl SequenceConfig {
    pub fn new(trigger: Trigger) -> Self {
        SequenceConfig {
            trigger,
            steps: [Step::new(Input::Ain0); MAX_STEPS],
            len: 0,
            priority: None,
        }
    }

    /// Appends a step
    pub fn step(mut self, step: Step) -> Self {
        if let Some(slot) = self.steps.get_mut(self.len) {
            *slot = step;
        }
        self.len += 1;
        self
    }

    /// Priority among the module's sequencers (`SSPRI`), 0 is the highest
    ///
    /// Without this the reset ordering is kept.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    fn steps(&self) -> &[Step] {
        &self.steps[..self.len.min(MAX_STEPS)]
    }

    fn raises_interrupt(&self) -> bool {
        self.steps().iter().any(|s| s.interrupt)
    }

    fn routes_to_comparator(&self) -> bool {
        self.steps().iter().any(|s| s.comparator.is_some())
    }

    /// Checks the sequence against the sequencer before anything is written
    fn validate(&self, sequencer: Sequencer) -> Result<(), Error> {
        let depth = sequencer.depth();
        if self.len == 0 {
            return Err(Error::EmptySequence);
        }
        if self.len > depth {
            return Err(Error::TooManySteps { max: depth });
        }
        if let Some(p) = self.priority {
            if p > 3 {
                return Err(Error::InvalidPriority(p));
            }
        }
        let steps = self.steps();
        let last = steps.len() - 1;
        for (i, step) in steps.iter().enumerate() {
            if step.end && i != last {
                return Err(Error::MisplacedEndOfSequence(i));
            }
            if let Some(unit) = step.comparator {
                if unit >= COMPARATORS {
                    return Err(Error::InvalidComparator(unit));
                }
            }
        }
        if !steps[last].end {
            return Err(Error::MissingEndOfSequence);
        }
        Ok(())
    }
}

/// Sequencer life cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Programmed, but triggers are ignored
    Configured,
    /// Triggers run the sequence
    Armed,
}

/// A configured sample sequencer
pub struct AdcSampleSequencer<B> {
    bus: B,
    module: Module,
    sequencer: Sequencer,
    trigger: Trigger,
    state: State,
}

impl<B: Bus + Copy> AdcSampleSequencer<B> {
    /// Configures `sequencer` for polled consumption
    ///
    /// The sequencer is left disabled.
    pub fn initialize_for_polling(
        sysctl: &mut Sysctl<B>,
        module: Module,
        sequencer: Sequencer,
        cfg: &SequenceConfig,
    ) -> Result<Self, Error> {
        cfg.validate(sequencer)?;
        Self::configure(sysctl, module, sequencer, cfg)
    }

    /// Configures `sequencer` and wires its completion to the interrupt
    /// controller
    ///
    /// Sequences that route steps to a digital comparator also forward the
    /// comparator interrupts to the sequencer's interrupt line.
    pub fn initialize_for_interrupt<N: Bus>(
        sysctl: &mut Sysctl<B>,
        nvic: &mut Nvic<N>,
        module: Module,
        sequencer: Sequencer,
        cfg: &SequenceConfig,
        priority: u8,
    ) -> Result<Self, Error> {
        cfg.validate(sequencer)?;
        if priority >= PRIORITIES {
            return Err(Error::InvalidPriority(priority));
        }
        if !cfg.raises_interrupt() {
            return Err(Error::MissingInterruptStep);
        }
        let ss = Self::configure(sysctl, module, sequencer, cfg)?;

        let n = sequencer.index();
        IM.write(&ss.bus, module.base(), Field::bit(n), 1)?;
        if cfg.routes_to_comparator() {
            IM.write(&ss.bus, module.base(), Field::bit(16 + n), 1)?;
        }
        nvic.activate(ss.interrupt(), priority)?;
        Ok(ss)
    }

    fn configure(
        sysctl: &mut Sysctl<B>,
        module: Module,
        sequencer: Sequencer,
        cfg: &SequenceConfig,
    ) -> Result<Self, Error> {
        trace!("adc {=u32:#x} sequencer {=u8}", module.base(), sequencer.index());
        sysctl.enable(ClockGate::adc(module as u8))?;

        let ss = AdcSampleSequencer {
            bus: sysctl.bus(),
            module,
            sequencer,
            trigger: cfg.trigger,
            state: State::Configured,
        };
        let base = module.base();
        let n = sequencer.index();

        // A trigger must not fire while the steps are half written
        ACTSS.write(&ss.bus, base, Field::bit(n), 0)?;
        EMUX.write(&ss.bus, base, Field::rw(n * 4, 4), cfg.trigger as u32)?;
        if let Some(p) = cfg.priority {
            SSPRI.write(&ss.bus, base, Field::rw(n * 4, 2), u32::from(p))?;
        }

        // Every slot of the sequencer is written; unused ones are cleared
        let steps = cfg.steps();
        for slot in 0..sequencer.depth() {
            let step = steps.get(slot);
            let nibble = Field::rw(slot as u8 * 4, 4);

            let input = step.map_or(0, |s| s.input as u32);
            let control = step.map_or(0, Step::control);
            let unit = step.and_then(|s| s.comparator);

            sequencer.register(SSMUX).write(&ss.bus, base, nibble, input)?;
            sequencer.register(SSCTL).write(&ss.bus, base, nibble, control)?;
            sequencer.register(SSOP).write(
                &ss.bus,
                base,
                Field::bit(slot as u8 * 4),
                u32::from(unit.is_some()),
            )?;
            sequencer
                .register(SSDC)
                .write(&ss.bus, base, nibble, u32::from(unit.unwrap_or(0)))?;
        }
        debug!("adc sequencer {=u8} configured", n);

        Ok(ss)
    }
}

impl<B: Bus> AdcSampleSequencer<B> {
    pub fn module(&self) -> Module {
        self.module
    }

    pub fn sequencer(&self) -> Sequencer {
        self.sequencer
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn interrupt(&self) -> Interrupt {
        self.module.interrupts()[usize::from(self.sequencer.index())]
    }

    fn base(&self) -> u32 {
        self.module.base()
    }

    fn bit(&self) -> u8 {
        self.sequencer.index()
    }

    /// Arms the sequencer: triggers now run the sequence
    pub fn enable_sample_sequencer(&mut self) -> Result<(), Error> {
        ACTSS.write(&self.bus, self.base(), Field::bit(self.bit()), 1)?;
        self.state = State::Armed;
        debug!("adc sequencer {=u8} armed", self.bit());
        Ok(())
    }

    pub fn disable_sample_sequencer(&mut self) -> Result<(), Error> {
        ACTSS.write(&self.bus, self.base(), Field::bit(self.bit()), 0)?;
        self.state = State::Configured;
        Ok(())
    }

    /// Starts the sequence from software
    pub fn initiate_sampling(&mut self) -> Result<(), Error> {
        if self.state != State::Armed {
            return Err(Error::NotArmed);
        }
        if self.trigger != Trigger::Processor {
            return Err(Error::NotSoftwareTriggered);
        }
        PSSI.write(&self.bus, self.base(), Field::wo(self.bit(), 1), 1)?;
        Ok(())
    }

    /// Runs `action` if the sequence has completed
    ///
    /// `action` gets the sequencer so it can drain the FIFO and clear the
    /// flag; the flag stays set otherwise. The flag is only raised by a step
    /// built with [`Step::interrupt`]; a sequence without one never reports
    /// completion here.
    pub fn poll_status<F>(&mut self, action: F) -> bool
    where
        F: FnOnce(&mut Self),
    {
        if RIS.is_set(&self.bus, self.base(), Field::ro(self.bit(), 1)) {
            action(self);
            true
        } else {
            false
        }
    }

    /// Pops one conversion result from the FIFO
    pub fn read_fifo(&mut self) -> u16 {
        self.sequencer
            .register(SSFIFO)
            .read(&self.bus, self.base(), FIFO_DATA) as u16
    }

    /// Reads a fresh conversion result
    ///
    /// The FIFO is read `depth + 1` times (twice for sequencer 3) and the
    /// last value is returned.
    pub fn get_adc_sample(&mut self) -> u16 {
        let mut sample = 0;
        for _ in 0..=self.sequencer.depth() {
            sample = self.read_fifo();
        }
        sample
    }

    pub fn fifo_empty(&self) -> bool {
        self.sequencer
            .register(SSFSTAT)
            .is_set(&self.bus, self.base(), FIFO_EMPTY)
    }

    /// Clears the sequencer's completion flag
    pub fn clear_interrupt(&mut self) -> Result<(), Error> {
        ISC.write(&self.bus, self.base(), Field::w1c(self.bit(), 1), 1)?;
        Ok(())
    }

    /// Runs `action` if any digital comparator of the module has fired
    pub fn poll_digital_comparator<F>(&mut self, action: F) -> bool
    where
        F: FnOnce(&mut Self),
    {
        if RIS.is_set(&self.bus, self.base(), INRDC) {
            action(self);
            true
        } else {
            false
        }
    }

    /// Clears the interrupt flag of comparator `unit`
    pub fn clear_dc_interrupt(&mut self, unit: u8) -> Result<(), Error> {
        if unit >= COMPARATORS {
            return Err(Error::InvalidComparator(unit));
        }
        DCISC.write(&self.bus, self.base(), Field::w1c(unit, 1), 1)?;
        Ok(())
    }
}

/// When a digital comparator raises its interrupt (`DCCTL.CIM`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CompareMode {
    /// On every conversion that meets the condition
    Always = 0,
    /// On the first conversion that meets the condition
    Once = 1,
    /// Always, re-armed only after leaving the region through the opposite side
    HysteresisAlways = 2,
    /// Once, re-armed only after leaving the region through the opposite side
    HysteresisOnce = 3,
}

/// Operating region of a digital comparator (`DCCTL.CIC`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Condition {
    /// Below `COMP0`
    Low = 0,
    /// Between `COMP0` and `COMP1`
    Mid = 1,
    /// Above `COMP1`
    High = 3,
}

/// Digital comparator configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComparatorConfig {
    mode: CompareMode,
    condition: Condition,
    interrupt: bool,
    low: u16,
    high: u16,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        ComparatorConfig {
            mode: CompareMode::Always,
            condition: Condition::Mid,
            interrupt: true,
            low: 0,
            high: MAX_SAMPLE,
        }
    }
}

impl ComparatorConfig {
    pub fn mode(mut self, mode: CompareMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn interrupt(mut self, interrupt: bool) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Lower (`COMP0`) and upper (`COMP1`) thresholds, 12 bits each
    pub fn thresholds(mut self, low: u16, high: u16) -> Self {
        self.low = low;
        self.high = high;
        self
    }
}

/// One of the eight digital comparators of an ADC module
pub struct AdcDigitalComparator<B> {
    bus: B,
    module: Module,
    unit: u8,
}

impl<B: Bus + Copy> AdcDigitalComparator<B> {
    pub fn new(
        sysctl: &mut Sysctl<B>,
        module: Module,
        unit: u8,
        cfg: &ComparatorConfig,
    ) -> Result<Self, Error> {
        if unit >= COMPARATORS {
            return Err(Error::InvalidComparator(unit));
        }
        for value in [cfg.low, cfg.high] {
            if value > MAX_SAMPLE {
                return Err(FieldError::OutOfRange {
                    value: u32::from(value),
                    max: u32::from(MAX_SAMPLE),
                }
                .into());
            }
        }

        trace!("adc {=u32:#x} comparator {=u8}", module.base(), unit);
        sysctl.enable(ClockGate::adc(module as u8))?;

        let dc = AdcDigitalComparator {
            bus: sysctl.bus(),
            module,
            unit,
        };
        let base = module.base();
        let ctl = DCCTL.nth(u32::from(unit), 4);
        let cmp = DCCMP.nth(u32::from(unit), 4);

        ctl.write(&dc.bus, base, CIM, cfg.mode as u32)?;
        ctl.write(&dc.bus, base, CIC, cfg.condition as u32)?;
        ctl.write(&dc.bus, base, CIE, u32::from(cfg.interrupt))?;
        cmp.write(&dc.bus, base, COMP0, u32::from(cfg.low))?;
        cmp.write(&dc.bus, base, COMP1, u32::from(cfg.high))?;

        Ok(dc)
    }
}

impl<B: Bus> AdcDigitalComparator<B> {
    pub fn unit(&self) -> u8 {
        self.unit
    }

    /// Resets the comparator's interrupt and trigger conditions
    pub fn reset(&mut self) {
        // DCRIC is write-only: one store covers DCINTn and DCTRIGn
        let bits = (1 << self.unit) | (1 << (16 + self.unit));
        self.bus.store(DCRIC.address(self.module.base()), bits);
    }

    pub fn is_pending(&self) -> bool {
        DCISC.is_set(
            &self.bus,
            self.module.base(),
            Field::w1c(self.unit, 1),
        )
    }

    pub fn clear_interrupt(&mut self) -> Result<(), Error> {
        DCISC.write(&self.bus, self.module.base(), Field::w1c(self.unit, 1), 1)?;
        Ok(())
    }
}
