//! # Pulse Width Modulation
//!
//! Each PWM module has four generators, each driving two outputs (A and B)
//! from one 16-bit counter. Both outputs of a generator share its period and
//! counting mode: the second output of a running generator must ask for the
//! same ones, and only its own actions and comparator are programmed.

use cast::u16;

use crate::error::Error;
use crate::hal;
use crate::nvic::{Interrupt, Nvic, PRIORITIES};
use crate::register::{Bus, Field, Register};
use crate::sysctl::{ClockGate, Clocks, Sysctl};
use crate::time::Hertz;

const ENABLE: Register = Register::new(0x008);
const INVERT: Register = Register::new(0x00C);
const INTEN: Register = Register::new(0x014).isr_shared();

// Generator registers, relative to the generator block
const CTL: Register = Register::new(0x00);
const GEN_INTEN: Register = Register::new(0x04).isr_shared();
const RIS: Register = Register::new(0x08);
const ISC: Register = Register::new(0x0C);
const LOAD: Register = Register::new(0x10);
const COUNT: Register = Register::new(0x14);
const CMPA: Register = Register::new(0x18);
const CMPB: Register = Register::new(0x1C);
const GENA: Register = Register::new(0x20);
const GENB: Register = Register::new(0x24);

// CTL
const CTL_ALL: Field = Field::rw(0, 32);
const CTL_ENABLE: Field = Field::bit(0);
const CTL_MODE: Field = Field::bit(1);

// GENA / GENB
const ACTLOAD: Field = Field::rw(2, 2);
const ACTCMPAU: Field = Field::rw(4, 2);
const ACTCMPAD: Field = Field::rw(6, 2);
const ACTCMPBU: Field = Field::rw(8, 2);
const ACTCMPBD: Field = Field::rw(10, 2);

const ACT_LOW: u32 = 2;
const ACT_HIGH: u32 = 3;

const VALUE: Field = Field::rw(0, 16);
const COUNTER: Field = Field::ro(0, 16);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Module {
    Pwm0,
    Pwm1,
}

impl Module {
    pub fn base(self) -> u32 {
        match self {
            Module::Pwm0 => 0x4002_8000,
            Module::Pwm1 => 0x4002_9000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Generator {
    G0 = 0,
    G1 = 1,
    G2 = 2,
    G3 = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Output {
    A = 0,
    B = 1,
}

/// Counter mode (`_CTL.MODE`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Counting {
    /// Counts from `LOAD` down to zero, left-aligned pulses
    Down,
    /// Counts up to `LOAD` and back down, center-aligned pulses
    UpDown,
}

/// Generator event that raises an interrupt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    CounterZero,
    CounterLoad,
    /// The counter matches this output's comparator while counting up
    CompareUp,
    /// The counter matches this output's comparator while counting down
    CompareDown,
}

impl Event {
    /// Bit of `_INTEN`, `_RIS` and `_ISC`
    fn bit(self, output: Output) -> u8 {
        let b = output as u8 * 2;
        match self {
            Event::CounterZero => 0,
            Event::CounterLoad => 1,
            Event::CompareUp => 2 + b,
            Event::CompareDown => 3 + b,
        }
    }
}

/// Channel configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    counting: Counting,
    frequency: Hertz,
    duty: u16,
    inverted: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            counting: Counting::Down,
            frequency: Hertz(1_000),
            duty: 0,
            inverted: false,
        }
    }
}

impl Config {
    pub fn counting(mut self, counting: Counting) -> Self {
        self.counting = counting;
        self
    }

    pub fn frequency<F: Into<Hertz>>(mut self, frequency: F) -> Self {
        self.frequency = frequency.into();
        self
    }

    /// Initial duty cycle, in counter ticks (see [`PwmChannel::max_duty`])
    pub fn duty(mut self, duty: u16) -> Self {
        self.duty = duty;
        self
    }

    pub fn inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }
}

/// One PWM output
pub struct PwmChannel<B> {
    bus: B,
    module: Module,
    generator: Generator,
    output: Output,
    counting: Counting,
    event: Event,
}

impl<B: Bus + Copy> PwmChannel<B> {
    /// Clocks the module and starts the generator driving `output`
    ///
    /// If the generator already runs for its other output, its period and
    /// counting mode are kept; a `cfg` asking for different ones is refused
    /// with [`Error::GeneratorInUse`].
    pub fn new(
        sysctl: &mut Sysctl<B>,
        clocks: Clocks,
        module: Module,
        generator: Generator,
        output: Output,
        cfg: &Config,
    ) -> Result<Self, Error> {
        let load = load_value(clocks.pwmclk(), cfg)?;
        if cfg.duty > load {
            return Err(Error::InvalidDuty);
        }

        let gate = ClockGate::pwm(module as u8);
        let bus = sysctl.bus();
        let g = generator_base(module, generator);
        // Registers of an unclocked module must not be read
        let running = gate.is_ready(&bus) && CTL.is_set(&bus, g, CTL_ENABLE);
        if running {
            let same_load = LOAD.read(&bus, g, VALUE) == u32::from(load);
            let up_down = cfg.counting == Counting::UpDown;
            let same_mode = CTL.is_set(&bus, g, CTL_MODE) == up_down;
            if !(same_load && same_mode) {
                return Err(Error::GeneratorInUse);
            }
        }

        trace!("pwm {=u32:#x} generator {=u8}", module.base(), generator as u8);
        sysctl.enable(gate)?;

        let ch = PwmChannel {
            bus,
            module,
            generator,
            output,
            counting: cfg.counting,
            event: Event::CounterZero,
        };

        if !running {
            CTL.write(&ch.bus, g, CTL_ALL, 0)?;
            LOAD.write(&ch.bus, g, VALUE, u32::from(load))?;
        }
        let (gen, up, down) = match output {
            Output::A => (GENA, ACTCMPAU, ACTCMPAD),
            Output::B => (GENB, ACTCMPBU, ACTCMPBD),
        };
        match cfg.counting {
            Counting::Down => {
                gen.write(&ch.bus, g, ACTLOAD, ACT_HIGH)?;
                gen.write(&ch.bus, g, down, ACT_LOW)?;
            }
            Counting::UpDown => {
                gen.write(&ch.bus, g, up, ACT_LOW)?;
                gen.write(&ch.bus, g, down, ACT_HIGH)?;
            }
        }
        ch.write_compare(cfg.duty)?;
        if !running {
            CTL.write(&ch.bus, g, CTL_MODE, u32::from(cfg.counting == Counting::UpDown))?;
            CTL.write(&ch.bus, g, CTL_ENABLE, 1)?;
        }

        let base = module.base();
        INVERT.write(&ch.bus, base, ch.output_bit(), u32::from(cfg.inverted))?;
        ENABLE.write(&ch.bus, base, ch.output_bit(), 1)?;
        debug!("pwm load {=u16} duty {=u16}", load, cfg.duty);

        Ok(ch)
    }

    /// Like [`PwmChannel::new`], with `event` routed to the generator's
    /// interrupt
    #[allow(clippy::too_many_arguments)]
    pub fn new_with_interrupt<N: Bus>(
        sysctl: &mut Sysctl<B>,
        nvic: &mut Nvic<N>,
        clocks: Clocks,
        module: Module,
        generator: Generator,
        output: Output,
        cfg: &Config,
        event: Event,
        priority: u8,
    ) -> Result<Self, Error> {
        if priority >= PRIORITIES {
            return Err(Error::InvalidPriority(priority));
        }
        let mut ch = Self::new(sysctl, clocks, module, generator, output, cfg)?;
        ch.listen(event)?;
        INTEN.write(&ch.bus, module.base(), Field::bit(generator as u8), 1)?;
        nvic.activate(ch.interrupt(), priority)?;
        Ok(ch)
    }
}

/// Base of a generator's register block
fn generator_base(module: Module, generator: Generator) -> u32 {
    module.base() + 0x40 + 0x40 * generator as u32
}

/// `LOAD` for the requested frequency
fn load_value(pwmclk: Hertz, cfg: &Config) -> Result<u16, Error> {
    let ticks = pwmclk.0 / cfg.frequency.0.max(1);
    let load = match cfg.counting {
        Counting::Down => ticks.checked_sub(1),
        // Up then down: one period is twice LOAD
        Counting::UpDown => Some(ticks / 2),
    };
    load.and_then(|l| u16(l).ok())
        .filter(|&l| l > 0)
        .ok_or(Error::InvalidInterval)
}

impl<B: Bus> PwmChannel<B> {
    fn generator_base(&self) -> u32 {
        generator_base(self.module, self.generator)
    }

    /// Bit of `ENABLE` and `INVERT`
    fn output_bit(&self) -> Field {
        Field::bit(self.generator as u8 * 2 + self.output as u8)
    }

    fn event_bit(&self) -> u8 {
        self.event.bit(self.output)
    }

    fn compare(&self) -> Register {
        match self.output {
            Output::A => CMPA,
            Output::B => CMPB,
        }
    }

    fn write_compare(&self, duty: u16) -> Result<(), Error> {
        let cmp = match self.counting {
            Counting::Down => self.max_duty() - duty,
            Counting::UpDown => duty,
        };
        self.compare()
            .write(&self.bus, self.generator_base(), VALUE, u32::from(cmp))?;
        Ok(())
    }

    pub fn interrupt(&self) -> Interrupt {
        use Interrupt::*;
        let lines = match self.module {
            Module::Pwm0 => [PWM0_0, PWM0_1, PWM0_2, PWM0_3],
            Module::Pwm1 => [PWM1_0, PWM1_1, PWM1_2, PWM1_3],
        };
        lines[self.generator as usize]
    }

    /// Counter top; the duty cycle that keeps the output high
    pub fn max_duty(&self) -> u16 {
        LOAD.read(&self.bus, self.generator_base(), VALUE) as u16
    }

    pub fn duty(&self) -> u16 {
        let cmp = self
            .compare()
            .read(&self.bus, self.generator_base(), VALUE) as u16;
        match self.counting {
            Counting::Down => self.max_duty().saturating_sub(cmp),
            Counting::UpDown => cmp,
        }
    }

    /// Sets the number of ticks per period the output is high
    pub fn set_duty(&mut self, duty: u16) -> Result<(), Error> {
        if duty > self.max_duty() {
            return Err(Error::InvalidDuty);
        }
        self.write_compare(duty)
    }

    pub fn count(&self) -> u16 {
        COUNT.read(&self.bus, self.generator_base(), COUNTER) as u16
    }

    pub fn enable(&mut self) -> Result<(), Error> {
        ENABLE.write(&self.bus, self.module.base(), self.output_bit(), 1)?;
        Ok(())
    }

    pub fn disable(&mut self) -> Result<(), Error> {
        ENABLE.write(&self.bus, self.module.base(), self.output_bit(), 0)?;
        Ok(())
    }

    /// Selects the event polled by [`PwmChannel::poll_status`] and routes it
    /// to the generator interrupt
    pub fn listen(&mut self, event: Event) -> Result<(), Error> {
        self.event = event;
        GEN_INTEN.write(&self.bus, self.generator_base(), Field::bit(self.event_bit()), 1)?;
        Ok(())
    }

    /// Runs `action` and clears the flag if the selected event happened
    pub fn poll_status<F: FnOnce()>(&mut self, action: F) -> Result<bool, Error> {
        let raised = RIS.is_set(
            &self.bus,
            self.generator_base(),
            Field::ro(self.event_bit(), 1),
        );
        if !raised {
            return Ok(false);
        }
        action();
        self.clear_interrupt()?;
        Ok(true)
    }

    pub fn clear_interrupt(&mut self) -> Result<(), Error> {
        ISC.write(
            &self.bus,
            self.generator_base(),
            Field::w1c(self.event_bit(), 1),
            1,
        )?;
        Ok(())
    }
}

impl<B: Bus> hal::PwmPin for PwmChannel<B> {
    type Duty = u16;

    fn disable(&mut self) {
        // Single-bit writes of 0 or 1 cannot be refused
        let _ = PwmChannel::disable(self);
    }

    fn enable(&mut self) {
        let _ = PwmChannel::enable(self);
    }

    fn get_duty(&self) -> Self::Duty {
        self.duty()
    }

    fn get_max_duty(&self) -> Self::Duty {
        self.max_duty()
    }

    fn set_duty(&mut self, duty: Self::Duty) {
        let duty = duty.min(self.max_duty());
        let _ = self.write_compare(duty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::PwmPin;
    use crate::register::read;
    use crate::sim::SimBus;
    use crate::spin::Spin;

    const PWM1: u32 = 0x4002_9000;

    /// 1 MHz PWM clock
    fn clocks() -> Clocks {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        crate::sysctl::ClockConfig::default()
            .sysclk(crate::sysctl::SystemClock::Mhz16)
            .pwm_divider(crate::sysctl::PwmDivider::Div16)
            .freeze(&mut sysctl)
            .unwrap()
    }

    fn open<'a>(
        sysctl: &mut Sysctl<&'a SimBus>,
        module: Module,
        generator: Generator,
        output: Output,
        cfg: &Config,
    ) -> Result<PwmChannel<&'a SimBus>, Error> {
        PwmChannel::new(sysctl, clocks(), module, generator, output, cfg)
    }

    #[test]
    fn count_down_output_a() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        let cfg = Config::default().frequency(Hertz(1_000)).duty(250);

        let ch = open(&mut sysctl, Module::Pwm1, Generator::G3, Output::A, &cfg).unwrap();

        let g = PWM1 + 0x100;
        assert_eq!(bus.peek(LOAD.address(g)), 999);
        // high from LOAD, low once the counter passes CMPA on the way down
        assert_eq!(bus.peek(CMPA.address(g)), 999 - 250);
        assert_eq!(read(&bus, GENA.address(g), ACTLOAD), ACT_HIGH);
        assert_eq!(read(&bus, GENA.address(g), ACTCMPAD), ACT_LOW);
        assert_eq!(read(&bus, CTL.address(g), CTL_MODE), 0);
        assert_eq!(read(&bus, CTL.address(g), CTL_ENABLE), 1);
        assert_eq!(bus.peek(ENABLE.address(PWM1)), 1 << 6);
        assert_eq!(ch.duty(), 250);
        assert_eq!(ch.max_duty(), 999);
        // PWM module 1 clock gate
        assert_eq!(bus.peek(0x400F_E640), 1 << 1);
    }

    #[test]
    fn up_down_output_b_compares_on_the_duty() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        let cfg = Config::default()
            .counting(Counting::UpDown)
            .frequency(Hertz(1_000))
            .duty(100)
            .inverted(true);

        let mut ch = open(&mut sysctl, Module::Pwm1, Generator::G0, Output::B, &cfg).unwrap();

        let g = PWM1 + 0x40;
        assert_eq!(bus.peek(LOAD.address(g)), 500);
        assert_eq!(bus.peek(CMPB.address(g)), 100);
        assert_eq!(read(&bus, GENB.address(g), ACTCMPBU), ACT_LOW);
        assert_eq!(read(&bus, GENB.address(g), ACTCMPBD), ACT_HIGH);
        assert_eq!(read(&bus, CTL.address(g), CTL_MODE), 1);
        assert_eq!(bus.peek(INVERT.address(PWM1)), 1 << 1);

        ch.set_duty(400).unwrap();
        assert_eq!(ch.duty(), 400);
        assert_eq!(ch.set_duty(501), Err(Error::InvalidDuty));
        assert_eq!(ch.duty(), 400);
    }

    #[test]
    fn bad_duty_or_period_is_refused_untouched() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));

        let cfg = Config::default().frequency(Hertz(1_000)).duty(1_000);
        let res = open(&mut sysctl, Module::Pwm0, Generator::G1, Output::A, &cfg);
        assert!(matches!(res, Err(Error::InvalidDuty)));

        // 1 MHz / 10 Hz needs 100_000 ticks
        let cfg = Config::default().frequency(Hertz(10));
        let res = open(&mut sysctl, Module::Pwm0, Generator::G1, Output::A, &cfg);
        assert!(matches!(res, Err(Error::InvalidInterval)));

        assert_eq!(bus.store_count(), 0);
    }

    #[test]
    fn pwm_pin_clamps_and_toggles_the_output() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        let mut ch = PwmChannel::new(
            &mut sysctl,
            clocks(),
            Module::Pwm0,
            Generator::G2,
            Output::B,
            &Config::default(),
        )
        .unwrap();

        PwmPin::set_duty(&mut ch, u16::MAX);
        assert_eq!(PwmPin::get_duty(&ch), PwmPin::get_max_duty(&ch));

        PwmPin::disable(&mut ch);
        assert_eq!(bus.peek(ENABLE.address(0x4002_8000)), 0);
        PwmPin::enable(&mut ch);
        assert_eq!(bus.peek(ENABLE.address(0x4002_8000)), 1 << 5);
    }

    #[test]
    fn interrupt_on_compare_down() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        let mut nvic = Nvic::new(&bus);

        let mut ch = PwmChannel::new_with_interrupt(
            &mut sysctl,
            &mut nvic,
            clocks(),
            Module::Pwm0,
            Generator::G1,
            Output::B,
            &Config::default(),
            Event::CompareDown,
            4,
        )
        .unwrap();

        let g = 0x4002_8000 + 0x80;
        assert_eq!(bus.peek(GEN_INTEN.address(g)), 1 << 5);
        assert_eq!(bus.peek(INTEN.address(0x4002_8000)), 1 << 1);
        assert_eq!(ch.interrupt(), Interrupt::PWM0_1);
        assert_eq!(nvic.is_enabled(Interrupt::PWM0_1), Ok(true));

        let mut hits = 0;
        assert_eq!(ch.poll_status(|| hits += 1), Ok(false));
        bus.preset(RIS.address(g), 1 << 5);
        bus.reset_log();
        assert_eq!(ch.poll_status(|| hits += 1), Ok(true));
        assert_eq!(hits, 1);
        assert_eq!(bus.stores(), vec![(ISC.address(g), 1 << 5)]);
    }

    #[test]
    fn second_output_shares_the_running_generator() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        let a_cfg = Config::default().frequency(Hertz(1_000)).duty(250);
        let a = open(&mut sysctl, Module::Pwm1, Generator::G0, Output::A, &a_cfg).unwrap();

        let g = PWM1 + 0x40;
        bus.reset_log();
        let b_cfg = Config::default().frequency(Hertz(1_000)).duty(600);
        let b = open(&mut sysctl, Module::Pwm1, Generator::G0, Output::B, &b_cfg).unwrap();

        assert_eq!(bus.stores_to(CTL.address(g)), 0);
        assert_eq!(bus.stores_to(LOAD.address(g)), 0);
        assert_eq!(bus.stores_to(CMPA.address(g)), 0);
        assert_eq!(a.duty(), 250);
        assert_eq!(b.duty(), 600);
        assert_eq!(bus.peek(ENABLE.address(PWM1)), 0b11);
    }

    #[test]
    fn conflicting_second_output_is_refused_untouched() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        let a_cfg = Config::default().frequency(Hertz(1_000)).duty(250);
        let a = open(&mut sysctl, Module::Pwm1, Generator::G0, Output::A, &a_cfg).unwrap();
        bus.reset_log();

        let faster = Config::default().frequency(Hertz(4_000));
        let res = open(&mut sysctl, Module::Pwm1, Generator::G0, Output::B, &faster);
        assert!(matches!(res, Err(Error::GeneratorInUse)));

        // Up/down counting on a count-down generator
        let centered = Config::default().counting(Counting::UpDown).frequency(Hertz(500));
        let res = open(&mut sysctl, Module::Pwm1, Generator::G0, Output::B, &centered);
        assert!(matches!(res, Err(Error::GeneratorInUse)));

        assert_eq!(bus.store_count(), 0);
        assert_eq!(a.duty(), 250);
        assert_eq!(a.max_duty(), 999);
    }
}
