//! System Control: peripheral clock gates and the PLL

use crate::error::Error;
use crate::register::{Bus, Field, Register};
use crate::spin::Spin;
use crate::time::Hertz;

pub(crate) const BASE: u32 = 0x400F_E000;

const RIS: Register = Register::new(0x050);
const RCC: Register = Register::new(0x060);
const GPIOHBCTL: Register = Register::new(0x06C);
const RCC2: Register = Register::new(0x070);

const RCGCTIMER: Register = Register::new(0x604);
const RCGCGPIO: Register = Register::new(0x608);
const RCGCADC: Register = Register::new(0x638);
const RCGCPWM: Register = Register::new(0x640);
const RCGCWTIMER: Register = Register::new(0x65C);

const PRTIMER: Register = Register::new(0xA04);
const PRGPIO: Register = Register::new(0xA08);
const PRADC: Register = Register::new(0xA38);
const PRPWM: Register = Register::new(0xA40);
const PRWTIMER: Register = Register::new(0xA5C);

/// Every peripheral-ready register the drivers poll
#[cfg(test)]
pub(crate) const READY_REGISTERS: [u32; 5] = [
    PRTIMER.address(BASE),
    PRGPIO.address(BASE),
    PRADC.address(BASE),
    PRPWM.address(BASE),
    PRWTIMER.address(BASE),
];

#[cfg(test)]
pub(crate) const RIS_ADDRESS: u32 = RIS.address(BASE);

// RIS
const PLLLRIS: Field = Field::ro(6, 1);

// RCC
const MOSCDIS: Field = Field::bit(0);
const XTAL: Field = Field::rw(6, 5);
const PWMDIV: Field = Field::rw(17, 3);
const USEPWMDIV: Field = Field::bit(20);
const USESYSDIV: Field = Field::bit(22);

// RCC2
const OSCSRC2: Field = Field::rw(4, 3);
const BYPASS2: Field = Field::bit(11);
const PWRDN2: Field = Field::bit(13);
const SYSDIV2LSB: Field = Field::bit(22);
const SYSDIV2: Field = Field::rw(23, 6);
const DIV400: Field = Field::bit(30);
const USERCC2: Field = Field::bit(31);

/// PLL output before the system divider
const PLL_VCO: u32 = 400_000_000;
/// Precision internal oscillator, the clock out of reset
const PIOSC: u32 = 16_000_000;

/// A peripheral's run-mode clock gate and its ready flag
///
/// Gates are built by the drivers from their peripheral enums, so the bit
/// index is always one the part has.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockGate {
    rcgc: Register,
    pr: Register,
    index: u8,
}

impl ClockGate {
    pub(crate) const fn new(rcgc: Register, pr: Register, index: u8) -> Self {
        ClockGate { rcgc, pr, index }
    }

    /// GPIO port, 0 = A .. 5 = F
    pub(crate) const fn gpio(port: u8) -> Self {
        Self::new(RCGCGPIO, PRGPIO, port)
    }

    /// 16/32-bit timer block
    pub(crate) const fn timer(n: u8) -> Self {
        Self::new(RCGCTIMER, PRTIMER, n)
    }

    /// 32/64-bit wide timer block
    pub(crate) const fn wide_timer(n: u8) -> Self {
        Self::new(RCGCWTIMER, PRWTIMER, n)
    }

    pub(crate) const fn adc(n: u8) -> Self {
        Self::new(RCGCADC, PRADC, n)
    }

    pub(crate) const fn pwm(n: u8) -> Self {
        Self::new(RCGCPWM, PRPWM, n)
    }

    /// Requests the clock for the peripheral
    pub fn enable<B: Bus>(&self, bus: &B) -> Result<(), Error> {
        self.rcgc.write(bus, BASE, Field::bit(self.index), 1)?;
        Ok(())
    }

    /// Waits until the peripheral reports that its registers may be accessed
    pub fn wait_ready<B: Bus>(&self, bus: &B, spin: Spin) -> Result<(), Error> {
        let ready = Field::ro(self.index, 1);
        spin.until(|| self.pr.is_set(bus, BASE, ready))?;
        Ok(())
    }

    pub fn is_ready<B: Bus>(&self, bus: &B) -> bool {
        self.pr.is_set(bus, BASE, Field::ro(self.index, 1))
    }
}

/// PLL bring-up progress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PllState {
    /// Reset state, system clock from the default oscillator
    DefaultOscillator,
    /// PLL bypassed while its source and divisor are programmed
    BypassedConfiguring,
    /// PLL powered, waiting for the lock flag
    PoweredUpAwaitingLock,
    /// System clock runs from the locked PLL
    Locked,
}

/// Handle to the System Control block
///
/// Every driver constructor takes this to open its peripheral's clock gate.
pub struct Sysctl<B> {
    bus: B,
    spin: Spin,
    pll: PllState,
}

impl<B: Bus + Copy> Sysctl<B> {
    pub fn new(bus: B) -> Self {
        Sysctl {
            bus,
            spin: Spin::Forever,
            pll: PllState::DefaultOscillator,
        }
    }

    /// Polling policy for clock gates and the PLL lock
    pub fn with_spin(mut self, spin: Spin) -> Self {
        self.spin = spin;
        self
    }

    pub fn spin(&self) -> Spin {
        self.spin
    }

    pub(crate) fn bus(&self) -> B {
        self.bus
    }

    pub fn pll_state(&self) -> PllState {
        self.pll
    }

    /// Opens `gate` and waits until the peripheral is ready
    ///
    /// No other register of the peripheral may be touched before this returns.
    pub fn enable(&mut self, gate: ClockGate) -> Result<(), Error> {
        trace!("clock gate {=u32:#x} bit {=u8}", gate.rcgc.offset(), gate.index);
        gate.enable(&self.bus)?;
        gate.wait_ready(&self.bus, self.spin)
    }

    /// Moves GPIO port `port` onto the AHB aperture
    pub(crate) fn use_ahb(&mut self, port: u8) -> Result<(), Error> {
        GPIOHBCTL.write(&self.bus, BASE, Field::bit(port), 1)?;
        Ok(())
    }

    fn rcc(&self, field: Field, value: u32) -> Result<(), Error> {
        RCC.write(&self.bus, BASE, field, value)?;
        Ok(())
    }

    fn rcc2(&self, field: Field, value: u32) -> Result<(), Error> {
        RCC2.write(&self.bus, BASE, field, value)?;
        Ok(())
    }

    fn lock_pll(&mut self, cfg: &ClockConfig) -> Result<(), Error> {
        // RCC2 has the wider divisor fields
        self.rcc2(USERCC2, 1)?;

        // Keep the PLL off the system clock while it is reprogrammed
        self.rcc2(BYPASS2, 1)?;
        self.pll = PllState::BypassedConfiguring;
        debug!("pll bypassed");

        self.rcc(XTAL, cfg.crystal as u32)?;
        self.rcc2(OSCSRC2, cfg.oscillator as u32)?;
        if cfg.oscillator == Oscillator::Main {
            self.rcc(MOSCDIS, 0)?;
        }

        self.rcc2(PWRDN2, 0)?;
        self.pll = PllState::PoweredUpAwaitingLock;
        debug!("pll powered up");

        // 7-bit divisor of the 400 MHz output: SYSDIV2 holds the upper six
        // bits, SYSDIV2LSB the lowest
        let div = cfg.sysclk as u32 - 1;
        self.rcc2(DIV400, 1)?;
        self.rcc2(SYSDIV2LSB, div & 1)?;
        self.rcc2(SYSDIV2, div >> 1)?;
        self.rcc(USESYSDIV, 1)?;

        self.spin
            .until(|| RIS.is_set(&self.bus, BASE, PLLLRIS))?;

        self.rcc2(BYPASS2, 0)?;
        self.pll = PllState::Locked;
        debug!("pll locked");
        Ok(())
    }
}

/// Crystal attached to the main oscillator (`RCC.XTAL`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Crystal {
    Mhz5 = 0x09,
    Mhz6 = 0x0B,
    Mhz8 = 0x0E,
    Mhz10 = 0x10,
    Mhz12 = 0x11,
    Mhz16 = 0x15,
    Mhz18 = 0x17,
    Mhz20 = 0x18,
    Mhz24 = 0x19,
    Mhz25 = 0x1A,
}

/// PLL input (`RCC2.OSCSRC2`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Oscillator {
    /// Main oscillator, driven by the crystal
    Main = 0,
    /// Precision internal oscillator (16 MHz)
    Internal = 1,
    /// Precision internal oscillator divided by 4
    InternalDiv4 = 2,
    /// Low-frequency internal oscillator
    LowFrequency = 3,
    /// 32.768 kHz hibernation oscillator
    Hibernate = 7,
}

/// System clock, as the divisor of the 400 MHz PLL output
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SystemClock {
    Mhz80 = 5,
    Mhz66_67 = 6,
    Mhz57_14 = 7,
    Mhz50 = 8,
    Mhz44_44 = 9,
    Mhz40 = 10,
    Mhz33_33 = 12,
    Mhz25 = 16,
    Mhz20 = 20,
    Mhz16 = 25,
    Mhz10 = 40,
    Mhz8 = 50,
    Mhz5 = 80,
    Mhz4 = 100,
    Mhz3_13 = 128,
}

impl SystemClock {
    pub fn frequency(self) -> Hertz {
        Hertz(PLL_VCO / self as u32)
    }
}

/// Divider between the system clock and the PWM modules (`RCC.PWMDIV`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PwmDivider {
    Div2 = 0,
    Div4 = 1,
    Div8 = 2,
    Div16 = 3,
    Div32 = 4,
    Div64 = 5,
}

impl PwmDivider {
    fn divisor(self) -> u32 {
        2 << self as u32
    }
}

/// Clock configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockConfig {
    crystal: Crystal,
    oscillator: Oscillator,
    sysclk: SystemClock,
    pwm_divider: Option<PwmDivider>,
}

impl Default for ClockConfig {
    /// 80 MHz from the 16 MHz crystal of the LaunchPad
    fn default() -> Self {
        ClockConfig {
            crystal: Crystal::Mhz16,
            oscillator: Oscillator::Main,
            sysclk: SystemClock::Mhz80,
            pwm_divider: None,
        }
    }
}

impl ClockConfig {
    pub fn crystal(mut self, crystal: Crystal) -> Self {
        self.crystal = crystal;
        self
    }

    pub fn oscillator(mut self, oscillator: Oscillator) -> Self {
        self.oscillator = oscillator;
        self
    }

    /// Sets the system (core) frequency
    pub fn sysclk(mut self, sysclk: SystemClock) -> Self {
        self.sysclk = sysclk;
        self
    }

    /// Clocks the PWM modules from the divided system clock
    pub fn pwm_divider(mut self, div: PwmDivider) -> Self {
        self.pwm_divider = Some(div);
        self
    }

    /// Locks the PLL and switches the system clock onto it
    ///
    /// With [`Spin::Forever`] this does not return until the PLL locks. With a
    /// bounded spin a PLL that does not lock yields [`Error::Timeout`] and
    /// leaves the system clock on the bypass path.
    pub fn freeze<B: Bus + Copy>(&self, sysctl: &mut Sysctl<B>) -> Result<Clocks, Error> {
        sysctl.lock_pll(self)?;

        let sysclk = self.sysclk.frequency();
        let pwmclk = match self.pwm_divider {
            Some(div) => {
                sysctl.rcc(PWMDIV, div as u32)?;
                sysctl.rcc(USEPWMDIV, 1)?;
                Hertz(sysclk.0 / div.divisor())
            }
            None => {
                sysctl.rcc(USEPWMDIV, 0)?;
                sysclk
            }
        };

        Ok(Clocks { sysclk, pwmclk })
    }
}

/// Frozen clock frequencies
///
/// The existence of this value indicates that the clock configuration can no longer be changed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Clocks {
    sysclk: Hertz,
    pwmclk: Hertz,
}

impl Default for Clocks {
    /// Clocks out of reset: everything on the internal oscillator
    fn default() -> Self {
        Clocks {
            sysclk: Hertz(PIOSC),
            pwmclk: Hertz(PIOSC),
        }
    }
}

impl Clocks {
    /// Returns the system (core) frequency
    pub fn sysclk(&self) -> Hertz {
        self.sysclk
    }

    /// Returns the frequency the PWM modules count at
    pub fn pwmclk(&self) -> Hertz {
        self.pwmclk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::read;
    use crate::sim::SimBus;

    fn rcc2(bus: &SimBus, field: Field) -> u32 {
        read(bus, RCC2.address(BASE), field)
    }

    #[test]
    fn gate_sets_bit_then_waits_for_ready() {
        let bus = SimBus::new();
        bus.preset(PRGPIO.address(BASE), 1 << 5);
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));

        sysctl.enable(ClockGate::gpio(5)).unwrap();
        assert_eq!(bus.peek(RCGCGPIO.address(BASE)), 1 << 5);
    }

    #[test]
    fn gate_that_never_becomes_ready_times_out() {
        let bus = SimBus::new();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(10));

        assert_eq!(sysctl.enable(ClockGate::adc(0)), Err(Error::Timeout));
        // The request itself went out
        assert_eq!(bus.peek(RCGCADC.address(BASE)), 1);
    }

    #[test]
    fn pll_divisor_is_split_across_two_fields() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));

        let clocks = ClockConfig::default()
            .sysclk(SystemClock::Mhz80)
            .freeze(&mut sysctl)
            .unwrap();

        assert_eq!(rcc2(&bus, SYSDIV2LSB), 0);
        assert_eq!(rcc2(&bus, SYSDIV2), 2);
        assert_eq!(rcc2(&bus, DIV400), 1);
        assert_eq!(clocks.sysclk(), Hertz(80_000_000));
    }

    #[test]
    fn odd_divisor_sets_the_extra_bit() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));

        let clocks = ClockConfig::default()
            .sysclk(SystemClock::Mhz66_67)
            .freeze(&mut sysctl)
            .unwrap();

        assert_eq!(rcc2(&bus, SYSDIV2LSB), 1);
        assert_eq!(rcc2(&bus, SYSDIV2), 2);
        assert_eq!(clocks.sysclk(), Hertz(66_666_666));
    }

    #[test]
    fn locked_pll_is_no_longer_bypassed() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        assert_eq!(sysctl.pll_state(), PllState::DefaultOscillator);

        ClockConfig::default()
            .crystal(Crystal::Mhz16)
            .freeze(&mut sysctl)
            .unwrap();

        assert_eq!(sysctl.pll_state(), PllState::Locked);
        assert_eq!(rcc2(&bus, USERCC2), 1);
        assert_eq!(rcc2(&bus, BYPASS2), 0);
        assert_eq!(rcc2(&bus, PWRDN2), 0);
        assert_eq!(rcc2(&bus, OSCSRC2), Oscillator::Main as u32);
        assert_eq!(read(&bus, RCC.address(BASE), XTAL), 0x15);
    }

    #[test]
    fn pll_that_never_locks_stays_bypassed() {
        let bus = SimBus::new();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(8));

        let res = ClockConfig::default().freeze(&mut sysctl);

        assert_eq!(res, Err(Error::Timeout));
        assert_eq!(sysctl.pll_state(), PllState::PoweredUpAwaitingLock);
        assert_eq!(rcc2(&bus, BYPASS2), 1);
    }

    #[test]
    fn pwm_clock_divider() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));

        let clocks = ClockConfig::default()
            .sysclk(SystemClock::Mhz40)
            .pwm_divider(PwmDivider::Div8)
            .freeze(&mut sysctl)
            .unwrap();

        assert_eq!(clocks.pwmclk(), Hertz(5_000_000));
        assert_eq!(read(&bus, RCC.address(BASE), USEPWMDIV), 1);
        assert_eq!(read(&bus, RCC.address(BASE), PWMDIV), 2);
    }

    #[test]
    fn every_driver_gate_is_a_valid_bit() {
        use crate::{adc, pwm, timer};

        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));

        use crate::gpio::Port::*;
        for port in [A, B, C, D, E, F] {
            sysctl.enable(ClockGate::gpio(port as u8)).unwrap();
        }
        assert_eq!(bus.peek(RCGCGPIO.address(BASE)), 0x3F);

        let blocks = [
            timer::Block::Timer0,
            timer::Block::Timer5,
            timer::Block::WideTimer0,
            timer::Block::WideTimer5,
        ];
        for block in blocks {
            sysctl.enable(block.gate()).unwrap();
        }
        assert_eq!(bus.peek(RCGCTIMER.address(BASE)), 1 | 1 << 5);
        assert_eq!(bus.peek(RCGCWTIMER.address(BASE)), 1 | 1 << 5);

        for m in [adc::Module::Adc0 as u8, adc::Module::Adc1 as u8] {
            sysctl.enable(ClockGate::adc(m)).unwrap();
        }
        for m in [pwm::Module::Pwm0 as u8, pwm::Module::Pwm1 as u8] {
            sysctl.enable(ClockGate::pwm(m)).unwrap();
        }
        assert_eq!(bus.peek(RCGCADC.address(BASE)), 0b11);
        assert_eq!(bus.peek(RCGCPWM.address(BASE)), 0b11);
    }
}
