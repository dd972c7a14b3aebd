//! General Purpose Input / Output
//!
//! A [`GpioLine`] drives a single pin of ports A to F through the AHB
//! aperture. Data accesses go through the masked `DATA` alias, so writing one
//! pin never disturbs the other seven, even when an interrupt handler drives
//! another pin of the same port.

use core::convert::Infallible;

pub use crate::hal::digital::v2::PinState;
use crate::hal::digital::v2::{InputPin, OutputPin, StatefulOutputPin, ToggleableOutputPin};

use crate::error::Error;
use crate::nvic::{Interrupt, Nvic, PRIORITIES};
use crate::register::{Bus, Field, Register};
use crate::sysctl::{ClockGate, Sysctl};

const DIR: Register = Register::new(0x400);
const IS: Register = Register::new(0x404);
const IBE: Register = Register::new(0x408);
const IEV: Register = Register::new(0x40C);
const IM: Register = Register::new(0x410).isr_shared();
const RIS: Register = Register::new(0x414);
const MIS: Register = Register::new(0x418);
const ICR: Register = Register::new(0x41C);
const AFSEL: Register = Register::new(0x420);
const DR2R: Register = Register::new(0x500);
const DR4R: Register = Register::new(0x504);
const DR8R: Register = Register::new(0x508);
const ODR: Register = Register::new(0x50C);
const PUR: Register = Register::new(0x510);
const PDR: Register = Register::new(0x514);
const DEN: Register = Register::new(0x51C);
const LOCK: Register = Register::new(0x520);
const CR: Register = Register::new(0x524);
const AMSEL: Register = Register::new(0x528);
const PCTL: Register = Register::new(0x52C);

const LOCK_KEY: u32 = 0x4C4F_434B;
const KEY: Field = Field::wo(0, 32);

/// Pins behind the commit lock: PD7 (NMI) and PF0 (NMI)
const LOCKED: [(Port, u8); 2] = [(Port::D, 7), (Port::F, 0)];

/// GPIO port
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    A = 0,
    B = 1,
    C = 2,
    D = 3,
    E = 4,
    F = 5,
}

struct PortConfig {
    base: u32,
    interrupt: Interrupt,
}

static PORTS: [PortConfig; 6] = [
    PortConfig {
        base: 0x4005_8000,
        interrupt: Interrupt::GPIOA,
    },
    PortConfig {
        base: 0x4005_9000,
        interrupt: Interrupt::GPIOB,
    },
    PortConfig {
        base: 0x4005_A000,
        interrupt: Interrupt::GPIOC,
    },
    PortConfig {
        base: 0x4005_B000,
        interrupt: Interrupt::GPIOD,
    },
    PortConfig {
        base: 0x4005_C000,
        interrupt: Interrupt::GPIOE,
    },
    PortConfig {
        base: 0x4005_D000,
        interrupt: Interrupt::GPIOF,
    },
];

impl Port {
    fn config(self) -> &'static PortConfig {
        &PORTS[self as usize]
    }

    /// Base address of the port's AHB aperture
    pub fn base(self) -> u32 {
        self.config().base
    }

    pub fn interrupt(self) -> Interrupt {
        self.config().interrupt
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Input,
    Output,
}

/// Internal pull resistor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pull {
    None,
    Up,
    Down,
}

/// Output drive strength
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Drive {
    Ma2,
    Ma4,
    Ma8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    Rising,
    Falling,
    RisingFalling,
}

/// Pin configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    direction: Direction,
    pull: Pull,
    digital: bool,
    open_drain: bool,
    drive: Drive,
}

impl Default for Config {
    /// Floating digital input
    fn default() -> Self {
        Config {
            direction: Direction::Input,
            pull: Pull::None,
            digital: true,
            open_drain: false,
            drive: Drive::Ma2,
        }
    }
}

impl Config {
    pub fn input() -> Self {
        Self::default()
    }

    /// Push-pull output
    pub fn output() -> Self {
        Self::default().direction(Direction::Output)
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn pull(mut self, pull: Pull) -> Self {
        self.pull = pull;
        self
    }

    /// Enables the digital function of the pin
    pub fn digital(mut self, digital: bool) -> Self {
        self.digital = digital;
        self
    }

    pub fn open_drain(mut self, open_drain: bool) -> Self {
        self.open_drain = open_drain;
        self
    }

    pub fn drive(mut self, drive: Drive) -> Self {
        self.drive = drive;
        self
    }
}

/// A single configured pin
pub struct GpioLine<B> {
    bus: B,
    port: Port,
    pin: u8,
}

impl<B: Bus + Copy> GpioLine<B> {
    /// Clocks the port and configures `pin`
    pub fn new(sysctl: &mut Sysctl<B>, port: Port, pin: u8, cfg: &Config) -> Result<Self, Error> {
        if pin > 7 {
            return Err(Error::InvalidPin(pin));
        }
        trace!("gpio port {=u8} pin {=u8}", port as u8, pin);

        sysctl.use_ahb(port as u8)?;
        sysctl.enable(ClockGate::gpio(port as u8))?;

        let line = GpioLine {
            bus: sysctl.bus(),
            port,
            pin,
        };
        if LOCKED.contains(&(port, pin)) {
            line.unlock()?;
        }

        line.set(DIR, cfg.direction == Direction::Output)?;
        line.set(AFSEL, false)?;
        line.set(ODR, cfg.open_drain)?;
        line.set(PUR, cfg.pull == Pull::Up)?;
        line.set(PDR, cfg.pull == Pull::Down)?;
        // Setting one drive bit clears the other two in hardware
        let drive = match cfg.drive {
            Drive::Ma2 => DR2R,
            Drive::Ma4 => DR4R,
            Drive::Ma8 => DR8R,
        };
        line.set(drive, true)?;
        line.set(DEN, cfg.digital)?;
        line.set(AMSEL, false)?;

        Ok(line)
    }

    /// Like [`GpioLine::new`], then raises the port's interrupt on `edge`
    pub fn new_with_interrupt<N: Bus>(
        sysctl: &mut Sysctl<B>,
        nvic: &mut Nvic<N>,
        port: Port,
        pin: u8,
        cfg: &Config,
        edge: Edge,
        priority: u8,
    ) -> Result<Self, Error> {
        if priority >= PRIORITIES {
            return Err(Error::InvalidPriority(priority));
        }
        let mut line = Self::new(sysctl, port, pin, cfg)?;
        line.listen(edge)?;
        nvic.activate(port.interrupt(), priority)?;
        Ok(line)
    }
}

impl<B: Bus> GpioLine<B> {
    fn base(&self) -> u32 {
        self.port.base()
    }

    fn bit(&self) -> Field {
        Field::bit(self.pin)
    }

    fn set(&self, reg: Register, on: bool) -> Result<(), Error> {
        reg.write(&self.bus, self.base(), self.bit(), u32::from(on))?;
        Ok(())
    }

    fn unlock(&self) -> Result<(), Error> {
        trace!("unlock port {=u8} pin {=u8}", self.port as u8, self.pin);
        LOCK.write(&self.bus, self.base(), KEY, LOCK_KEY)?;
        self.set(CR, true)
    }

    /// Address of the `DATA` alias that only reaches this pin
    fn data(&self) -> u32 {
        self.base() + (1 << (self.pin + 2))
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Drives the pin
    pub fn write(&mut self, high: bool) {
        self.bus.store(self.data(), u32::from(high) << self.pin);
    }

    /// Level of the pin (input) or last value driven (output)
    pub fn read(&self) -> bool {
        self.bus.load(self.data()) & (1 << self.pin) != 0
    }

    pub fn toggle(&mut self) {
        let high = self.read();
        self.write(!high);
    }

    /// Configures edge detection and unmasks the pin's interrupt
    pub fn listen(&mut self, edge: Edge) -> Result<(), Error> {
        // Mask first so reconfiguring the sense cannot raise a spurious edge
        self.set(IM, false)?;
        self.set(IS, false)?;
        self.set(IBE, edge == Edge::RisingFalling)?;
        self.set(IEV, edge == Edge::Rising)?;
        self.clear_interrupt()?;
        self.set(IM, true)
    }

    pub fn unlisten(&mut self) -> Result<(), Error> {
        self.set(IM, false)
    }

    /// Runs `action` if the pin's edge has been detected
    ///
    /// The flag is left set; clear it with [`GpioLine::clear_interrupt`].
    pub fn poll_interrupt<F: FnOnce()>(&self, action: F) -> bool {
        if RIS.is_set(&self.bus, self.base(), Field::ro(self.pin, 1)) {
            action();
            true
        } else {
            false
        }
    }

    /// Whether the edge reached the interrupt controller
    pub fn is_masked_pending(&self) -> bool {
        MIS.is_set(&self.bus, self.base(), Field::ro(self.pin, 1))
    }

    pub fn clear_interrupt(&mut self) -> Result<(), Error> {
        ICR.write(&self.bus, self.base(), Field::w1c(self.pin, 1), 1)?;
        Ok(())
    }

    /// Hands the pin to a peripheral, `pctl` selects which one
    pub fn into_alternate(self, pctl: u8) -> Result<Self, Error> {
        PCTL.write(
            &self.bus,
            self.base(),
            Field::rw(self.pin * 4, 4),
            u32::from(pctl),
        )?;
        self.set(AFSEL, true)?;
        Ok(self)
    }

    /// Connects the pin to the analog inputs
    pub fn into_analog(self) -> Result<Self, Error> {
        self.set(DIR, false)?;
        self.set(AFSEL, true)?;
        self.set(DEN, false)?;
        self.set(AMSEL, true)?;
        Ok(self)
    }
}

impl<B: Bus> OutputPin for GpioLine<B> {
    type Error = Infallible;

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true);
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false);
        Ok(())
    }

    fn set_state(&mut self, state: PinState) -> Result<(), Self::Error> {
        self.write(state == PinState::High);
        Ok(())
    }
}

impl<B: Bus> StatefulOutputPin for GpioLine<B> {
    fn is_set_high(&self) -> Result<bool, Self::Error> {
        Ok(self.read())
    }

    fn is_set_low(&self) -> Result<bool, Self::Error> {
        Ok(!self.read())
    }
}

impl<B: Bus> ToggleableOutputPin for GpioLine<B> {
    type Error = Infallible;

    fn toggle(&mut self) -> Result<(), Self::Error> {
        GpioLine::toggle(self);
        Ok(())
    }
}

impl<B: Bus> InputPin for GpioLine<B> {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Self::Error> {
        Ok(self.read())
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        Ok(!self.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::read;
    use crate::sim::SimBus;
    use crate::spin::Spin;

    const PORTF: u32 = 0x4005_D000;

    fn bit(bus: &SimBus, reg: Register, pin: u8) -> u32 {
        read(bus, reg.address(PORTF), Field::bit(pin))
    }

    #[test]
    fn output_reads_back_what_was_written() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        let mut led = GpioLine::new(&mut sysctl, Port::F, 1, &Config::output()).unwrap();

        assert_eq!(bit(&bus, DIR, 1), 1);
        assert_eq!(bit(&bus, DEN, 1), 1);

        led.write(true);
        assert!(led.read());
        assert_eq!(bus.stores().last(), Some(&(PORTF + 0x008, 1 << 1)));

        led.write(false);
        assert!(!led.read());

        led.set_high().unwrap();
        assert_eq!(led.is_set_high(), Ok(true));
        ToggleableOutputPin::toggle(&mut led).unwrap();
        assert_eq!(led.is_set_low(), Ok(true));
    }

    #[test]
    fn pin_past_seven_is_refused_untouched() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));

        let res = GpioLine::new(&mut sysctl, Port::A, 8, &Config::output());

        assert!(matches!(res, Err(Error::InvalidPin(8))));
        assert_eq!(bus.store_count(), 0);
    }

    #[test]
    fn pulled_up_input() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        bus.preset(PORTF + PDR.offset(), 1 << 4);

        GpioLine::new(&mut sysctl, Port::F, 4, &Config::input().pull(Pull::Up)).unwrap();

        assert_eq!(bit(&bus, DIR, 4), 0);
        assert_eq!(bit(&bus, PUR, 4), 1);
        assert_eq!(bit(&bus, PDR, 4), 0);
        // Port F moved onto the AHB aperture and clocked
        assert_eq!(bus.peek(0x400F_E06C), 1 << 5);
        assert_eq!(bus.peek(0x400F_E608), 1 << 5);
    }

    #[test]
    fn locked_pin_is_committed_before_configuration() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));

        GpioLine::new(&mut sysctl, Port::F, 0, &Config::input().pull(Pull::Up)).unwrap();

        assert_eq!(bus.peek(LOCK.address(PORTF)), LOCK_KEY);
        assert_eq!(bit(&bus, CR, 0), 1);
    }

    #[test]
    fn unlocked_pin_skips_the_commit() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));

        GpioLine::new(&mut sysctl, Port::F, 3, &Config::output()).unwrap();

        assert_eq!(bus.stores_to(LOCK.address(PORTF)), 0);
    }

    #[test]
    fn falling_edge_interrupt_is_wired_to_the_port_vector() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        let mut nvic = Nvic::new(&bus);

        let sw = GpioLine::new_with_interrupt(
            &mut sysctl,
            &mut nvic,
            Port::F,
            4,
            &Config::input().pull(Pull::Up),
            Edge::Falling,
            3,
        )
        .unwrap();

        assert_eq!(bit(&bus, IS, 4), 0);
        assert_eq!(bit(&bus, IBE, 4), 0);
        assert_eq!(bit(&bus, IEV, 4), 0);
        assert_eq!(bit(&bus, IM, 4), 1);
        assert_eq!(bus.stores_to(ICR.address(PORTF)), 1);
        assert_eq!(nvic.is_enabled(Interrupt::GPIOF), Ok(true));
        assert_eq!(nvic.priority(Interrupt::GPIOF), Ok(3));
        assert_eq!(sw.pin(), 4);
    }

    #[test]
    fn edge_selects_event_and_both_edges_bits() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        let mut line = GpioLine::new(&mut sysctl, Port::F, 2, &Config::input()).unwrap();

        line.listen(Edge::Rising).unwrap();
        assert_eq!(bit(&bus, IBE, 2), 0);
        assert_eq!(bit(&bus, IEV, 2), 1);
        assert_eq!(bit(&bus, IM, 2), 1);

        // Both edges: IEV is ignored by the hardware and left clear
        line.listen(Edge::RisingFalling).unwrap();
        assert_eq!(bit(&bus, IBE, 2), 1);
        assert_eq!(bit(&bus, IEV, 2), 0);
        assert_eq!(bit(&bus, IS, 2), 0);

        line.unlisten().unwrap();
        assert_eq!(bit(&bus, IM, 2), 0);
    }

    #[test]
    fn poll_runs_the_action_only_when_flagged() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        let mut sw = GpioLine::new(&mut sysctl, Port::F, 4, &Config::input()).unwrap();

        let mut hits = 0;
        assert!(!sw.poll_interrupt(|| hits += 1));
        assert_eq!(hits, 0);

        bus.preset(RIS.address(PORTF), 1 << 4);
        bus.preset(ICR.address(PORTF), 1 << 4 | 1 << 2);
        assert!(sw.poll_interrupt(|| hits += 1));
        assert_eq!(hits, 1);

        bus.reset_log();
        sw.clear_interrupt().unwrap();
        assert_eq!(bus.stores(), vec![(ICR.address(PORTF), 1 << 4)]);
        assert_eq!(bus.peek(ICR.address(PORTF)), 1 << 2);
    }

    #[test]
    fn alternate_function_selects_the_pctl_nibble() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        let pin = GpioLine::new(&mut sysctl, Port::B, 6, &Config::output()).unwrap();

        pin.into_alternate(4).unwrap();

        let portb = Port::B.base();
        assert_eq!(bus.peek(PCTL.address(portb)), 4 << 24);
        assert_eq!(read(&bus, AFSEL.address(portb), Field::bit(6)), 1);
    }

    #[test]
    fn analog_pin_drops_the_digital_function() {
        let bus = SimBus::powered();
        let mut sysctl = Sysctl::new(&bus).with_spin(Spin::Bounded(4));
        let pin = GpioLine::new(&mut sysctl, Port::E, 3, &Config::input()).unwrap();

        pin.into_analog().unwrap();

        let porte = Port::E.base();
        assert_eq!(read(&bus, DEN.address(porte), Field::bit(3)), 0);
        assert_eq!(read(&bus, AMSEL.address(porte), Field::bit(3)), 1);
    }
}
