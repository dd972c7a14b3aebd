//! Nested Vectored Interrupt Controller
//!
//! Interrupts are enabled one at a time with a priority, usually from a
//! driver's interrupt-mode constructor. The two writes of [`Nvic::activate`]
//! (priority, then enable) are not one transaction; call it before interrupts
//! are globally unmasked.
//!
//! The `ACTIVE` registers are maintained by the hardware alone and are
//! declared read-only here.

pub use cortex_m::interrupt::InterruptNumber;

use crate::error::Error;
use crate::register::{Bus, Field, Register};

const BASE: u32 = 0xE000_E000;

const EN: Register = Register::new(0x100);
const DIS: Register = Register::new(0x180);
const ACTIVE: Register = Register::new(0x300);
const PRI: Register = Register::new(0x400);

/// Number of interrupt lines of the part
pub const INTERRUPTS: u16 = 139;

/// Interrupt priorities are 3 bits wide, 0 is the most urgent
pub const PRIORITIES: u8 = 8;

/// Interrupt lines of the TM4C123GH6PM
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(non_camel_case_types)]
#[repr(u16)]
pub enum Interrupt {
    GPIOA = 0,
    GPIOB = 1,
    GPIOC = 2,
    GPIOD = 3,
    GPIOE = 4,
    UART0 = 5,
    UART1 = 6,
    SSI0 = 7,
    I2C0 = 8,
    PWM0_FAULT = 9,
    PWM0_0 = 10,
    PWM0_1 = 11,
    PWM0_2 = 12,
    QEI0 = 13,
    ADC0SS0 = 14,
    ADC0SS1 = 15,
    ADC0SS2 = 16,
    ADC0SS3 = 17,
    WATCHDOG = 18,
    TIMER0A = 19,
    TIMER0B = 20,
    TIMER1A = 21,
    TIMER1B = 22,
    TIMER2A = 23,
    TIMER2B = 24,
    COMP0 = 25,
    COMP1 = 26,
    SYSCTL = 28,
    FLASH = 29,
    GPIOF = 30,
    UART2 = 33,
    SSI1 = 34,
    TIMER3A = 35,
    TIMER3B = 36,
    I2C1 = 37,
    QEI1 = 38,
    CAN0 = 39,
    CAN1 = 40,
    HIBERNATE = 43,
    USB0 = 44,
    PWM0_3 = 45,
    UDMA = 46,
    UDMAERR = 47,
    ADC1SS0 = 48,
    ADC1SS1 = 49,
    ADC1SS2 = 50,
    ADC1SS3 = 51,
    SSI2 = 57,
    SSI3 = 58,
    UART3 = 59,
    UART4 = 60,
    UART5 = 61,
    UART6 = 62,
    UART7 = 63,
    I2C2 = 68,
    I2C3 = 69,
    TIMER4A = 70,
    TIMER4B = 71,
    TIMER5A = 92,
    TIMER5B = 93,
    WTIMER0A = 94,
    WTIMER0B = 95,
    WTIMER1A = 96,
    WTIMER1B = 97,
    WTIMER2A = 98,
    WTIMER2B = 99,
    WTIMER3A = 100,
    WTIMER3B = 101,
    WTIMER4A = 102,
    WTIMER4B = 103,
    WTIMER5A = 104,
    WTIMER5B = 105,
    SYSEXC = 106,
    PWM1_0 = 134,
    PWM1_1 = 135,
    PWM1_2 = 136,
    PWM1_3 = 137,
    PWM1_FAULT = 138,
}

// NOTE(unsafe) every variant is a line the part actually has
unsafe impl InterruptNumber for Interrupt {
    #[inline(always)]
    fn number(self) -> u16 {
        self as u16
    }
}

/// Priority sub-field of interrupt `n` inside its `PRI` register
const fn priority_field(n: u16) -> Field {
    Field::rw((n % 4) as u8 * 8 + 5, 3)
}

const fn line_bit(n: u16) -> u8 {
    (n % 32) as u8
}

/// The interrupt controller
pub struct Nvic<B> {
    bus: B,
}

impl<B: Bus> Nvic<B> {
    pub fn new(bus: B) -> Self {
        Nvic { bus }
    }

    fn line<I: InterruptNumber>(irq: I) -> Result<u16, Error> {
        let n = irq.number();
        if n >= INTERRUPTS {
            return Err(Error::InvalidInterrupt(n));
        }
        Ok(n)
    }

    /// Sets the priority of `irq` and enables it
    ///
    /// Out-of-range interrupts and priorities are refused before any register
    /// is written.
    pub fn activate<I: InterruptNumber>(&mut self, irq: I, priority: u8) -> Result<(), Error> {
        let n = Self::line(irq)?;
        if priority >= PRIORITIES {
            return Err(Error::InvalidPriority(priority));
        }
        trace!("activate irq {=u16} at priority {=u8}", n, priority);

        PRI.nth(u32::from(n / 4), 4)
            .write(&self.bus, BASE, priority_field(n), u32::from(priority))?;
        EN.nth(u32::from(n / 32), 4)
            .write(&self.bus, BASE, Field::bit(line_bit(n)), 1)?;
        Ok(())
    }

    /// Disables `irq`
    pub fn deactivate<I: InterruptNumber>(&mut self, irq: I) -> Result<(), Error> {
        let n = Self::line(irq)?;
        // Writing a one to DISn clears the enable; zeros are ignored
        self.bus.store(DIS.nth(u32::from(n / 32), 4).address(BASE), 1 << line_bit(n));
        Ok(())
    }

    pub fn is_enabled<I: InterruptNumber>(&self, irq: I) -> Result<bool, Error> {
        let n = Self::line(irq)?;
        Ok(EN
            .nth(u32::from(n / 32), 4)
            .is_set(&self.bus, BASE, Field::bit(line_bit(n))))
    }

    /// Whether the handler of `irq` is running or preempted
    pub fn is_active<I: InterruptNumber>(&self, irq: I) -> Result<bool, Error> {
        let n = Self::line(irq)?;
        Ok(ACTIVE
            .nth(u32::from(n / 32), 4)
            .is_set(&self.bus, BASE, Field::ro(line_bit(n), 1)))
    }

    pub fn priority<I: InterruptNumber>(&self, irq: I) -> Result<u8, Error> {
        let n = Self::line(irq)?;
        let p = PRI
            .nth(u32::from(n / 4), 4)
            .read(&self.bus, BASE, priority_field(n));
        Ok(p as u8)
    }
}

/// Masks all interrupts (`cpsid i`)
#[inline(always)]
pub fn disable_all() {
    cortex_m::interrupt::disable();
}

/// Unmasks interrupts (`cpsie i`)
///
/// # Safety
///
/// Must not be called inside a critical section that relies on interrupts
/// staying masked.
#[inline(always)]
pub unsafe fn enable_all() {
    // NOTE(unsafe) forwarded to the caller
    unsafe { cortex_m::interrupt::enable() }
}

/// Sleeps until an interrupt or event arrives (`wfi`)
#[inline(always)]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    #[derive(Clone, Copy)]
    struct Line(u16);

    unsafe impl InterruptNumber for Line {
        fn number(self) -> u16 {
            self.0
        }
    }

    #[test]
    fn out_of_range_activation_writes_nothing() {
        let bus = SimBus::new();
        let mut nvic = Nvic::new(&bus);

        assert_eq!(nvic.activate(Line(139), 0), Err(Error::InvalidInterrupt(139)));
        assert_eq!(nvic.activate(Line(0), 8), Err(Error::InvalidPriority(8)));
        assert_eq!(bus.store_count(), 0);
    }

    #[test]
    fn activation_sets_priority_and_one_enable_bit() {
        let bus = SimBus::new();
        let mut nvic = Nvic::new(&bus);

        nvic.activate(Line(5), 3).unwrap();

        // interrupt 5 lives in PRI1, byte 1, bits 13..16
        assert_eq!(bus.peek(0xE000_E404), 3 << 13);
        assert_eq!(bus.peek(0xE000_E100), 1 << 5);
        assert_eq!(bus.store_count(), 2);
        assert_eq!(nvic.priority(Line(5)), Ok(3));
        assert_eq!(nvic.is_enabled(Line(5)), Ok(true));
    }

    #[test]
    fn high_lines_use_later_registers() {
        let bus = SimBus::new();
        let mut nvic = Nvic::new(&bus);

        nvic.activate(Interrupt::PWM1_FAULT, 7).unwrap();

        // 138 = 4 * 34 + 2, and 32 * 4 + 10
        assert_eq!(bus.peek(0xE000_E400 + 34 * 4), 7 << 21);
        assert_eq!(bus.peek(0xE000_E110), 1 << 10);
    }

    #[test]
    fn activation_keeps_neighbouring_priorities() {
        let bus = SimBus::new();
        bus.preset(0xE000_E404, 0xE0E0_E0E0);
        let mut nvic = Nvic::new(&bus);

        nvic.activate(Line(6), 2).unwrap();

        // interrupt 6 is byte 2 of PRI1
        assert_eq!(bus.peek(0xE000_E404), 0xE040_E0E0);
    }

    #[test]
    fn deactivate_writes_only_the_line() {
        let bus = SimBus::new();
        let mut nvic = Nvic::new(&bus);

        nvic.deactivate(Interrupt::GPIOF).unwrap();

        assert_eq!(bus.stores(), vec![(0xE000_E180, 1 << 30)]);
    }

    #[test]
    fn active_bits_are_read_only() {
        let bus = SimBus::new();
        bus.preset(0xE000_E300, 1 << 19);
        let nvic = Nvic::new(&bus);

        assert_eq!(nvic.is_active(Interrupt::TIMER0A), Ok(true));
        assert_eq!(nvic.is_active(Interrupt::TIMER0B), Ok(false));
    }
}
