//! Blinks the green LED of the LaunchPad and mirrors the two user switches
//! on the red and blue LEDs

#![no_std]
#![no_main]

use core::panic::PanicInfo;

use cortex_m_rt::entry;
use tm4c123_hal::delay::Delay;
use tm4c123_hal::gpio::{Config, GpioLine, Port, Pull};
use tm4c123_hal::prelude::*;
use tm4c123_hal::register::Mmio;
use tm4c123_hal::sysctl::{ClockConfig, Sysctl};

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();

    // NOTE(unsafe) the drivers only use TM4C123GH6PM register addresses
    let bus = unsafe { Mmio::new() };
    let mut sysctl = Sysctl::new(bus);

    let clocks = ClockConfig::default().freeze(&mut sysctl).unwrap();
    let mut delay = Delay::new(cp.SYST, clocks);

    let output = Config::output();
    let mut red = GpioLine::new(&mut sysctl, Port::F, 1, &output).unwrap();
    let mut blue = GpioLine::new(&mut sysctl, Port::F, 2, &output).unwrap();
    let mut green = GpioLine::new(&mut sysctl, Port::F, 3, &output).unwrap();

    // Switches pull the pin low when pressed; SW2 sits on the locked PF0
    let switch = Config::input().pull(Pull::Up);
    let sw1 = GpioLine::new(&mut sysctl, Port::F, 4, &switch).unwrap();
    let sw2 = GpioLine::new(&mut sysctl, Port::F, 0, &switch).unwrap();

    loop {
        red.write(!sw1.read());
        blue.write(!sw2.read());

        green.toggle();
        delay.delay_ms(250u32);
    }
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    loop {
        cortex_m::asm::bkpt();
    }
}
