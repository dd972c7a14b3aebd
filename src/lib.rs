//! TM4C123 register-level hardware abstraction layer
//!
//! Every register access in this crate goes through one primitive: a bitfield
//! read or read-modify-write on a 32-bit word behind a [`register::Bus`]. The
//! peripheral drivers ([`gpio`], [`timer`], [`pwm`], [`adc`]) are sequences of
//! such field writes, bracketed by the clock-gate handshake in [`sysctl`] and,
//! when interrupts are wanted, wired to the [`nvic`].
//!
//! On the target the bus is [`register::Mmio`]. Unit tests run the same drivers
//! against a simulated register space.
//!
//! # Features
//!
//! * **defmt** - log bring-up steps and implement `defmt::Format` for the public
//!   enums and error types.
//! * **rt** - pull in `cortex-m-rt`, needed by the demo in `demos/`.
//! * **critical-section-single-core** - forward to the `cortex-m` implementation
//!   of `critical-section`.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

#[macro_use]
mod fmt;

pub mod adc;
pub mod delay;
pub mod error;
pub mod gpio;
pub mod nvic;
pub mod prelude;
pub mod pwm;
pub mod register;
pub mod spin;
pub mod sysctl;
pub mod time;
pub mod timer;

#[cfg(test)]
pub(crate) mod sim;

pub use crate::error::Error;
pub use crate::nvic::Interrupt;

pub use cortex_m;
pub use embedded_hal as hal;
