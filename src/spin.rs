//! Waiting for the hardware
//!
//! Clock gates and the PLL signal readiness through a status bit that software
//! polls. A domain that never becomes ready is a hardware fault with no
//! software recovery, so on the target the default is to poll forever. Tests
//! (and applications that want to report the fault instead of hanging) use a
//! bounded poll.

use core::fmt;

/// How long to poll a readiness condition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Spin {
    /// Poll until the condition holds, however long that takes
    #[default]
    Forever,
    /// Give up after this many unsuccessful polls (at least one poll is made)
    Bounded(u32),
}

/// A bounded poll gave up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeout;

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("hardware did not become ready")
    }
}

impl Spin {
    /// Polls `ready` until it returns `true`
    pub fn until<F>(self, mut ready: F) -> Result<(), Timeout>
    where
        F: FnMut() -> bool,
    {
        match self {
            Spin::Forever => {
                while !ready() {
                    core::hint::spin_loop();
                }
                Ok(())
            }
            Spin::Bounded(polls) => {
                for _ in 0..polls.max(1) {
                    if ready() {
                        return Ok(());
                    }
                    core::hint::spin_loop();
                }
                Err(Timeout)
            }
        }
    }
}
