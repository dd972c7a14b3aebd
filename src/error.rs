//! Errors

use core::fmt;

use crate::register::FieldError;
use crate::spin::Timeout;

/// Driver error
///
/// Every variant is raised before the offending write reaches the hardware,
/// except [`Error::Timeout`], which leaves the peripheral in whatever state
/// the bring-up sequence had reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// A register field write was refused
    Field(FieldError),
    /// A bounded wait for the hardware gave up
    Timeout,
    /// Interrupt number past the last one of the part (138)
    InvalidInterrupt(u16),
    /// Priority outside 0..=7
    InvalidPriority(u8),
    /// Pin number outside 0..=7
    InvalidPin(u8),
    /// A sample sequence needs at least one step
    EmptySequence,
    /// More steps than the sequencer's FIFO holds
    TooManySteps { max: usize },
    /// The last step of a sample sequence does not carry the END flag
    MissingEndOfSequence,
    /// A step before the last one carries the END flag
    MisplacedEndOfSequence(usize),
    /// Digital comparator unit outside 0..=7
    InvalidComparator(u8),
    /// The sequencer has not been enabled
    NotArmed,
    /// The sequencer is not triggered by the processor
    NotSoftwareTriggered,
    /// The timer mode cannot run on the requested timer half
    UnsupportedMode,
    /// Interval, period or match value wider than the counter
    InvalidInterval,
    /// PWM duty cycle greater than the period
    InvalidDuty,
    /// The PWM generator already runs with another period or counting mode
    GeneratorInUse,
    /// An interrupt-driven sample sequence has no step that raises the interrupt
    MissingInterruptStep,
}

impl From<FieldError> for Error {
    fn from(e: FieldError) -> Self {
        Error::Field(e)
    }
}

impl From<Timeout> for Error {
    fn from(_: Timeout) -> Self {
        Error::Timeout
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Field(ref e) => write!(f, "register field: {}", e),
            Error::Timeout => fmt::Display::fmt(&Timeout, f),
            Error::InvalidInterrupt(n) => write!(f, "no interrupt {}", n),
            Error::InvalidPriority(p) => write!(f, "priority {} outside 0..=7", p),
            Error::InvalidPin(p) => write!(f, "pin {} outside 0..=7", p),
            Error::EmptySequence => f.write_str("sample sequence has no steps"),
            Error::TooManySteps { max } => {
                write!(f, "sample sequence longer than {} steps", max)
            }
            Error::MissingEndOfSequence => f.write_str("last step does not end the sequence"),
            Error::MisplacedEndOfSequence(i) => {
                write!(f, "step {} ends the sequence early", i)
            }
            Error::InvalidComparator(u) => write!(f, "no digital comparator {}", u),
            Error::NotArmed => f.write_str("sample sequencer not enabled"),
            Error::NotSoftwareTriggered => f.write_str("sample sequencer not processor triggered"),
            Error::UnsupportedMode => f.write_str("timer mode not available on this timer half"),
            Error::InvalidInterval => f.write_str("value does not fit the counter"),
            Error::InvalidDuty => f.write_str("duty cycle exceeds the period"),
            Error::GeneratorInUse => {
                f.write_str("PWM generator runs with another period or counting mode")
            }
            Error::MissingInterruptStep => f.write_str("no sequence step raises the interrupt"),
        }
    }
}
