//! Prelude - Include traits for hal

pub use crate::hal::prelude::*;
pub use crate::nvic::InterruptNumber as _InterruptNumberHal;
pub use crate::register::Bus as _BusHal;
pub use crate::time::U32Ext as _U32ExtHal;
