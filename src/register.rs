//! Bitfield register access
//!
//! A [`Field`] describes a contiguous span of bits inside a 32-bit register and
//! the permission the hardware gives software on it. [`read`] and [`write`]
//! are the only way the drivers in this crate touch a register; they never
//! change bits outside the addressed field and they refuse writes that make no
//! sense for the field (a value wider than the field, a write to a read-only
//! field, anything but `1` to a write-one-to-clear field) without touching the
//! register at all.
//!
//! The read-modify-write done by [`write`] is not atomic. If an interrupt
//! handler writes a different field of the same register between the load and
//! the store, its update is lost. Registers that foreground code and an
//! interrupt handler may both write are declared with [`Sharing::Interrupt`];
//! [`Register::write`] performs their read-modify-write inside a critical
//! section.

use core::fmt;
use core::ptr;

/// Value returned by [`read`] for write-only fields
pub const UNREADABLE: u32 = u32::MAX;

/// Access to the 32-bit words of the memory map
pub trait Bus {
    /// Loads the word at `address`
    fn load(&self, address: u32) -> u32;

    /// Stores `value` to the word at `address`
    fn store(&self, address: u32, value: u32);

    /// Clears the write-one-to-clear bits in `mask`
    ///
    /// On hardware this is a plain store of `mask`: zero bits of a W1C
    /// register ignore writes.
    fn clear_bits(&self, address: u32, mask: u32) {
        self.store(address, mask);
    }
}

impl<T: Bus + ?Sized> Bus for &T {
    #[inline(always)]
    fn load(&self, address: u32) -> u32 {
        (**self).load(address)
    }

    #[inline(always)]
    fn store(&self, address: u32, value: u32) {
        (**self).store(address, value)
    }

    #[inline(always)]
    fn clear_bits(&self, address: u32, mask: u32) {
        (**self).clear_bits(address, mask)
    }
}

/// The processor's memory-mapped register space
#[derive(Clone, Copy, Debug)]
pub struct Mmio {
    _0: (),
}

impl Mmio {
    /// Grants access to the memory-mapped registers
    ///
    /// # Safety
    ///
    /// Every address later handed to this bus must be a valid, aligned
    /// peripheral register of the running part. The drivers in this crate only
    /// use addresses from the TM4C123GH6PM memory map.
    pub const unsafe fn new() -> Self {
        Mmio { _0: () }
    }
}

impl Bus for Mmio {
    #[inline(always)]
    fn load(&self, address: u32) -> u32 {
        // NOTE(unsafe) `Mmio::new` requires every address to be a live register
        unsafe { ptr::read_volatile(address as usize as *const u32) }
    }

    #[inline(always)]
    fn store(&self, address: u32, value: u32) {
        // NOTE(unsafe) `Mmio::new` requires every address to be a live register
        unsafe { ptr::write_volatile(address as usize as *mut u32, value) }
    }
}

/// Software access permitted on a field
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Access {
    ReadWrite,
    ReadOnly,
    WriteOnly,
    /// Read, and clear by writing `1`
    ReadWriteOneToClear,
}

/// A span of bits inside a 32-bit register
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Field {
    bit: u8,
    width: u8,
    access: Access,
}

impl Field {
    /// Describes `width` bits starting at `bit`
    ///
    /// Panics (at compile time when used in a `const`) unless
    /// `1 <= width` and `bit + width <= 32`.
    pub const fn new(bit: u8, width: u8, access: Access) -> Self {
        assert!(width >= 1 && bit as u32 + width as u32 <= 32);
        Field { bit, width, access }
    }

    pub const fn rw(bit: u8, width: u8) -> Self {
        Self::new(bit, width, Access::ReadWrite)
    }

    pub const fn ro(bit: u8, width: u8) -> Self {
        Self::new(bit, width, Access::ReadOnly)
    }

    pub const fn wo(bit: u8, width: u8) -> Self {
        Self::new(bit, width, Access::WriteOnly)
    }

    pub const fn w1c(bit: u8, width: u8) -> Self {
        Self::new(bit, width, Access::ReadWriteOneToClear)
    }

    /// Single read-write bit
    pub const fn bit(bit: u8) -> Self {
        Self::rw(bit, 1)
    }

    pub const fn start(&self) -> u8 {
        self.bit
    }

    pub const fn width(&self) -> u8 {
        self.width
    }

    pub const fn access(&self) -> Access {
        self.access
    }

    /// Largest value the field holds
    pub const fn max(&self) -> u32 {
        if self.width == 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// The field's bits in register position
    pub const fn mask(&self) -> u32 {
        self.max() << self.bit
    }
}

/// Why a field write was refused
///
/// A refused write never changes any bit of the register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FieldError {
    /// The field is read-only
    ReadOnly,
    /// The value does not fit in the field
    OutOfRange { value: u32, max: u32 },
    /// Write-one-to-clear fields only accept `1`
    NotOneToClear(u32),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FieldError::ReadOnly => f.write_str("write to a read-only field"),
            FieldError::OutOfRange { value, max } => {
                write!(f, "value {:#x} exceeds field maximum {:#x}", value, max)
            }
            FieldError::NotOneToClear(value) => {
                write!(f, "write-one-to-clear field written with {:#x}", value)
            }
        }
    }
}

/// Reads `field` of the register at `address`
///
/// Write-only fields return [`UNREADABLE`], which is not register data.
pub fn read<B: Bus>(bus: &B, address: u32, field: Field) -> u32 {
    match field.access {
        Access::WriteOnly => UNREADABLE,
        _ => (bus.load(address) & field.mask()) >> field.bit,
    }
}

/// Writes `value` into `field` of the register at `address`
pub fn write<B: Bus>(bus: &B, address: u32, field: Field, value: u32) -> Result<(), FieldError> {
    match check(field, value)? {
        Store::Clear => bus.clear_bits(address, field.mask()),
        Store::Modify => modify(bus, address, field, value),
    }
    Ok(())
}

/// Like [`write`], with the read-modify-write done inside a critical section
pub fn write_shared<B: Bus>(
    bus: &B,
    address: u32,
    field: Field,
    value: u32,
) -> Result<(), FieldError> {
    match check(field, value)? {
        Store::Clear => bus.clear_bits(address, field.mask()),
        Store::Modify => critical_section::with(|_| modify(bus, address, field, value)),
    }
    Ok(())
}

enum Store {
    Clear,
    Modify,
}

fn check(field: Field, value: u32) -> Result<Store, FieldError> {
    let store = match field.access {
        Access::ReadOnly => Err(FieldError::ReadOnly),
        Access::ReadWriteOneToClear if value == 1 => Ok(Store::Clear),
        Access::ReadWriteOneToClear => Err(FieldError::NotOneToClear(value)),
        Access::ReadWrite | Access::WriteOnly if value > field.max() => {
            Err(FieldError::OutOfRange {
                value,
                max: field.max(),
            })
        }
        Access::ReadWrite | Access::WriteOnly => Ok(Store::Modify),
    };
    if let Err(e) = &store {
        warn!("refused field write: {}", e);
    }
    store
}

#[inline(always)]
fn modify<B: Bus>(bus: &B, address: u32, field: Field, value: u32) {
    let bits = bus.load(address);
    bus.store(address, (bits & !field.mask()) | (value << field.bit));
}

/// Who may write a register
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Sharing {
    /// Only the driver that owns the peripheral instance
    Exclusive,
    /// Foreground code and interrupt handlers
    Interrupt,
}

/// A register at a fixed offset from its peripheral's base address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Register {
    offset: u32,
    sharing: Sharing,
}

impl Register {
    pub const fn new(offset: u32) -> Self {
        Register {
            offset,
            sharing: Sharing::Exclusive,
        }
    }

    /// Marks the register as written from interrupt context as well
    pub const fn isr_shared(self) -> Self {
        Register {
            offset: self.offset,
            sharing: Sharing::Interrupt,
        }
    }

    /// The `n`th register of an array starting here, `stride` bytes apart
    pub const fn nth(self, n: u32, stride: u32) -> Self {
        Register {
            offset: self.offset + n * stride,
            sharing: self.sharing,
        }
    }

    pub const fn offset(&self) -> u32 {
        self.offset
    }

    pub const fn sharing(&self) -> Sharing {
        self.sharing
    }

    pub const fn is_isr_shared(&self) -> bool {
        matches!(self.sharing, Sharing::Interrupt)
    }

    pub const fn address(&self, base: u32) -> u32 {
        base + self.offset
    }

    pub fn read<B: Bus>(&self, bus: &B, base: u32, field: Field) -> u32 {
        read(bus, self.address(base), field)
    }

    /// Writes `field`, in a critical section if the register is shared with
    /// interrupt handlers
    pub fn write<B: Bus>(
        &self,
        bus: &B,
        base: u32,
        field: Field,
        value: u32,
    ) -> Result<(), FieldError> {
        match self.sharing {
            Sharing::Exclusive => write(bus, self.address(base), field, value),
            Sharing::Interrupt => write_shared(bus, self.address(base), field, value),
        }
    }

    /// Reads a single-bit field as a flag
    pub fn is_set<B: Bus>(&self, bus: &B, base: u32, field: Field) -> bool {
        self.read(bus, base, field) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    const ADDR: u32 = 0x4000_0000;
    const PATTERN: u32 = 0xA5C3_3C5A;

    #[test]
    fn write_leaves_bits_outside_the_field_alone() {
        for bit in 0..32u8 {
            for width in 1..=(32 - bit) {
                let field = Field::rw(bit, width);
                for value in [0, 1, field.max() / 3, field.max()] {
                    let bus = SimBus::new();
                    bus.preset(ADDR, PATTERN);

                    write(&bus, ADDR, field, value).unwrap();

                    let after = bus.peek(ADDR);
                    assert_eq!(after & !field.mask(), PATTERN & !field.mask());
                    assert_eq!(read(&bus, ADDR, field), value);
                }
            }
        }
    }

    #[test]
    fn out_of_range_write_is_refused_untouched() {
        let bus = SimBus::new();
        bus.preset(ADDR, PATTERN);
        let field = Field::rw(4, 3);

        assert_eq!(
            write(&bus, ADDR, field, 8),
            Err(FieldError::OutOfRange { value: 8, max: 7 })
        );
        assert_eq!(bus.peek(ADDR), PATTERN);
        assert_eq!(bus.store_count(), 0);

        let wo = Field::wo(30, 2);
        assert!(write(&bus, ADDR, wo, 4).is_err());
        assert_eq!(bus.peek(ADDR), PATTERN);
    }

    #[test]
    fn one_to_clear_only_accepts_one() {
        let bus = SimBus::new();
        let field = Field::w1c(8, 4);
        bus.preset(ADDR, 0x0000_0F0F | field.mask());

        for value in [0, 2, 3, 0xF, u32::MAX] {
            assert_eq!(
                write(&bus, ADDR, field, value),
                Err(FieldError::NotOneToClear(value))
            );
            assert_eq!(bus.peek(ADDR), 0x0000_0F0F | field.mask());
        }
        assert_eq!(bus.store_count(), 0);

        write(&bus, ADDR, field, 1).unwrap();
        assert_eq!(bus.peek(ADDR), 0x0000_000F);
        // Hardware sees ones over the field and zeros elsewhere
        assert_eq!(bus.stores(), vec![(ADDR, field.mask())]);
    }

    #[test]
    fn read_only_write_has_no_effect() {
        let bus = SimBus::new();
        bus.preset(ADDR, PATTERN);
        let field = Field::ro(0, 12);

        assert_eq!(write(&bus, ADDR, field, 1), Err(FieldError::ReadOnly));
        assert_eq!(bus.peek(ADDR), PATTERN);
        assert_eq!(bus.store_count(), 0);
        assert_eq!(read(&bus, ADDR, field), PATTERN & 0xFFF);
    }

    #[test]
    fn write_only_reads_as_sentinel() {
        let bus = SimBus::new();
        bus.preset(ADDR, 0);
        let field = Field::wo(0, 4);

        write(&bus, ADDR, field, 9).unwrap();
        assert_eq!(read(&bus, ADDR, field), UNREADABLE);
        assert_eq!(bus.peek(ADDR), 9);
    }

    #[test]
    fn round_trip_from_zero() {
        for (bit, width) in [(0, 1), (5, 3), (4, 6), (16, 12), (28, 4)] {
            let field = Field::rw(bit, width);
            for value in 0..=field.max() {
                let bus = SimBus::new();
                write(&bus, ADDR, field, value).unwrap();
                assert_eq!(read(&bus, ADDR, field), value);
            }
        }
    }

    #[test]
    fn full_width_field() {
        let bus = SimBus::new();
        let field = Field::rw(0, 32);
        assert_eq!(field.max(), u32::MAX);
        write(&bus, ADDR, field, 0xDEAD_BEEF).unwrap();
        assert_eq!(read(&bus, ADDR, field), 0xDEAD_BEEF);
    }

    #[test]
    fn shared_register_write_matches_plain_write() {
        const CTL: Register = Register::new(0x0C).isr_shared();
        let bus = SimBus::new();
        bus.preset(CTL.address(ADDR), PATTERN);

        assert!(CTL.is_isr_shared());
        CTL.write(&bus, ADDR, Field::rw(8, 8), 0x42).unwrap();
        assert_eq!(
            bus.peek(CTL.address(ADDR)),
            (PATTERN & !0xFF00) | 0x4200
        );
    }

    #[test]
    fn register_arrays() {
        const PRI: Register = Register::new(0x400);
        assert_eq!(PRI.nth(3, 4).address(0xE000_E000), 0xE000_E40C);
        assert!(!PRI.is_isr_shared());
    }
}
