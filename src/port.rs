//! Register transport seam.
//!
//! The sensor exposes byte registers at 16-bit addresses (SCCB/I2C on real
//! hardware). [`RegisterPort`] is the only thing this crate needs from the
//! transport; [`SensorBus`] pairs a port with the [`Delay`] used for every
//! settle and poll so components can share both through one `&mut`.

use tracing::trace;

use crate::error::Result;
use crate::timing::Delay;

/// Byte and word register access at 16-bit addresses.
///
/// Each access is an independent transaction. Transport failures are
/// reported as [`crate::FocusError::Register`] and never retried here.
pub trait RegisterPort {
    /// Read one register.
    fn read_byte(&mut self, address: u16) -> Result<u8>;

    /// Write one register.
    fn write_byte(&mut self, address: u16, value: u8) -> Result<()>;

    /// Read a big-endian word spanning `address` and `address + 1`.
    fn read_word(&mut self, address: u16) -> Result<u16> {
        let high = self.read_byte(address)?;
        let low = self.read_byte(address.wrapping_add(1))?;
        Ok(u16::from_be_bytes([high, low]))
    }

    /// Write a big-endian word spanning `address` and `address + 1`.
    fn write_word(&mut self, address: u16, value: u16) -> Result<()> {
        let [high, low] = value.to_be_bytes();
        self.write_byte(address, high)?;
        self.write_byte(address.wrapping_add(1), low)
    }
}

impl<P: RegisterPort + ?Sized> RegisterPort for &mut P {
    fn read_byte(&mut self, address: u16) -> Result<u8> {
        (**self).read_byte(address)
    }

    fn write_byte(&mut self, address: u16, value: u8) -> Result<()> {
        (**self).write_byte(address, value)
    }
}

impl<P: RegisterPort + ?Sized> RegisterPort for Box<P> {
    fn read_byte(&mut self, address: u16) -> Result<u8> {
        (**self).read_byte(address)
    }

    fn write_byte(&mut self, address: u16, value: u8) -> Result<()> {
        (**self).write_byte(address, value)
    }
}

/// A register port together with its delay source.
///
/// Owned exclusively by one driver instance; no locking is performed.
pub struct SensorBus<P, D> {
    port: P,
    delay: D,
}

impl<P: RegisterPort, D: Delay> SensorBus<P, D> {
    /// Pair a port with a delay source.
    pub fn new(port: P, delay: D) -> Self {
        Self { port, delay }
    }

    /// Read one register.
    pub fn read(&mut self, address: u16) -> Result<u8> {
        let value = self.port.read_byte(address)?;
        trace!(address = format_args!("{address:#06x}"), value = format_args!("{value:#04x}"), "reg read");
        Ok(value)
    }

    /// Write one register.
    pub fn write(&mut self, address: u16, value: u8) -> Result<()> {
        trace!(address = format_args!("{address:#06x}"), value = format_args!("{value:#04x}"), "reg write");
        self.port.write_byte(address, value)
    }

    /// Read a big-endian word as two traced byte reads.
    pub fn read_word(&mut self, address: u16) -> Result<u16> {
        let high = self.read(address)?;
        let low = self.read(address.wrapping_add(1))?;
        Ok(u16::from_be_bytes([high, low]))
    }

    /// Block for `ms` milliseconds.
    pub fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    /// Borrow the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutably borrow the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Borrow the delay source.
    pub fn delay(&self) -> &D {
        &self.delay
    }

    /// Split back into port and delay.
    pub fn into_parts(self) -> (P, D) {
        (self.port, self.delay)
    }
}

impl<P, D> std::fmt::Debug for SensorBus<P, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorBus").finish_non_exhaustive()
    }
}
