#![no_std]

use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

mod flash;
mod header;
mod queue;
mod ring;
mod worker;

pub use flash::{FlashType, FLASH_TYPES, MX25L3233F, W25Q128JV, W25Q32JV};
pub use header::RecordHeader;
pub use queue::Queue;
pub use ring::{FlashRing, Transfer};

/// Frame overhead of an addressed flash instruction: opcode plus 24-bit
/// big-endian address. The SPI scratch buffer must hold at least one page
/// plus this overhead.
pub const FRAME_OVERHEAD: usize = 4;

/// Errors reported synchronously by the request API.
///
/// A rejected request leaves the worker untouched; faults discovered while a
/// command is in flight are reported through [`Fault`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// A command is still in flight; drive its transfer to completion first.
    Busy,
    /// The flash type index lies outside the descriptor table.
    BadFlashType,
    /// Every queue registry slot is taken.
    NoSlot,
    /// No queue exists yet, or the queue id does not name a created queue.
    NoQueue,
    /// The queue has not been rebuilt since its last append.
    NotReady,
    /// The payload does not fit into one queue element.
    TooLarge,
    /// The requested range lies outside the flash device.
    OutOfBounds,
    /// The SPI scratch buffer is too small for the request.
    SpiBufSize,
}

impl NorFlashError for Error {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            _ => NorFlashErrorKind::Other,
        }
    }
}

/// Faults discovered by the worker while a command is in flight.
///
/// The worker goes idle after raising one; the host observes it through
/// [`FlashRing::fault`] once `is_busy` reads false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Fault {
    /// The scratch buffer cannot hold the requested transfer.
    SpiBufSize,
}

/// Errors returned by the executors driving a [`Transfer`] over a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunError<E> {
    /// The SPI transport failed.
    Spi(E),
    /// The worker raised a fault; the command did not complete.
    Fault(Fault),
}

fn command_and_address(command: u8, address: u32) -> [u8; FRAME_OVERHEAD] {
    let addr_bytes = address.to_be_bytes();
    [command, addr_bytes[1], addr_bytes[2], addr_bytes[3]]
}
