//! In-memory NOR flash model driving the worker's frames in tests.
#![allow(dead_code)]

use embedded_hal::spi::{ErrorKind, Operation, SpiDevice};
use spi_flash_ring::{FlashType, Transfer};

/// Simulated NOR flash array behind a full-duplex SPI bus.
///
/// Decodes the MOSI bytes of each frame, mutates the array with NOR
/// semantics (program clears bits, erase sets a whole sector) and fills the
/// MISO bytes back into the frame. MISO during command frames is modelled as
/// bus float (`0xFF`). A configurable number of status reads after each
/// program/erase report write-in-progress.
pub struct SimFlash {
    flash: &'static FlashType,
    pub mem: Vec<u8>,
    write_enabled: bool,
    busy_reads: u32,
    stall: u32,
    /// MOSI copy of every frame clocked, for sequence assertions.
    pub frames: Vec<Vec<u8>>,
}

impl SimFlash {
    pub fn new(flash: &'static FlashType) -> Self {
        Self::with_stall(flash, 0)
    }

    /// Reports WIP for `stall` status reads after each program and erase.
    pub fn with_stall(flash: &'static FlashType, stall: u32) -> Self {
        Self {
            flash,
            mem: vec![0xFF; flash.total_size as usize],
            write_enabled: false,
            busy_reads: 0,
            stall,
            frames: Vec::new(),
        }
    }

    /// Clocks one full-duplex frame.
    pub fn exchange(&mut self, frame: &mut [u8]) {
        self.frames.push(frame.to_vec());
        let flash = self.flash;
        let op = frame[0];
        if op == flash.read_status {
            frame[1] = if self.busy_reads > 0 {
                self.busy_reads -= 1;
                flash.wip_mask
            } else {
                0
            };
        } else if op == flash.write_enable {
            self.write_enabled = true;
            fill_float(frame);
        } else if op == flash.read_data {
            let addr = addr24(frame);
            for (offset, byte) in frame[4..].iter_mut().enumerate() {
                *byte = self.mem[addr + offset];
            }
        } else if op == flash.write_page {
            assert!(self.write_enabled, "page program without write enable");
            let addr = addr24(frame);
            for (offset, byte) in frame[4..].iter().enumerate() {
                // NOR programming only clears bits
                self.mem[addr + offset] &= *byte;
            }
            self.write_enabled = false;
            self.busy_reads = self.stall;
            fill_float(frame);
        } else if op == flash.erase_sector {
            assert!(self.write_enabled, "sector erase without write enable");
            let addr = addr24(frame);
            assert_eq!(
                addr % flash.sector_size as usize,
                0,
                "erase not sector aligned"
            );
            self.mem[addr..addr + flash.sector_size as usize].fill(0xFF);
            self.write_enabled = false;
            self.busy_reads = self.stall;
            fill_float(frame);
        } else {
            panic!("unknown opcode 0x{op:02X}");
        }
    }

    /// Opcode of every frame clocked so far.
    pub fn opcodes(&self) -> Vec<u8> {
        self.frames.iter().map(|frame| frame[0]).collect()
    }

    /// Addresses of the sector erase frames clocked so far.
    pub fn erased_sectors(&self) -> Vec<usize> {
        self.frames
            .iter()
            .filter(|frame| frame[0] == self.flash.erase_sector)
            .map(|frame| addr24(frame))
            .collect()
    }
}

fn addr24(frame: &[u8]) -> usize {
    ((frame[1] as usize) << 16) | ((frame[2] as usize) << 8) | frame[3] as usize
}

fn fill_float(frame: &mut [u8]) {
    frame.fill(0xFF);
}

/// Runs a transfer to completion against the simulator.
pub fn drive(sim: &mut SimFlash, mut xfer: Transfer<'_, '_, '_>) {
    while !xfer.is_done() {
        xfer.tick();
        if xfer.spi_len() > 0 {
            sim.exchange(xfer.spi_frame());
        }
    }
}

/// [`SpiDevice`] adapter over [`SimFlash`] for the blocking executor.
pub struct SimSpi(pub SimFlash);

#[derive(Debug)]
pub enum SimSpiError {}

impl embedded_hal::spi::Error for SimSpiError {
    fn kind(&self) -> ErrorKind {
        match *self {}
    }
}

impl embedded_hal::spi::ErrorType for SimSpi {
    type Error = SimSpiError;
}

impl SpiDevice for SimSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        for operation in operations {
            match operation {
                Operation::TransferInPlace(frame) => self.0.exchange(frame),
                _ => panic!("driver only uses in-place transfers"),
            }
        }
        Ok(())
    }
}
