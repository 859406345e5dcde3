use embedded_hal::spi::SpiDevice as BlockingSpiDevice;
use embedded_hal_async::spi::SpiDevice as AsyncSpiDevice;

use crate::flash::{FlashType, FLASH_TYPES};
use crate::header::RecordHeader;
use crate::queue::Queue;
use crate::worker::State;
use crate::{Error, Fault, RunError, FRAME_OVERHEAD};

/// Driver handle for the circular buffers of one NOR SPI flash device.
///
/// The handle borrows a caller-owned queue registry and SPI scratch buffer
/// and never allocates or touches a bus itself. Media work is armed through
/// [`rebuild`](Self::rebuild), [`push`](Self::push) and [`read`](Self::read),
/// each returning a [`Transfer`] that produces one SPI transaction per tick
/// for the host to clock out.
pub struct FlashRing<'a> {
    pub(crate) flash: &'static FlashType,
    pub(crate) queues: &'a mut [Queue],
    pub(crate) spi: &'a mut [u8],
    pub(crate) spi_len: usize,
    pub(crate) state: State,
    pub(crate) fault: Option<Fault>,
    pub(crate) iter_queue: usize,
    pub(crate) iter_elem: usize,
    pub(crate) addr: u32,
    pub(crate) data_len: usize,
}

impl<'a> FlashRing<'a> {
    /// Binds the driver to an entry of [`FLASH_TYPES`], a queue registry and
    /// an SPI scratch buffer.
    ///
    /// The scratch must hold at least one page plus [`FRAME_OVERHEAD`] bytes;
    /// all registry slots are cleared.
    pub fn new(
        flash_type: usize,
        queues: &'a mut [Queue],
        spi: &'a mut [u8],
    ) -> Result<Self, Error> {
        let flash = FLASH_TYPES.get(flash_type).ok_or(Error::BadFlashType)?;
        if spi.len() < flash.page_size as usize + FRAME_OVERHEAD {
            return Err(Error::SpiBufSize);
        }
        let mut ring = Self {
            flash,
            queues,
            spi,
            spi_len: 0,
            state: State::Idle,
            fault: None,
            iter_queue: 0,
            iter_elem: 0,
            addr: 0,
            data_len: 0,
        };
        ring.reset();
        Ok(ring)
    }

    /// Clears every queue slot and aborts any abandoned command.
    ///
    /// Queues must be created again afterwards. An erase or program already
    /// issued to the flash keeps running on the device; the next command's
    /// status polling waits it out.
    pub fn reset(&mut self) {
        for queue in self.queues.iter_mut() {
            *queue = Queue::empty();
        }
        self.state = State::Idle;
        self.spi_len = 0;
        self.fault = None;
    }

    /// The descriptor this handle was bound to.
    pub fn flash(&self) -> &'static FlashType {
        self.flash
    }

    /// Total size of the flash device in bytes.
    pub fn flash_size(&self) -> u32 {
        self.flash.total_size
    }

    /// Queue descriptor by id, if created.
    pub fn queue(&self, id: usize) -> Option<&Queue> {
        self.queues.get(id).filter(|queue| queue.used)
    }

    /// True while a command is in flight.
    pub fn is_busy(&self) -> bool {
        self.state != State::Idle
    }

    /// Length of the pending SPI transfer; 0 means "tick the worker again".
    pub fn spi_len(&self) -> usize {
        self.spi_len
    }

    /// Fault raised by the worker during the last command, if any.
    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    /// Reserves the next registry slot for a queue of `num_elems` records of
    /// up to `elem_size` payload bytes each and returns its id.
    ///
    /// Sector ranges are handed out contiguously, the first queue starting at
    /// sector 0, and span at least two sectors so a full queue can always
    /// free one by erasing. Does not touch the flash; run
    /// [`rebuild`](Self::rebuild) before appending.
    pub fn create_queue(
        &mut self,
        magic: u32,
        elem_size: usize,
        num_elems: usize,
    ) -> Result<usize, Error> {
        let flash = self.flash;
        let mut start_sector = 0;
        let mut slot = None;
        for (id, queue) in self.queues.iter().enumerate() {
            if queue.used {
                start_sector = queue.stop_sector + 1;
            } else {
                slot = Some(id);
                break;
            }
        }
        let id = slot.ok_or(Error::NoSlot)?;

        let pages_per_elem =
            (elem_size as u32 + RecordHeader::SIZE as u32).div_ceil(flash.page_size);
        let num_sectors = (num_elems as u32 * pages_per_elem)
            .div_ceil(flash.pages_per_sector)
            .max(2);
        let stop_sector = start_sector + num_sectors - 1;
        if (stop_sector + 1) * flash.sector_size > flash.total_size {
            return Err(Error::OutOfBounds);
        }

        self.queues[id] = Queue {
            used: true,
            initialized: false,
            magic,
            start_sector,
            stop_sector,
            pages_per_elem,
            capacity: num_sectors * flash.pages_per_sector / pages_per_elem,
            count: 0,
            id_min: u32::MAX,
            id_max: 0,
            addr_id_min: 0,
            addr_next_write: 0,
        };
        Ok(id)
    }

    /// Arms a media scan rebuilding the in-RAM index of every queue that
    /// needs one: record count, id range, oldest record and write cursor.
    ///
    /// Queues that are already initialized are left untouched; if none needs
    /// a scan the returned transfer is already complete. A full queue is
    /// wrapped here by erasing the sector holding its oldest record.
    pub fn rebuild(&mut self) -> Result<Transfer<'_, 'a, 'static>, Error> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        if self.queues.first().map_or(true, |queue| !queue.used) {
            return Err(Error::NoQueue);
        }
        self.fault = None;
        self.spi_len = 0;
        if let Some(id) = self.next_scan_queue(0) {
            self.iter_queue = id;
            self.iter_elem = 0;
            self.queues[id].begin_scan();
            self.state = State::ScanPoll;
        }
        Ok(Transfer {
            ring: self,
            data: Data::None,
        })
    }

    /// Arms an append of `data` as one record to queue `id`.
    ///
    /// The record is tagged with `id_max + 1` and programmed page by page at
    /// the write cursor. The queue becomes dirty: a
    /// [`rebuild`](Self::rebuild) has to complete before the next append.
    pub fn push<'d>(&mut self, id: usize, data: &'d [u8]) -> Result<Transfer<'_, 'a, 'd>, Error> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        let flash = self.flash;
        let queue = self.queues.get_mut(id).ok_or(Error::NoQueue)?;
        if !queue.used || !queue.initialized {
            return Err(Error::NotReady);
        }
        if data.len() > (queue.pages_per_elem * flash.page_size) as usize - RecordHeader::SIZE {
            return Err(Error::TooLarge);
        }
        queue.initialized = false;
        let cursor = queue.addr_next_write;

        self.iter_queue = id;
        self.iter_elem = 0;
        self.addr = cursor;
        self.data_len = data.len();
        self.fault = None;
        self.spi_len = 0;
        self.state = State::PushPoll;
        Ok(Transfer {
            ring: self,
            data: Data::Tx(data),
        })
    }

    /// Retrieves a stored record from queue `id` into `dest`.
    ///
    /// Only the request contract is implemented: the call validates the
    /// handle and queue state, and the returned transfer completes without
    /// touching the media.
    // TODO: retrieval stage machine: walk the slots from `id_min` upward and
    // copy the record whose id matches into `dest`.
    pub fn get<'d>(
        &mut self,
        id: usize,
        dest: &'d mut [u8],
    ) -> Result<Transfer<'_, 'a, 'd>, Error> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        let queue = self.queues.get(id).ok_or(Error::NoQueue)?;
        if !queue.used || !queue.initialized {
            return Err(Error::NotReady);
        }
        self.fault = None;
        Ok(Transfer {
            ring: self,
            data: Data::Rx(dest),
        })
    }

    /// Arms a transparent read of `dest.len()` bytes starting at byte
    /// address `addr`.
    pub fn read<'d>(&mut self, addr: u32, dest: &'d mut [u8]) -> Result<Transfer<'_, 'a, 'd>, Error> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        if addr + dest.len() as u32 > self.flash.total_size {
            return Err(Error::OutOfBounds);
        }
        self.addr = addr;
        self.data_len = dest.len();
        self.fault = None;
        self.spi_len = 0;
        self.state = State::ReadPoll;
        Ok(Transfer {
            ring: self,
            data: Data::Rx(dest),
        })
    }

    /// Next queue at or after `from` still lacking a scan; `None` past the
    /// last created queue.
    pub(crate) fn next_scan_queue(&self, from: usize) -> Option<usize> {
        for (id, queue) in self.queues.iter().enumerate().skip(from) {
            if !queue.used {
                return None;
            }
            if !queue.initialized {
                return Some(id);
            }
        }
        None
    }
}

/// Payload moved by a command, borrowed from the caller per transfer.
pub(crate) enum Data<'d> {
    None,
    Tx(&'d [u8]),
    Rx(&'d mut [u8]),
}

impl Data<'_> {
    fn reborrow(&mut self) -> Data<'_> {
        match self {
            Data::None => Data::None,
            Data::Tx(data) => Data::Tx(*data),
            Data::Rx(data) => Data::Rx(&mut **data),
        }
    }
}

/// One in-flight command: rebuild, append or raw read.
///
/// Borrows the handle and, where the command moves payload, the caller's
/// buffer. Drive it from a custom host loop with [`tick`](Self::tick) and
/// [`spi_frame`](Self::spi_frame), or hand it a bus with [`run`](Self::run)
/// or [`blocking_run`](Self::blocking_run). Dropping it mid-flight leaves the
/// handle busy until [`FlashRing::reset`].
pub struct Transfer<'r, 'q, 'd> {
    pub(crate) ring: &'r mut FlashRing<'q>,
    pub(crate) data: Data<'d>,
}

impl Transfer<'_, '_, '_> {
    /// Runs one worker tick: consumes the SPI result pending in the scratch,
    /// then prepares at most one new transfer or finishes the command.
    pub fn tick(&mut self) {
        self.ring.step(self.data.reborrow());
    }

    /// True once the command has finished and the handle is idle again.
    pub fn is_done(&self) -> bool {
        !self.ring.is_busy()
    }

    /// Length of the pending SPI transfer; 0 means "tick again".
    pub fn spi_len(&self) -> usize {
        self.ring.spi_len
    }

    /// The scratch range to clock full-duplex over the bus. MISO bytes are
    /// expected back in the same range before the next [`tick`](Self::tick).
    pub fn spi_frame(&mut self) -> &mut [u8] {
        let len = self.ring.spi_len;
        &mut self.ring.spi[..len]
    }

    /// Drives the command to completion over an async SPI device.
    pub async fn run<SPI>(mut self, spi: &mut SPI) -> Result<(), RunError<SPI::Error>>
    where
        SPI: AsyncSpiDevice,
    {
        while !self.is_done() {
            self.tick();
            if self.ring.spi_len > 0 {
                spi.transfer_in_place(self.spi_frame())
                    .await
                    .map_err(RunError::Spi)?;
            }
        }
        match self.ring.fault {
            Some(fault) => Err(RunError::Fault(fault)),
            None => Ok(()),
        }
    }

    /// Drives the command to completion over a blocking SPI device.
    pub fn blocking_run<SPI>(mut self, spi: &mut SPI) -> Result<(), RunError<SPI::Error>>
    where
        SPI: BlockingSpiDevice,
    {
        while !self.is_done() {
            self.tick();
            if self.ring.spi_len > 0 {
                spi.transfer_in_place(self.spi_frame()).map_err(RunError::Spi)?;
            }
        }
        match self.ring.fault {
            Some(fault) => Err(RunError::Fault(fault)),
            None => Ok(()),
        }
    }
}
