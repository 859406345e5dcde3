//! The non-blocking worker state machine.
//!
//! Each tick inspects the SPI result the host clocked into the scratch (when
//! `spi_len != 0` on entry), then assembles at most one new MOSI frame or
//! finishes the command. Write and erase opcodes are always followed by
//! status polling until the write-in-progress bit clears.

use crate::header::RecordHeader;
use crate::ring::{Data, FlashRing};
use crate::{command_and_address, Fault, FRAME_OVERHEAD};

/// Worker progress, one variant per command stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Idle,
    /// Rebuild: wait for WIP to clear.
    ScanPoll,
    /// Rebuild: classify one element header and request the next.
    ScanHeader,
    /// Rebuild: queue wrapped, erase the sector holding the oldest record.
    ScanErase,
    /// Rebuild: restart the scan over the freshly erased sector.
    ScanRestart,
    /// Append: wait for WIP to clear between pages.
    PushPoll,
    /// Append: write-enable the next page program, or finish.
    PushEnable,
    /// Append: stream one page program frame.
    PushProgram,
    /// Raw read: wait for WIP to clear.
    ReadPoll,
    /// Raw read: issue the read frame.
    ReadIssue,
    /// Raw read: hand the MISO bytes back to the caller.
    ReadCopy,
}

impl FlashRing<'_> {
    /// One worker tick.
    pub(crate) fn step(&mut self, data: Data<'_>) {
        match self.state {
            State::Idle => {}
            State::ScanPoll => {
                if self.wip_pending() {
                    return;
                }
                self.state = State::ScanHeader;
                self.scan_header();
            }
            State::ScanHeader => self.scan_header(),
            State::ScanErase => self.scan_erase(),
            State::ScanRestart => self.scan_restart(),
            State::PushPoll => {
                if self.wip_pending() {
                    return;
                }
                self.state = State::PushEnable;
                self.push_enable();
            }
            State::PushEnable => self.push_enable(),
            State::PushProgram => self.push_program(data),
            State::ReadPoll => {
                if self.wip_pending() {
                    return;
                }
                self.state = State::ReadIssue;
                self.read_issue();
            }
            State::ReadIssue => self.read_issue(),
            State::ReadCopy => self.read_copy(data),
        }
    }

    /// Issues or re-issues a status read while the flash reports WIP.
    /// Returns false once the device is ready, with the scratch released.
    fn wip_pending(&mut self) -> bool {
        if self.spi_len == 0 || self.spi[1] & self.flash.wip_mask != 0 {
            self.spi[0] = self.flash.read_status;
            self.spi[1] = 0;
            self.spi_len = 2;
            true
        } else {
            self.spi_len = 0;
            false
        }
    }

    fn finish(&mut self) {
        self.spi_len = 0;
        self.state = State::Idle;
    }

    /// Rebuild main stage: account the header just read back, request the
    /// next one, then decide whether the scan continues, moves on to the
    /// next queue, or wraps when the whole queue is occupied.
    fn scan_header(&mut self) {
        let flash = self.flash;
        if self.spi_len != 0 {
            let queue = &mut self.queues[self.iter_queue];
            let bytes = &self.spi[FRAME_OVERHEAD..FRAME_OVERHEAD + RecordHeader::SIZE];
            let head = RecordHeader::decode(bytes);
            if head.magic == queue.magic {
                queue.count += 1;
                if head.id > queue.id_max {
                    queue.id_max = head.id;
                }
                if head.id < queue.id_min {
                    queue.id_min = head.id;
                    queue.addr_id_min = self.addr;
                }
            } else if !queue.initialized && RecordHeader::is_erased(bytes) {
                // first erased slot becomes the write cursor; the scan keeps
                // going so the ids of the remaining records are still seen
                queue.addr_next_write = self.addr;
                queue.initialized = true;
            }
            // anything else is a torn or alien page: skip it
        }

        let (capacity, initialized, start_sector, pages_per_elem) = {
            let queue = &self.queues[self.iter_queue];
            (
                queue.capacity as usize,
                queue.initialized,
                queue.start_sector,
                queue.pages_per_elem,
            )
        };

        // request the header at the current element index; the last pass
        // lands one slot past the range and is dropped, replaced by the
        // write enable, or carried into the next queue's scan
        self.addr = start_sector * flash.sector_size
            + pages_per_elem * flash.page_size * self.iter_elem as u32;
        let len = FRAME_OVERHEAD + RecordHeader::SIZE;
        self.spi[..len].fill(0);
        self.spi[..FRAME_OVERHEAD].copy_from_slice(&command_and_address(flash.read_data, self.addr));
        self.spi_len = len;

        if self.iter_elem < capacity {
            self.iter_elem += 1;
        } else if initialized {
            match self.next_scan_queue(self.iter_queue + 1) {
                Some(next) => {
                    self.iter_queue = next;
                    self.iter_elem = 0;
                    self.queues[next].begin_scan();
                }
                None => self.finish(),
            }
        } else {
            self.spi[0] = flash.write_enable;
            self.spi_len = 1;
            self.state = State::ScanErase;
        }
    }

    /// Erase the sector containing the oldest record to make room.
    fn scan_erase(&mut self) {
        let flash = self.flash;
        let oldest = self.queues[self.iter_queue].addr_id_min;
        let sector = oldest - oldest % flash.sector_size;
        self.spi[..FRAME_OVERHEAD]
            .copy_from_slice(&command_and_address(flash.erase_sector, sector));
        self.spi_len = FRAME_OVERHEAD;
        self.state = State::ScanRestart;
    }

    /// Wait out the erase, then scan the queue again from element 0; the next
    /// pass finds the erased slots and places the write cursor.
    fn scan_restart(&mut self) {
        self.iter_elem = 0;
        self.queues[self.iter_queue].begin_scan();
        self.spi[0] = self.flash.read_status;
        self.spi[1] = 0;
        self.spi_len = 2;
        self.state = State::ScanPoll;
    }

    /// Append gate: all payload written means done, otherwise latch the write
    /// enable for the next page.
    fn push_enable(&mut self) {
        if self.iter_elem >= self.data_len {
            self.finish();
            return;
        }
        self.spi[0] = self.flash.write_enable;
        self.spi_len = 1;
        self.state = State::PushProgram;
    }

    /// Assemble one page program frame. The first page carries the record
    /// header and loses that much payload room.
    fn push_program(&mut self, data: Data<'_>) {
        let flash = self.flash;
        let Data::Tx(payload) = data else {
            debug_assert!(false, "append ticked without a payload");
            self.finish();
            return;
        };
        self.spi[..FRAME_OVERHEAD]
            .copy_from_slice(&command_and_address(flash.write_page, self.addr));
        let mut len = FRAME_OVERHEAD;
        let mut avail = flash.page_size as usize;
        if self.iter_elem == 0 {
            let queue = &self.queues[self.iter_queue];
            let head = RecordHeader {
                magic: queue.magic,
                id: queue.id_max + 1,
            };
            head.encode(&mut self.spi[len..len + RecordHeader::SIZE]);
            len += RecordHeader::SIZE;
            avail -= RecordHeader::SIZE;
        }
        let copy = avail.min(self.data_len - self.iter_elem);
        self.spi[len..len + copy]
            .copy_from_slice(&payload[self.iter_elem..self.iter_elem + copy]);
        len += copy;
        self.spi_len = len;
        self.iter_elem += copy;
        self.addr += flash.page_size;
        self.state = State::PushPoll;
    }

    /// Issue the transparent read, or fault out when the scratch cannot hold
    /// the requested range.
    fn read_issue(&mut self) {
        let flash = self.flash;
        let len = self.data_len + FRAME_OVERHEAD;
        if len > self.spi.len() {
            self.fault = Some(Fault::SpiBufSize);
            self.finish();
            return;
        }
        self.spi[..len].fill(0);
        self.spi[..FRAME_OVERHEAD].copy_from_slice(&command_and_address(flash.read_data, self.addr));
        self.spi_len = len;
        self.state = State::ReadCopy;
    }

    fn read_copy(&mut self, data: Data<'_>) {
        let Data::Rx(dest) = data else {
            debug_assert!(false, "raw read ticked without a destination");
            self.finish();
            return;
        };
        dest[..self.data_len]
            .copy_from_slice(&self.spi[FRAME_OVERHEAD..FRAME_OVERHEAD + self.data_len]);
        self.finish();
    }
}
