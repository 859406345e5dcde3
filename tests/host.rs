//! Executor coverage through the real `SpiDevice` trait.

mod common;

use common::{SimFlash, SimSpi};
use spi_flash_ring::{Fault, FlashRing, Queue, RunError, W25Q32JV};

#[test]
fn blocking_executor_first_boot_and_append() {
    let mut queues = [Queue::default(); 2];
    let mut buf = [0u8; 260];
    let mut ring = FlashRing::new(0, &mut queues, &mut buf).unwrap();
    let mut spi = SimSpi(SimFlash::new(&W25Q32JV));

    ring.create_queue(0xA5A5_A5A5, 120, 4).unwrap();
    ring.rebuild().unwrap().blocking_run(&mut spi).unwrap();
    assert!(ring.queue(0).unwrap().is_initialized());

    ring.push(0, b"HELLO").unwrap().blocking_run(&mut spi).unwrap();
    assert_eq!(&spi.0.mem[12..17], b"HELLO");

    ring.rebuild().unwrap().blocking_run(&mut spi).unwrap();
    let queue = ring.queue(0).unwrap();
    assert_eq!(queue.count(), 1);
    assert_eq!(queue.id_max(), 1);
    assert_eq!(queue.write_addr(), 256);
}

#[test]
fn blocking_executor_surfaces_faults() {
    let mut queues = [Queue::default(); 2];
    let mut buf = [0u8; 260];
    let mut ring = FlashRing::new(0, &mut queues, &mut buf).unwrap();
    let mut spi = SimSpi(SimFlash::new(&W25Q32JV));

    let mut dest = [0u8; 257];
    let result = ring.read(0, &mut dest).unwrap().blocking_run(&mut spi);
    assert!(matches!(result, Err(RunError::Fault(Fault::SpiBufSize))));
    assert!(!ring.is_busy());
    assert_eq!(ring.fault(), Some(Fault::SpiBufSize));
}
