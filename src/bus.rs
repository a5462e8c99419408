//! The actuator register bus boundary.
//!
//! The turret only assumes a capability-typed client that can perform
//! addressed register reads and writes; connection management, framing and
//! transport retries all live behind [`ServoBus`]. [`SimServoBus`] is an
//! in-memory implementation backing the simulator binary and the test
//! suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use arrayvec::ArrayVec;
use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::registers::{Register, MAX_TRANSFER_SIZE};

/// Bounded payload of a single register transfer.
pub type RegisterBlock = ArrayVec<u8, MAX_TRANSFER_SIZE>;

/// Which memory region of a board a transfer addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemRegion {
    /// Volatile runtime registers. The poll loop and arbiter only use RAM.
    Ram,
    /// Persistent configuration registers.
    Eeprom,
}

/// Errors surfaced by a bus client.
///
/// `Cancelled` is the only non-fatal kind: it means the transport was shut
/// down deliberately and the poll loop should stop scheduling. Every other
/// failure is unrecoverable for this subsystem and propagates unretried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("bus i/o failed: {0}")]
    Io(String),
    #[error("bus operation cancelled")]
    Cancelled,
}

impl From<ProtocolError> for BusError {
    fn from(e: ProtocolError) -> Self {
        BusError::Io(e.to_string())
    }
}

/// Asynchronous register access to one board on the shared actuator bus.
///
/// No two operations are ever issued concurrently by the turret; each call
/// is awaited before the next begins.
#[async_trait]
pub trait ServoBus: Send + Sync {
    async fn mem_read(
        &self,
        region: MemRegion,
        board: u8,
        offset: u8,
        length: usize,
    ) -> Result<RegisterBlock, BusError>;

    async fn mem_write(
        &self,
        region: MemRegion,
        board: u8,
        offset: u8,
        data: &[u8],
    ) -> Result<(), BusError>;

    /// Write a scalar into a RAM register, packed as consecutive 7-bit
    /// groups across the register's byte width.
    async fn write_int(&self, board: u8, register: Register, value: i32) -> Result<(), BusError> {
        if register.length > MAX_TRANSFER_SIZE {
            return Err(BusError::Io(format!(
                "register length {} exceeds bus maximum {}",
                register.length, MAX_TRANSFER_SIZE
            )));
        }
        let mut data = RegisterBlock::new();
        for group in 0..register.length {
            data.push(((value >> (7 * group)) & 0x7f) as u8);
        }
        self.mem_write(MemRegion::Ram, board, register.offset, &data)
            .await
    }
}

/// One write observed by [`SimServoBus`], retained for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub board: u8,
    pub offset: u8,
    pub data: RegisterBlock,
}

const BOARD_RAM_SIZE: usize = 256;

/// In-memory register files standing in for the gimbal and fire control
/// boards. Boards materialize zero-filled on first access; registers can be
/// preloaded and inspected out of band, single i/o faults injected, and the
/// whole transport shut down.
#[derive(Debug, Default)]
pub struct SimServoBus {
    boards: Mutex<HashMap<u8, Vec<u8>>>,
    writes: Mutex<Vec<WriteRecord>>,
    fail_next: AtomicBool,
    shutdown: AtomicBool,
}

impl SimServoBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload register contents, as if the board had updated them itself.
    /// Does not appear in the write log.
    pub fn set_registers(&self, board: u8, offset: u8, data: &[u8]) {
        let mut boards = self.boards.lock().unwrap();
        let file = boards
            .entry(board)
            .or_insert_with(|| vec![0; BOARD_RAM_SIZE]);
        let start = offset as usize;
        file[start..start + data.len()].copy_from_slice(data);
    }

    /// Raw register contents for assertions.
    pub fn registers(&self, board: u8, offset: u8, length: usize) -> Vec<u8> {
        let mut boards = self.boards.lock().unwrap();
        let file = boards
            .entry(board)
            .or_insert_with(|| vec![0; BOARD_RAM_SIZE]);
        let start = offset as usize;
        file[start..start + length].to_vec()
    }

    /// Every write performed through the bus, in order.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    /// Make the next read or write fail with `BusError::Io`.
    pub fn fail_next_io(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Shut the transport down: every subsequent operation returns
    /// `BusError::Cancelled`.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn check_transfer(&self, offset: u8, length: usize) -> Result<(), BusError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(BusError::Cancelled);
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BusError::Io("injected fault".to_string()));
        }
        if length > MAX_TRANSFER_SIZE {
            return Err(BusError::Io(format!(
                "transfer length {} exceeds bus maximum {}",
                length, MAX_TRANSFER_SIZE
            )));
        }
        if offset as usize + length > BOARD_RAM_SIZE {
            return Err(BusError::Io(format!(
                "transfer at {:#04x}+{} runs past board memory",
                offset, length
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ServoBus for SimServoBus {
    async fn mem_read(
        &self,
        _region: MemRegion,
        board: u8,
        offset: u8,
        length: usize,
    ) -> Result<RegisterBlock, BusError> {
        self.check_transfer(offset, length)?;
        let mut boards = self.boards.lock().unwrap();
        let file = boards
            .entry(board)
            .or_insert_with(|| vec![0; BOARD_RAM_SIZE]);
        let start = offset as usize;
        let mut block = RegisterBlock::new();
        block.extend(file[start..start + length].iter().copied());
        Ok(block)
    }

    async fn mem_write(
        &self,
        _region: MemRegion,
        board: u8,
        offset: u8,
        data: &[u8],
    ) -> Result<(), BusError> {
        self.check_transfer(offset, data.len())?;
        {
            let mut boards = self.boards.lock().unwrap();
            let file = boards
                .entry(board)
                .or_insert_with(|| vec![0; BOARD_RAM_SIZE]);
            let start = offset as usize;
            file[start..start + data.len()].copy_from_slice(data);
        }
        let mut record = RegisterBlock::new();
        record.extend(data.iter().copied());
        self.writes.lock().unwrap().push(WriteRecord {
            board,
            offset,
            data: record,
        });
        Ok(())
    }
}
