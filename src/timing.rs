//! Interfaces to the timing collaborators the FTL reports into, plus a
//! small reference model so the crate can run on its own.
//!
//! Real delays never happen here: every call returns a simulated
//! completion timestamp.

use std::collections::HashMap;

use crate::address::Ppa;
use crate::config::{Counter, SimTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NandOp {
    Read,
    Program,
    Erase,
}

#[derive(Debug, Clone, Copy)]
pub struct NandCmd {
    pub partition: usize,
    pub op: NandOp,
    /// First page of the access.
    pub ppa: Ppa,
    pub pages: Counter,
    pub stime: SimTime,
    /// Issued by GC rather than a host request.
    pub background: bool,
}

/// Shared NAND/PCIe timing ledger of a namespace.
pub trait NandTiming {
    fn simulate_nand(&mut self, cmd: &NandCmd) -> SimTime;
    fn simulate_pcie(&mut self, stime: SimTime, bytes: usize) -> SimTime;
    fn enqueue_background_io(&mut self, is_write: bool, pages: Counter);
}

/// Host write buffer shared by every partition of a namespace.
pub trait WriteBuffer {
    /// Reserves up to `bytes`, returning how much was granted.
    fn allocate(&mut self, bytes: usize) -> usize;
    fn release(&mut self, bytes: usize);
    fn simulate(&mut self, stime: SimTime, bytes: usize, host_originated: bool) -> SimTime;
}

#[derive(Debug, Clone, Copy)]
pub struct NandLatency {
    pub read: SimTime,
    pub program: SimTime,
    pub erase: SimTime,
}

impl Default for NandLatency {
    fn default() -> Self {
        NandLatency {
            read: 40_000,
            program: 200_000,
            erase: 2_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackgroundIo {
    pub read_pages: Counter,
    pub write_pages: Counter,
}

/// Per-LUN availability clock with fixed operation latencies.
pub struct LatencyModel {
    latency: NandLatency,
    pcie_bytes_per_us: u64,
    pcie_avail: SimTime,
    lun_avail: HashMap<(usize, usize, usize), SimTime>,
    background: BackgroundIo,
    nand_ops: u64,
}

impl Default for LatencyModel {
    fn default() -> Self {
        LatencyModel::new(NandLatency::default(), 4_000)
    }
}

impl LatencyModel {
    pub fn new(latency: NandLatency, pcie_bytes_per_us: u64) -> Self {
        LatencyModel {
            latency,
            pcie_bytes_per_us: pcie_bytes_per_us.max(1),
            pcie_avail: 0,
            lun_avail: HashMap::new(),
            background: BackgroundIo::default(),
            nand_ops: 0,
        }
    }

    pub fn background(&self) -> BackgroundIo {
        self.background
    }

    pub fn nand_ops(&self) -> u64 {
        self.nand_ops
    }
}

impl NandTiming for LatencyModel {
    fn simulate_nand(&mut self, cmd: &NandCmd) -> SimTime {
        let lat = match cmd.op {
            NandOp::Read => self.latency.read,
            NandOp::Program => self.latency.program,
            NandOp::Erase => self.latency.erase,
        };
        let avail = self
            .lun_avail
            .entry((cmd.partition, cmd.ppa.ch, cmd.ppa.lun))
            .or_insert(0);
        let start = cmd.stime.max(*avail);
        *avail = start + lat;
        self.nand_ops += 1;
        *avail
    }

    fn simulate_pcie(&mut self, stime: SimTime, bytes: usize) -> SimTime {
        let start = stime.max(self.pcie_avail);
        self.pcie_avail = start + bytes as u64 * 1_000 / self.pcie_bytes_per_us;
        self.pcie_avail
    }

    fn enqueue_background_io(&mut self, is_write: bool, pages: Counter) {
        if is_write {
            self.background.write_pages += pages;
        } else {
            self.background.read_pages += pages;
        }
    }
}

/// Bounded DRAM write buffer.
pub struct DramWriteBuffer {
    capacity: usize,
    used: usize,
    bytes_per_us: u64,
}

impl DramWriteBuffer {
    pub fn new(capacity: usize, bytes_per_us: u64) -> Self {
        DramWriteBuffer {
            capacity,
            used: 0,
            bytes_per_us: bytes_per_us.max(1),
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn available(&self) -> usize {
        self.capacity - self.used
    }
}

impl WriteBuffer for DramWriteBuffer {
    fn allocate(&mut self, bytes: usize) -> usize {
        let granted = bytes.min(self.available());
        self.used += granted;
        granted
    }

    fn release(&mut self, bytes: usize) {
        self.used -= bytes.min(self.used);
    }

    fn simulate(&mut self, stime: SimTime, bytes: usize, _host_originated: bool) -> SimTime {
        stime + bytes as u64 * 1_000 / self.bytes_per_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(op: NandOp, ch: usize, stime: SimTime) -> NandCmd {
        NandCmd {
            partition: 0,
            op,
            ppa: Ppa::new(ch, 0, 0, 0, 0),
            pages: 1,
            stime,
            background: false,
        }
    }

    #[test]
    fn same_lun_serializes() {
        let mut model = LatencyModel::default();
        assert_eq!(model.simulate_nand(&cmd(NandOp::Read, 0, 0)), 40_000);
        assert_eq!(model.simulate_nand(&cmd(NandOp::Program, 0, 0)), 240_000);
        // other channel is idle
        assert_eq!(model.simulate_nand(&cmd(NandOp::Read, 1, 0)), 40_000);
        assert_eq!(model.nand_ops(), 3);
    }

    #[test]
    fn pcie_transfer_scales_with_size() {
        let mut model = LatencyModel::new(NandLatency::default(), 4_000);
        assert_eq!(model.simulate_pcie(0, 4_000), 1_000);
        assert_eq!(model.simulate_pcie(0, 8_000), 3_000);
    }

    #[test]
    fn buffer_grants_what_fits() {
        let mut wb = DramWriteBuffer::new(10_000, 1_000);
        assert_eq!(wb.allocate(8_192), 8_192);
        assert_eq!(wb.allocate(4_096), 1_808);
        wb.release(4_096);
        assert_eq!(wb.used(), 5_904);
        assert_eq!(wb.simulate(100, 1_000, true), 1_100);
    }
}
