use std::ops::Range;

use byte_unit::Byte;
use log::{debug, info};
use num_integer::div_rem;

use crate::config::{Config, Lpn, SimTime, StreamId, SECTOR_SIZE};
use crate::error::Result;
use crate::ftl::{FtlPartition, FtlStats};
use crate::timing::{NandTiming, WriteBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Read,
    Write,
    Trim,
    Flush,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbaRange {
    pub slba: u64,
    pub nlb: u64,
}

impl LbaRange {
    pub fn new(slba: u64, nlb: u64) -> Self {
        LbaRange { slba, nlb }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub opcode: Opcode,
    /// Starting LBA; the destination for copies.
    pub slba: u64,
    pub nlb: u64,
    pub stream: StreamId,
    pub stime: SimTime,
    /// Force unit access: complete only once the data is programmed.
    pub fua: bool,
    /// Trim ranges, or copy sources.
    pub ranges: Vec<LbaRange>,
}

impl Request {
    fn new(opcode: Opcode, slba: u64, nlb: u64, stime: SimTime) -> Self {
        Request {
            opcode,
            slba,
            nlb,
            stream: 0,
            stime,
            fua: false,
            ranges: Vec::new(),
        }
    }

    pub fn read(slba: u64, nlb: u64, stime: SimTime) -> Self {
        Request::new(Opcode::Read, slba, nlb, stime)
    }

    pub fn write(slba: u64, nlb: u64, stream: StreamId, stime: SimTime) -> Self {
        Request {
            stream,
            ..Request::new(Opcode::Write, slba, nlb, stime)
        }
    }

    pub fn trim(ranges: Vec<LbaRange>, stime: SimTime) -> Self {
        Request {
            ranges,
            ..Request::new(Opcode::Trim, 0, 0, stime)
        }
    }

    pub fn flush(stime: SimTime) -> Self {
        Request::new(Opcode::Flush, 0, 0, stime)
    }

    pub fn copy(sources: Vec<LbaRange>, dest: u64, stream: StreamId, stime: SimTime) -> Self {
        let nlb = sources.iter().map(|r| r.nlb).sum();
        Request {
            stream,
            ranges: sources,
            ..Request::new(Opcode::Copy, dest, nlb, stime)
        }
    }

    pub fn with_fua(mut self, fua: bool) -> Self {
        self.fua = fua;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    LbaOutOfRange,
    WriteBufferFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub expire_time: SimTime,
    pub nand_stime: SimTime,
    pub status: Status,
    /// Write buffer bytes held on behalf of this request. The caller
    /// releases them once the data is considered durable.
    pub buffered_bytes: usize,
}

impl Completion {
    fn success(expire_time: SimTime, nand_stime: SimTime) -> Self {
        Completion {
            expire_time,
            nand_stime,
            status: Status::Success,
            buffered_bytes: 0,
        }
    }

    fn rejected(stime: SimTime, status: Status) -> Self {
        Completion {
            expire_time: stime,
            nand_stime: stime,
            status,
            buffered_bytes: 0,
        }
    }
}

/// A namespace striped round-robin over independent FTL partitions.
///
/// Namespace LPN `n` lives in partition `n % partitions` at local LPN
/// `n / partitions`. The timing oracle and write buffer are shared by every
/// partition and handed in per request.
pub struct Namespace {
    cfg: Config,
    parts: Vec<FtlPartition>,
    capacity_lbas: u64,
}

impl Namespace {
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate()?;
        let parts = (0..cfg.partitions)
            .map(|id| FtlPartition::new(id, &cfg))
            .collect::<Result<Vec<_>>>()?;
        let capacity_lbas = (cfg.usable_capacity() / SECTOR_SIZE) as u64;

        info!(
            "Physical Capacity: {} bytes, {}",
            cfg.physical_capacity(),
            Byte::from_bytes(cfg.physical_capacity() as u128).get_appropriate_unit(true).to_string()
        );
        info!(
            "User Capacity: {} bytes, {} across {} partitions, {} streams",
            cfg.usable_capacity(),
            Byte::from_bytes(cfg.usable_capacity() as u128).get_appropriate_unit(true).to_string(),
            cfg.partitions,
            cfg.streams
        );

        Ok(Namespace {
            cfg,
            parts,
            capacity_lbas,
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn capacity_lbas(&self) -> u64 {
        self.capacity_lbas
    }

    pub fn partitions(&self) -> &[FtlPartition] {
        &self.parts
    }

    pub fn partition_mut(&mut self, id: usize) -> Option<&mut FtlPartition> {
        self.parts.get_mut(id)
    }

    /// Partition and local LPN serving namespace LPN `lpn`.
    pub fn locate(&self, lpn: Lpn) -> (usize, Lpn) {
        let (local, part) = div_rem(lpn, self.parts.len());
        (part, local)
    }

    pub fn stats(&self) -> FtlStats {
        self.parts.iter().fold(FtlStats::default(), |acc, p| {
            let s = p.stats();
            FtlStats {
                host_pages: acc.host_pages + s.host_pages,
                gc_pages: acc.gc_pages + s.gc_pages,
                gc_runs: acc.gc_runs + s.gc_runs,
                erased_lines: acc.erased_lines + s.erased_lines,
                trimmed_pages: acc.trimmed_pages + s.trimmed_pages,
            }
        })
    }

    pub fn check_invariants(&self) -> Result<()> {
        self.parts.iter().try_for_each(FtlPartition::check_invariants)
    }

    pub fn handle(
        &mut self,
        req: &Request,
        nand: &mut dyn NandTiming,
        wb: &mut dyn WriteBuffer,
    ) -> Result<Completion> {
        match req.opcode {
            Opcode::Read => self.read(req, nand),
            Opcode::Write => self.write(req, nand, wb),
            Opcode::Trim => self.trim(req),
            Opcode::Flush => Ok(self.flush(req)),
            Opcode::Copy => self.copy(req, nand, wb),
        }
    }

    pub fn read(&mut self, req: &Request, nand: &mut dyn NandTiming) -> Result<Completion> {
        if !self.in_range(req.slba, req.nlb) {
            return Ok(Completion::rejected(req.stime, Status::LbaOutOfRange));
        }
        let nand_done = self.read_nand(req.slba, req.nlb, req.stime, nand)?;
        let expire = nand.simulate_pcie(nand_done, req.nlb as usize * SECTOR_SIZE);
        Ok(Completion::success(expire, req.stime))
    }

    pub fn write(
        &mut self,
        req: &Request,
        nand: &mut dyn NandTiming,
        wb: &mut dyn WriteBuffer,
    ) -> Result<Completion> {
        if !self.in_range(req.slba, req.nlb) {
            return Ok(Completion::rejected(req.stime, Status::LbaOutOfRange));
        }
        self.program(req.slba, req.nlb, req.stream, req.stime, req.fua, true, nand, wb)
    }

    /// Unmaps every logical page fully covered by the request's ranges.
    pub fn trim(&mut self, req: &Request) -> Result<Completion> {
        if req.ranges.iter().any(|r| !self.in_range(r.slba, r.nlb)) {
            return Ok(Completion::rejected(req.stime, Status::LbaOutOfRange));
        }
        let secs = self.cfg.geometry.sectors_per_page() as u64;
        for range in &req.ranges {
            let first = range.slba.div_ceil(secs);
            let end = (range.slba + range.nlb) / secs;
            for lpn in first..end {
                let (part, local) = self.locate(lpn as Lpn);
                self.parts[part].trim_page(local)?;
            }
        }
        Ok(Completion::success(req.stime, req.stime))
    }

    /// Reports when every outstanding program across partitions has drained.
    pub fn flush(&self, req: &Request) -> Completion {
        let drained = self
            .parts
            .iter()
            .map(FtlPartition::drain_time)
            .fold(req.stime, SimTime::max);
        Completion::success(drained, req.stime)
    }

    /// Device-side copy: reads every source range, then writes their total
    /// length at `req.slba` without a host transfer.
    pub fn copy(
        &mut self,
        req: &Request,
        nand: &mut dyn NandTiming,
        wb: &mut dyn WriteBuffer,
    ) -> Result<Completion> {
        let sources_ok = req.ranges.iter().all(|r| self.in_range(r.slba, r.nlb));
        if !sources_ok || !self.in_range(req.slba, req.nlb) {
            return Ok(Completion::rejected(req.stime, Status::LbaOutOfRange));
        }

        let mut read_done = req.stime;
        for src in &req.ranges {
            read_done = read_done.max(self.read_nand(src.slba, src.nlb, req.stime, nand)?);
        }
        let written = self.program(req.slba, req.nlb, req.stream, read_done, req.fua, false, nand, wb)?;
        Ok(Completion {
            nand_stime: req.stime,
            ..written
        })
    }

    fn in_range(&self, slba: u64, nlb: u64) -> bool {
        slba.checked_add(nlb)
            .map_or(false, |end| end <= self.capacity_lbas)
    }

    /// Logical pages touched by `nlb` sectors starting at `slba`.
    fn lpn_range(&self, slba: u64, nlb: u64) -> Range<Lpn> {
        if nlb == 0 {
            return 0..0;
        }
        let secs = self.cfg.geometry.sectors_per_page() as u64;
        let start = slba / secs;
        let end = (slba + nlb - 1) / secs + 1;
        start as Lpn..end as Lpn
    }

    /// Splits a namespace LPN range into per-partition local LPN ranges.
    fn stripe(&self, lpns: Range<Lpn>) -> Vec<Range<Lpn>> {
        let n = self.parts.len();
        (0..n)
            .map(|part| {
                // first namespace lpn >= start that lands on `part`
                let first = lpns.start + (part + n - lpns.start % n) % n;
                if first >= lpns.end {
                    return 0..0;
                }
                let last = lpns.end - 1 - (lpns.end - 1 + n - part) % n;
                first / n..last / n + 1
            })
            .collect()
    }

    fn read_nand(&self, slba: u64, nlb: u64, stime: SimTime, nand: &mut dyn NandTiming) -> Result<SimTime> {
        let mut done = stime;
        for (part, locals) in self.stripe(self.lpn_range(slba, nlb)).into_iter().enumerate() {
            if locals.is_empty() {
                continue;
            }
            done = done.max(self.parts[part].read_pages(locals, stime, nand)?);
        }
        Ok(done)
    }

    #[allow(clippy::too_many_arguments)]
    fn program(
        &mut self,
        slba: u64,
        nlb: u64,
        stream: StreamId,
        stime: SimTime,
        fua: bool,
        host: bool,
        nand: &mut dyn NandTiming,
        wb: &mut dyn WriteBuffer,
    ) -> Result<Completion> {
        let lpns = self.lpn_range(slba, nlb);
        let bytes = lpns.len() * self.cfg.geometry.page_size;
        let granted = wb.allocate(bytes);
        if granted < bytes {
            wb.release(granted);
            debug!("write of {} bytes rejected, buffer granted {}", bytes, granted);
            return Ok(Completion::rejected(stime, Status::WriteBufferFull));
        }

        let stream = if stream < self.cfg.streams {
            stream
        } else {
            debug!("stream {} out of range, using stream 0", stream);
            0
        };

        let buffered = wb.simulate(stime, bytes, host);
        let mut programmed = buffered;
        let mut touched = vec![false; self.parts.len()];
        for lpn in lpns {
            let (part, local) = self.locate(lpn);
            touched[part] = true;
            if let Some(done) = self.parts[part].write_page(local, stream, buffered, nand)? {
                programmed = programmed.max(done);
            }
        }
        for (part, hit) in touched.into_iter().enumerate() {
            if hit {
                self.parts[part].maybe_gc(buffered, nand)?;
            }
        }

        let expire = if self.cfg.write_early_completion && !fua {
            buffered
        } else {
            programmed
        };
        Ok(Completion {
            buffered_bytes: bytes,
            ..Completion::success(expire, buffered)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Geometry;
    use crate::mapping::L2PValue;
    use crate::timing::{DramWriteBuffer, LatencyModel};

    const SECS: u64 = 8;

    fn config(partitions: usize) -> Config {
        let mut cfg = Config::with_geometry(Geometry {
            channels: 4,
            luns_per_channel: 1,
            planes_per_lun: 1,
            blocks_per_plane: 16,
            pages_per_block: 4,
            pages_per_oneshot: 2,
            page_size: 4096,
        });
        cfg.op_percent = 25.0;
        cfg.streams = 2;
        cfg.partitions = partitions;
        cfg.gc_thres_lines_high = 2;
        cfg.gc_thres_lines_low = 3;
        cfg
    }

    fn harness(partitions: usize) -> (Namespace, LatencyModel, DramWriteBuffer) {
        (
            Namespace::new(config(partitions)).unwrap(),
            LatencyModel::default(),
            DramWriteBuffer::new(1 << 20, 10_000),
        )
    }

    #[test]
    fn capacity_follows_op() {
        let (ns, _, _) = harness(2);
        // 256 pages, 64 held back, 2 partitions, 8 sectors each
        assert_eq!(ns.capacity_lbas(), 192 * 2 * SECS);
    }

    #[test]
    fn lpns_stripe_round_robin() {
        let (ns, _, _) = harness(3);
        assert_eq!(ns.locate(0), (0, 0));
        assert_eq!(ns.locate(4), (1, 1));
        assert_eq!(ns.locate(8), (2, 2));
        assert_eq!(ns.stripe(2..9), vec![1..3, 1..3, 0..3]);
        assert_eq!(ns.stripe(4..5), vec![0..0, 1..2, 0..0]);
    }

    #[test]
    fn write_then_read_lands_on_partitions() {
        let (mut ns, mut nand, mut wb) = harness(2);
        let done = ns
            .handle(&Request::write(0, 4 * SECS, 1, 0), &mut nand, &mut wb)
            .unwrap();
        assert_eq!(done.status, Status::Success);

        for lpn in 0..4 {
            let (part, local) = ns.locate(lpn);
            let ftl = &ns.partitions()[part];
            assert!(ftl.lookup(local).unwrap().mapped());
            assert_eq!(ftl.stream_of(local).unwrap(), Some(1));
        }

        let read = ns.handle(&Request::read(0, 4 * SECS, done.expire_time), &mut nand, &mut wb).unwrap();
        assert_eq!(read.status, Status::Success);
        assert!(read.expire_time > done.expire_time);
    }

    #[test]
    fn out_of_range_rejects_without_mutation() {
        let (mut ns, mut nand, mut wb) = harness(1);
        let cap = ns.capacity_lbas();
        let done = ns
            .handle(&Request::write(cap - SECS, 2 * SECS, 0, 0), &mut nand, &mut wb)
            .unwrap();
        assert_eq!(done.status, Status::LbaOutOfRange);
        assert_eq!(ns.stats().host_pages, 0);
        assert_eq!(wb.used(), 0);

        let read = ns.handle(&Request::read(u64::MAX, 2, 0), &mut nand, &mut wb).unwrap();
        assert_eq!(read.status, Status::LbaOutOfRange);
    }

    #[test]
    fn full_write_buffer_rejects_without_mutation() {
        let mut ns = Namespace::new(config(1)).unwrap();
        let mut nand = LatencyModel::default();
        let mut wb = DramWriteBuffer::new(3 * 4096, 10_000);

        let done = ns
            .handle(&Request::write(0, 4 * SECS, 0, 0), &mut nand, &mut wb)
            .unwrap();
        assert_eq!(done.status, Status::WriteBufferFull);
        assert_eq!(wb.used(), 0);
        assert_eq!(ns.partitions()[0].maps().mapped_count(), 0);

        let done = ns
            .handle(&Request::write(0, 3 * SECS, 0, 0), &mut nand, &mut wb)
            .unwrap();
        assert_eq!(done.status, Status::Success);
        assert_eq!(wb.used(), 3 * 4096);
        assert_eq!(done.buffered_bytes, 3 * 4096);
    }

    #[test]
    fn unaligned_write_reports_whole_pages_buffered() {
        let (mut ns, mut nand, mut wb) = harness(1);
        // sectors 4..12 straddle two pages
        let done = ns
            .handle(&Request::write(4, SECS, 0, 0), &mut nand, &mut wb)
            .unwrap();
        assert_eq!(done.status, Status::Success);
        assert_eq!(done.buffered_bytes, 2 * 4096);
        assert_eq!(wb.used(), done.buffered_bytes);

        wb.release(done.buffered_bytes);
        assert_eq!(wb.used(), 0);
    }

    #[test]
    fn early_completion_unless_fua() {
        let mut cfg = config(1);
        cfg.write_early_completion = true;
        let mut ns = Namespace::new(cfg).unwrap();
        let mut nand = LatencyModel::default();
        let mut wb = DramWriteBuffer::new(1 << 20, 10_000);

        let early = ns.handle(&Request::write(0, 2 * SECS, 0, 0), &mut nand, &mut wb).unwrap();
        assert_eq!(early.expire_time, early.nand_stime);

        let fua = ns
            .handle(&Request::write(2 * SECS, 2 * SECS, 0, 0).with_fua(true), &mut nand, &mut wb)
            .unwrap();
        assert!(fua.expire_time > fua.nand_stime);

        let flush = ns.flush(&Request::flush(0));
        assert_eq!(flush.expire_time, fua.expire_time);
    }

    #[test]
    fn out_of_range_stream_falls_back_to_zero() {
        let (mut ns, mut nand, mut wb) = harness(1);
        ns.handle(&Request::write(0, SECS, 9, 0), &mut nand, &mut wb).unwrap();
        assert_eq!(ns.partitions()[0].stream_of(0).unwrap(), Some(0));
    }

    #[test]
    fn trim_only_unmaps_whole_pages() {
        let (mut ns, mut nand, mut wb) = harness(1);
        ns.handle(&Request::write(0, 4 * SECS, 0, 0), &mut nand, &mut wb).unwrap();

        // covers the tail of page 0, all of page 1 and the head of page 2
        let trim = Request::trim(vec![LbaRange::new(4, 2 * SECS)], 0);
        assert_eq!(ns.handle(&trim, &mut nand, &mut wb).unwrap().status, Status::Success);

        let ftl = &ns.partitions()[0];
        assert!(ftl.lookup(0).unwrap().mapped());
        assert_eq!(ftl.lookup(1).unwrap(), L2PValue::Unmapped);
        assert!(ftl.lookup(2).unwrap().mapped());

        // trimming unmapped space is a no-op
        let again = Request::trim(vec![LbaRange::new(SECS, SECS), LbaRange::new(40 * SECS, SECS)], 0);
        ns.handle(&again, &mut nand, &mut wb).unwrap();
        assert_eq!(ns.partitions()[0].maps().mapped_count(), 3);
        ns.check_invariants().unwrap();
    }

    #[test]
    fn copy_maps_destination() {
        let (mut ns, mut nand, mut wb) = harness(2);
        ns.handle(&Request::write(0, 2 * SECS, 0, 0), &mut nand, &mut wb).unwrap();

        let copy = Request::copy(vec![LbaRange::new(0, 2 * SECS)], 16 * SECS, 1, 0).with_fua(true);
        let done = ns.handle(&copy, &mut nand, &mut wb).unwrap();
        assert_eq!(done.status, Status::Success);
        assert!(done.expire_time > 0);

        for lpn in 16..18 {
            let (part, local) = ns.locate(lpn);
            assert_eq!(ns.partitions()[part].stream_of(local).unwrap(), Some(1));
        }
        assert_eq!(ns.stats().host_pages, 4);
    }
}
