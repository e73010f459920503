#[cfg(test)]
use std::{println as warn, println as trace};

#[cfg(not(test))]
use log::*;

use crate::address::{AddressSpace, Ppa};
use crate::config::*;
use crate::error::{FtlError, Result};
use crate::flow_control::FlowController;
use crate::gc::GcOutcome;
use crate::line::{LineManager, PageStatus};
use crate::mapping::{AddressTranslator, L2PValue};
use crate::timing::{NandCmd, NandOp, NandTiming};
use crate::write_pointer::{PointerKind, WritePointerSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FtlStats {
    pub host_pages: u64,
    pub gc_pages: u64,
    pub gc_runs: u64,
    pub erased_lines: u64,
    pub trimmed_pages: u64,
}

impl FtlStats {
    pub fn write_amplification(&self) -> f64 {
        if self.host_pages == 0 {
            return 1.0;
        }
        (self.host_pages + self.gc_pages) as f64 / self.host_pages as f64
    }
}

/// One independent translation layer instance: its maps, lines, write
/// pointers and credit budget. Callers must serialize access.
pub struct FtlPartition {
    pub(crate) id: usize,
    pub(crate) cfg: Config,
    pub(crate) space: AddressSpace,
    pub(crate) maps: AddressTranslator,
    pub(crate) lines: LineManager,
    pub(crate) wps: WritePointerSet,
    pub(crate) flow: FlowController,
    pub(crate) stats: FtlStats,
    pub(crate) drain_time: SimTime,
    logical_pages: Counter,
}

impl FtlPartition {
    pub fn new(id: usize, cfg: &Config) -> Result<Self> {
        cfg.validate()?;
        let geo = cfg.geometry;
        let space = AddressSpace::new(&geo);
        let mut lines = LineManager::new(space.clone());
        let wps = WritePointerSet::new(&geo, cfg.streams, &mut lines)?;

        trace!(
            "partition {}: {} lines of {} pages, {} logical pages",
            id,
            geo.total_lines(),
            geo.pages_per_line(),
            cfg.logical_pages_per_partition()
        );

        Ok(FtlPartition {
            id,
            cfg: cfg.clone(),
            maps: AddressTranslator::new(space.clone()),
            flow: FlowController::new(geo.pages_per_line()),
            space,
            lines,
            wps,
            stats: FtlStats::default(),
            drain_time: 0,
            logical_pages: cfg.logical_pages_per_partition(),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn logical_pages(&self) -> Counter {
        self.logical_pages
    }

    pub fn lines(&self) -> &LineManager {
        &self.lines
    }

    pub fn maps(&self) -> &AddressTranslator {
        &self.maps
    }

    pub fn flow(&self) -> &FlowController {
        &self.flow
    }

    pub fn stats(&self) -> FtlStats {
        self.stats
    }

    pub fn write_pointers(&self) -> &WritePointerSet {
        &self.wps
    }

    /// Latest completion of any program this partition has issued.
    pub fn drain_time(&self) -> SimTime {
        self.drain_time
    }

    pub fn lookup(&self, lpn: Lpn) -> Result<L2PValue> {
        self.maps.get(lpn)
    }

    /// Stream that wrote the page currently backing `lpn`.
    pub fn stream_of(&self, lpn: Lpn) -> Result<Option<StreamId>> {
        match self.maps.get(lpn)? {
            L2PValue::Mapped(ppa) => Ok(Some(self.lines.page(&ppa)?.stream)),
            L2PValue::Unmapped => Ok(None),
        }
    }

    pub(crate) fn invalidate(&mut self, ppa: &Ppa) -> Result<()> {
        self.lines.mark_page_invalid(ppa)?;
        self.maps.set_reverse(ppa, None)
    }

    /// Writes one logical page through `stream`'s pointer.
    ///
    /// Returns the program completion time when this page closed a one-shot
    /// group, `None` while the group is still filling.
    pub fn write_page(
        &mut self,
        lpn: Lpn,
        stream: StreamId,
        now: SimTime,
        nand: &mut dyn NandTiming,
    ) -> Result<Option<SimTime>> {
        let kind = PointerKind::Host(stream);
        let ppa = self.wps.current(kind)?;
        if let L2PValue::Mapped(old) = self.maps.get(lpn)? {
            self.invalidate(&old)?;
        }
        self.maps.set(lpn, L2PValue::Mapped(ppa))?;
        self.maps.set_reverse(&ppa, Some(lpn))?;
        self.lines.mark_page_valid(&ppa, stream)?;
        self.wps.advance(kind, &mut self.lines)?;
        self.stats.host_pages += 1;

        let programmed = if self.space.completes_group(&ppa) {
            let done = nand.simulate_nand(&NandCmd {
                partition: self.id,
                op: NandOp::Program,
                ppa: self.space.group_origin(&ppa),
                pages: self.cfg.geometry.pages_per_oneshot,
                stime: now,
                background: false,
            });
            self.drain_time = self.drain_time.max(done);
            Some(done)
        } else {
            None
        };

        self.flow.consume();
        self.check_and_refill_credits(now, nand)?;
        Ok(programmed)
    }

    /// Runs a forced GC pass once credits run out, then tops the budget back up.
    fn check_and_refill_credits(&mut self, now: SimTime, nand: &mut dyn NandTiming) -> Result<()> {
        if !self.flow.exhausted() {
            return Ok(());
        }
        if self.lines.free_line_count() <= self.cfg.gc_thres_lines_high {
            if let GcOutcome::Reclaimed { invalid, .. } = self.run_gc(true, now, nand)? {
                self.flow.set_refill_quota(invalid);
            }
        }
        let granted = self.flow.refill();
        trace!("partition {}: refilled {} write credits", self.id, granted);
        Ok(())
    }

    /// Opportunistic pass, only when free lines are at the low watermark.
    pub fn maybe_gc(&mut self, now: SimTime, nand: &mut dyn NandTiming) -> Result<GcOutcome> {
        if self.lines.free_line_count() > self.cfg.gc_thres_lines_low {
            return Ok(GcOutcome::NoWork);
        }
        self.run_gc(false, now, nand)
    }

    /// Reads consecutive local LPNs, merging physically adjacent pages of one
    /// program group into a single NAND access. Unmapped pages cost nothing.
    pub fn read_pages<I>(&self, lpns: I, now: SimTime, nand: &mut dyn NandTiming) -> Result<SimTime>
    where
        I: IntoIterator<Item = Lpn>,
    {
        let mut done = now;
        let mut run: Option<(Ppa, Counter)> = None;

        for lpn in lpns {
            let Some(ppa) = self.maps.get(lpn)?.ppa() else {
                continue;
            };
            if let Some((first, len)) = run.as_mut() {
                let last = first.with_page(first.pg + *len - 1);
                if self.space.same_group(&last, &ppa) && ppa.pg == last.pg + 1 {
                    *len += 1;
                    continue;
                }
            }
            if let Some((first, len)) = run.replace((ppa, 1)) {
                done = done.max(self.read_nand(first, len, now, nand));
            }
        }
        if let Some((first, len)) = run {
            done = done.max(self.read_nand(first, len, now, nand));
        }
        Ok(done)
    }

    fn read_nand(&self, ppa: Ppa, pages: Counter, now: SimTime, nand: &mut dyn NandTiming) -> SimTime {
        nand.simulate_nand(&NandCmd {
            partition: self.id,
            op: NandOp::Read,
            ppa,
            pages,
            stime: now,
            background: false,
        })
    }

    /// Unmaps `lpn`. Returns whether anything was mapped.
    pub fn trim_page(&mut self, lpn: Lpn) -> Result<bool> {
        match self.maps.get(lpn)? {
            L2PValue::Unmapped => Ok(false),
            L2PValue::Mapped(ppa) => {
                self.invalidate(&ppa)?;
                self.maps.set(lpn, L2PValue::Unmapped)?;
                self.stats.trimmed_pages += 1;
                Ok(true)
            }
        }
    }

    /// Verifies line accounting and that the forward and reverse maps agree.
    pub fn check_invariants(&self) -> Result<()> {
        self.lines.check_invariants()?;

        let mut seen = vec![false; self.space.total_pages()];
        for (lpn, ppa) in self.maps.iter_mapped() {
            let idx = self.space.page_index(&ppa)?;
            if seen[idx] {
                return Err(FtlError::accounting(ppa.line(), format!("{} mapped twice", ppa)));
            }
            seen[idx] = true;
            if self.maps.get_reverse(&ppa)? != Some(lpn) {
                return Err(FtlError::MissingReverseMapping(ppa));
            }
            let status = self.lines.page(&ppa)?.status;
            if status != PageStatus::Valid {
                return Err(FtlError::PageState {
                    ppa,
                    expected: PageStatus::Valid,
                    found: status,
                });
            }
        }

        let valid: Counter = self.lines.lines().map(|l| l.vpc).sum();
        if valid != self.maps.mapped_count() {
            warn!(
                "partition {}: {} valid pages but {} mapped lpns",
                self.id,
                valid,
                self.maps.mapped_count()
            );
            return Err(FtlError::accounting(0, "valid page total differs from mapped lpns"));
        }
        Ok(())
    }
}
