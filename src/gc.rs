use log::{debug, trace};

use crate::address::Ppa;
use crate::config::{Counter, LineId, SimTime};
use crate::error::{FtlError, Result};
use crate::ftl::FtlPartition;
use crate::line::PageStatus;
use crate::mapping::L2PValue;
use crate::timing::{NandCmd, NandOp, NandTiming};
use crate::write_pointer::PointerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOutcome {
    NoWork,
    Reclaimed {
        line: LineId,
        /// Live pages moved to the GC line.
        relocated: Counter,
        /// Invalid pages the victim held when it was selected.
        invalid: Counter,
    },
}

impl FtlPartition {
    /// Reclaims one victim line: relocates its live pages through the GC
    /// pointer, erases its blocks and returns it to the free list.
    pub fn run_gc(&mut self, force: bool, now: SimTime, nand: &mut dyn NandTiming) -> Result<GcOutcome> {
        let Some(victim) = self.lines.select_victim(force) else {
            return Ok(GcOutcome::NoWork);
        };
        let (vpc, ipc) = {
            let line = self.lines.line(victim)?;
            (line.vpc, line.ipc)
        };
        debug!(
            "partition {}: gc{} line {} vpc {} ipc {}, free {} victims {} full {}",
            self.id,
            if force { " (forced)" } else { "" },
            victim,
            vpc,
            ipc,
            self.lines.free_line_count(),
            self.lines.victim_line_count(),
            self.lines.full_line_count()
        );

        let geo = self.cfg.geometry;
        let mut relocated = 0;
        let blocks: Vec<Ppa> = self.space.line_blocks(victim).collect();
        for block in &blocks {
            for origin in (0..geo.pages_per_block).step_by(geo.pages_per_oneshot) {
                relocated += self.clean_group(block.with_page(origin), now, nand)?;
            }
        }

        for block in &blocks {
            self.lines.mark_block_free(block)?;
            self.charge_gc(NandOp::Erase, *block, 1, now, nand);
        }
        self.lines.release_line(victim)?;
        self.stats.erased_lines += 1;

        if relocated != vpc {
            return Err(FtlError::accounting(
                victim,
                format!("relocated {} pages, line held {}", relocated, vpc),
            ));
        }
        self.stats.gc_runs += 1;

        Ok(GcOutcome::Reclaimed {
            line: victim,
            relocated,
            invalid: ipc,
        })
    }

    /// Moves the live pages of one program group, charging a single group read.
    fn clean_group(&mut self, origin: Ppa, now: SimTime, nand: &mut dyn NandTiming) -> Result<Counter> {
        let oneshot = self.cfg.geometry.pages_per_oneshot;
        let mut live = Vec::with_capacity(oneshot);
        for pg in origin.pg..origin.pg + oneshot {
            let ppa = origin.with_page(pg);
            match self.lines.page(&ppa)?.status {
                PageStatus::Free => return Err(FtlError::UnwrittenVictimPage(ppa)),
                PageStatus::Valid => live.push(ppa),
                PageStatus::Invalid => {}
            }
        }
        if live.is_empty() {
            return Ok(0);
        }

        self.charge_gc(NandOp::Read, origin, oneshot, now, nand);
        for old in &live {
            self.relocate(old, now, nand)?;
        }
        Ok(live.len())
    }

    fn relocate(&mut self, old: &Ppa, now: SimTime, nand: &mut dyn NandTiming) -> Result<()> {
        let lpn = self
            .maps
            .get_reverse(old)?
            .ok_or(FtlError::MissingReverseMapping(*old))?;
        let stream = self.lines.page(old)?.stream;
        let new = self.wps.current(PointerKind::Gc)?;

        self.maps.set(lpn, L2PValue::Mapped(new))?;
        self.maps.set_reverse(&new, Some(lpn))?;
        self.invalidate(old)?;
        self.lines.mark_page_valid(&new, stream)?;
        self.wps.advance(PointerKind::Gc, &mut self.lines)?;
        self.stats.gc_pages += 1;
        trace!("gc moved lpn {} {} -> {}", lpn, old, new);

        if self.space.completes_group(&new) {
            let origin = self.space.group_origin(&new);
            self.charge_gc(NandOp::Program, origin, self.cfg.geometry.pages_per_oneshot, now, nand);
        }
        Ok(())
    }

    /// GC traffic always lands on the background ledger; it is only timed
    /// when GC delay is enabled.
    fn charge_gc(&mut self, op: NandOp, ppa: Ppa, pages: Counter, now: SimTime, nand: &mut dyn NandTiming) {
        match op {
            NandOp::Read => nand.enqueue_background_io(false, pages),
            NandOp::Program => nand.enqueue_background_io(true, pages),
            NandOp::Erase => {}
        }
        if !self.cfg.gc_delay_enabled {
            return;
        }
        let done = nand.simulate_nand(&NandCmd {
            partition: self.id,
            op,
            ppa,
            pages,
            stime: now,
            background: true,
        });
        if op == NandOp::Program {
            self.drain_time = self.drain_time.max(done);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::{Config, Geometry, Lpn, StreamId};
    use crate::line::LineState;
    use crate::timing::LatencyModel;

    fn config(blocks: usize) -> Config {
        let mut cfg = Config::with_geometry(Geometry {
            channels: 4,
            luns_per_channel: 1,
            planes_per_lun: 1,
            blocks_per_plane: blocks,
            pages_per_block: 4,
            pages_per_oneshot: 1,
            page_size: 4096,
        });
        cfg.op_percent = 0.0;
        cfg.streams = 2;
        cfg.partitions = 1;
        cfg.gc_thres_lines_high = 0;
        cfg.gc_thres_lines_low = 0;
        cfg
    }

    fn write_all(ftl: &mut FtlPartition, lpns: impl IntoIterator<Item = Lpn>, stream: StreamId, nand: &mut LatencyModel) {
        for lpn in lpns {
            ftl.write_page(lpn, stream, 0, nand).unwrap();
        }
    }

    fn snapshot(ftl: &FtlPartition) -> HashMap<Lpn, (Ppa, StreamId)> {
        ftl.maps()
            .iter_mapped()
            .map(|(lpn, ppa)| (lpn, (ppa, ftl.lines().page(&ppa).unwrap().stream)))
            .collect()
    }

    #[test]
    fn nothing_to_collect() {
        let mut nand = LatencyModel::default();
        let mut ftl = FtlPartition::new(0, &config(4)).unwrap();
        assert_eq!(ftl.run_gc(true, 0, &mut nand).unwrap(), GcOutcome::NoWork);

        // a full line without invalidations is not a candidate
        write_all(&mut ftl, 0..16, 0, &mut nand);
        assert!(ftl.lines().is_full(0));
        assert_eq!(ftl.run_gc(true, 0, &mut nand).unwrap(), GcOutcome::NoWork);
    }

    #[test]
    fn gc_preserves_live_data() {
        let mut nand = LatencyModel::default();
        let mut ftl = FtlPartition::new(0, &config(4)).unwrap();
        write_all(&mut ftl, 0..16, 1, &mut nand);
        write_all(&mut ftl, [2, 5, 11], 0, &mut nand);

        let before = snapshot(&ftl);
        let moved: Vec<Lpn> = before
            .iter()
            .filter(|(_, (ppa, _))| ppa.line() == 1)
            .map(|(lpn, _)| *lpn)
            .collect();
        assert_eq!(moved.len(), 13);

        let outcome = ftl.run_gc(true, 0, &mut nand).unwrap();
        assert_eq!(
            outcome,
            GcOutcome::Reclaimed {
                line: 1,
                relocated: 13,
                invalid: 3
            }
        );

        let after = snapshot(&ftl);
        assert_eq!(after.len(), before.len());
        for lpn in &moved {
            let (old_ppa, old_stream) = before[lpn];
            let (new_ppa, new_stream) = after[lpn];
            assert_ne!(old_ppa, new_ppa);
            assert_eq!(new_ppa.line(), 2, "relocated into the GC line");
            assert_eq!(old_stream, new_stream);
        }
        for lpn in [2, 5, 11] {
            assert_eq!(before[&lpn], after[&lpn]);
        }

        let line = ftl.lines().line(1).unwrap();
        assert_eq!((line.vpc, line.ipc, line.state), (0, 0, LineState::Free));
        assert_eq!(ftl.lines().block(&Ppa::new(3, 0, 0, 1, 0)).unwrap().erase_cnt, 1);
        assert_eq!(ftl.stats().gc_pages, 13);
        assert_eq!(ftl.stats().erased_lines, 1);
        ftl.check_invariants().unwrap();
    }

    #[test]
    fn gc_traffic_is_attributed_to_background() {
        let mut nand = LatencyModel::default();
        let mut ftl = FtlPartition::new(0, &config(4)).unwrap();
        write_all(&mut ftl, 0..16, 0, &mut nand);
        write_all(&mut ftl, 0..4, 0, &mut nand);
        ftl.run_gc(true, 0, &mut nand).unwrap();

        let bg = nand.background();
        assert_eq!(bg.read_pages, 12);
        assert_eq!(bg.write_pages, 12);
    }

    #[test]
    fn gc_delay_disabled_skips_timing() {
        let mut cfg = config(4);
        cfg.gc_delay_enabled = false;
        let mut nand = LatencyModel::default();
        let mut ftl = FtlPartition::new(0, &cfg).unwrap();
        write_all(&mut ftl, 0..16, 0, &mut nand);
        write_all(&mut ftl, 0..4, 0, &mut nand);

        let ops = nand.nand_ops();
        ftl.run_gc(true, 0, &mut nand).unwrap();
        assert_eq!(nand.nand_ops(), ops);
        assert_eq!(nand.background().write_pages, 12);
    }

    #[test]
    fn opportunistic_pass_respects_cost_cap() {
        let mut nand = LatencyModel::default();
        let mut ftl = FtlPartition::new(0, &config(4)).unwrap();
        write_all(&mut ftl, 0..16, 0, &mut nand);
        // 13 live pages left: more than 16 / 8
        write_all(&mut ftl, 0..3, 1, &mut nand);
        assert_eq!(ftl.run_gc(false, 0, &mut nand).unwrap(), GcOutcome::NoWork);

        // 2 live pages left: cheap enough
        write_all(&mut ftl, 3..14, 1, &mut nand);
        assert!(matches!(
            ftl.run_gc(false, 0, &mut nand).unwrap(),
            GcOutcome::Reclaimed { line: 0, relocated: 2, invalid: 14 }
        ));
        ftl.check_invariants().unwrap();
    }

    #[test]
    fn credit_refill_equals_reclaimed_ipc() {
        let mut cfg = config(6);
        cfg.gc_thres_lines_high = 1;
        cfg.gc_thres_lines_low = 1;
        let mut nand = LatencyModel::default();
        let mut ftl = FtlPartition::new(0, &cfg).unwrap();

        write_all(&mut ftl, 0..16, 0, &mut nand);
        // free lines were above the watermark, quota unchanged
        assert_eq!(ftl.flow().credits(), 16);

        write_all(&mut ftl, 0..8, 0, &mut nand);
        assert_eq!(ftl.lines().line(0).unwrap().ipc, 8);
        write_all(&mut ftl, 16..24, 0, &mut nand);

        // line 3 filled, free dropped to 1, forced gc reclaimed line 0
        assert!(ftl.lines().is_free(0));
        assert_eq!(ftl.flow().refill_quota(), 8);
        assert_eq!(ftl.flow().credits(), 8);
        assert!(ftl.flow().credits() <= ftl.lines().pages_per_line());
        ftl.check_invariants().unwrap();
    }
}
