use std::collections::{BTreeSet, VecDeque};

use crate::address::{AddressSpace, Ppa};
use crate::config::{BaseType, Counter, LineId, StreamId};
use crate::error::{FtlError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageStatus {
    Free,
    Valid,
    Invalid,
}

#[derive(Clone, Copy, Debug)]
pub struct Page {
    pub status: PageStatus,
    /// Stream that last programmed this page.
    pub stream: StreamId,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            status: PageStatus::Free,
            stream: 0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub vpc: Counter,
    pub ipc: Counter,
    pub erase_cnt: Counter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineState {
    Free,
    /// Bound to a write pointer.
    Open,
    Victim,
    Full,
    /// Popped as a GC victim, being relocated and erased.
    Reclaiming,
}

#[derive(Clone, Debug)]
pub struct Line {
    pub id: LineId,
    pub vpc: Counter,
    pub ipc: Counter,
    pub state: LineState,
}

impl Line {
    fn new(id: LineId) -> Self {
        Line {
            id,
            vpc: 0,
            ipc: 0,
            state: LineState::Free,
        }
    }
}

/// Owns every line of a partition together with its page and block accounting.
///
/// Membership is tracked by owned containers: a FIFO of free line ids, a set
/// of full line ids and a victim set ordered by `(vpc, id)`, so the first
/// entry is always the line with the fewest live pages (lowest id on ties).
pub struct LineManager {
    space: AddressSpace,
    pages_per_line: Counter,
    pages: Vec<Page>,
    blocks: Vec<Block>,
    lines: Vec<Line>,
    free_lines: VecDeque<LineId>,
    victim_lines: BTreeSet<(Counter, LineId)>,
    full_lines: BTreeSet<LineId>,
}

impl LineManager {
    pub fn new(space: AddressSpace) -> Self {
        let geo = *space.geometry();
        let total_lines = geo.total_lines();

        LineManager {
            pages_per_line: geo.pages_per_line(),
            pages: vec![Page::default(); space.total_pages()],
            blocks: vec![Block::default(); space.total_blocks()],
            lines: (0..total_lines).map(Line::new).collect(),
            free_lines: (0..total_lines).collect(),
            victim_lines: BTreeSet::new(),
            full_lines: BTreeSet::new(),
            space,
        }
    }

    pub fn pages_per_line(&self) -> Counter {
        self.pages_per_line
    }

    pub fn total_lines(&self) -> BaseType {
        self.lines.len()
    }

    pub fn free_line_count(&self) -> BaseType {
        self.free_lines.len()
    }

    pub fn victim_line_count(&self) -> BaseType {
        self.victim_lines.len()
    }

    pub fn full_line_count(&self) -> BaseType {
        self.full_lines.len()
    }

    pub fn line(&self, id: LineId) -> Result<&Line> {
        self.lines
            .get(id)
            .ok_or_else(|| FtlError::accounting(id, "no such line"))
    }

    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.lines.iter()
    }

    pub fn page(&self, ppa: &Ppa) -> Result<&Page> {
        Ok(&self.pages[self.space.page_index(ppa)?])
    }

    pub fn block(&self, ppa: &Ppa) -> Result<&Block> {
        Ok(&self.blocks[self.space.block_index(ppa)?])
    }

    pub fn is_free(&self, id: LineId) -> bool {
        self.free_lines.contains(&id)
    }

    pub fn is_full(&self, id: LineId) -> bool {
        self.full_lines.contains(&id)
    }

    pub fn is_victim(&self, id: LineId) -> bool {
        self.lines
            .get(id)
            .map_or(false, |l| self.victim_lines.contains(&(l.vpc, id)))
    }

    pub fn acquire_free_line(&mut self) -> Result<LineId> {
        let id = self.free_lines.pop_front().ok_or(FtlError::NoFreeLine)?;
        let line = &mut self.lines[id];
        debug_assert_eq!((line.vpc, line.ipc), (0, 0), "free line {} carries pages", id);
        line.state = LineState::Open;
        Ok(id)
    }

    /// Retires an exhausted open line: untouched lines go to the full list,
    /// lines with invalidations become GC candidates.
    pub fn close_line(&mut self, id: LineId) -> Result<LineState> {
        let ppl = self.pages_per_line;
        let line = self
            .lines
            .get_mut(id)
            .ok_or_else(|| FtlError::accounting(id, "no such line"))?;
        if line.state != LineState::Open {
            return Err(FtlError::accounting(
                id,
                format!("closing a line in state {:?}", line.state),
            ));
        }
        if line.vpc + line.ipc != ppl {
            return Err(FtlError::accounting(
                id,
                format!("closing with vpc {} ipc {} of {}", line.vpc, line.ipc, ppl),
            ));
        }

        if line.vpc == ppl {
            line.state = LineState::Full;
            self.full_lines.insert(id);
        } else {
            line.state = LineState::Victim;
            self.victim_lines.insert((line.vpc, id));
        }
        Ok(line.state)
    }

    /// Best reclaim candidate: the victim with the fewest live pages.
    pub fn peek_victim(&self) -> Option<&Line> {
        self.victim_lines.first().map(|&(_, id)| &self.lines[id])
    }

    /// Pops the best candidate. A non-forced pass declines when relocating
    /// it would cost more than 1/8 of a line.
    pub fn select_victim(&mut self, force: bool) -> Option<LineId> {
        let &(vpc, id) = self.victim_lines.first()?;
        if !force && vpc > self.pages_per_line / 8 {
            return None;
        }
        self.victim_lines.remove(&(vpc, id));
        self.lines[id].state = LineState::Reclaiming;
        Some(id)
    }

    pub fn mark_page_invalid(&mut self, ppa: &Ppa) -> Result<()> {
        let pidx = self.space.page_index(ppa)?;
        let found = self.pages[pidx].status;
        if found != PageStatus::Valid {
            return Err(FtlError::PageState {
                ppa: *ppa,
                expected: PageStatus::Valid,
                found,
            });
        }
        let line = &self.lines[ppa.line()];
        if line.state == LineState::Free {
            return Err(FtlError::accounting(line.id, "valid page inside a free line"));
        }
        if line.vpc == 0 || line.ipc >= self.pages_per_line {
            return Err(FtlError::accounting(
                line.id,
                format!("invalidating with vpc {} ipc {}", line.vpc, line.ipc),
            ));
        }

        self.pages[pidx].status = PageStatus::Invalid;
        let block = &mut self.blocks[pidx / self.space.geometry().pages_per_block];
        debug_assert!(block.vpc > 0 && block.ipc < self.space.geometry().pages_per_block);
        block.vpc -= 1;
        block.ipc += 1;

        let line = &mut self.lines[ppa.line()];
        match line.state {
            LineState::Victim => {
                self.victim_lines.remove(&(line.vpc, line.id));
                line.vpc -= 1;
                line.ipc += 1;
                self.victim_lines.insert((line.vpc, line.id));
            }
            LineState::Full => {
                // first invalidation makes a full line reclaimable
                self.full_lines.remove(&line.id);
                line.vpc -= 1;
                line.ipc += 1;
                line.state = LineState::Victim;
                self.victim_lines.insert((line.vpc, line.id));
            }
            LineState::Open | LineState::Reclaiming | LineState::Free => {
                line.vpc -= 1;
                line.ipc += 1;
            }
        }
        Ok(())
    }

    pub fn mark_page_valid(&mut self, ppa: &Ppa, stream: StreamId) -> Result<()> {
        let pidx = self.space.page_index(ppa)?;
        let line = &mut self.lines[ppa.line()];
        if line.state != LineState::Open {
            return Err(FtlError::accounting(
                line.id,
                format!("programming a line in state {:?}", line.state),
            ));
        }

        let page = &mut self.pages[pidx];
        if page.status != PageStatus::Free {
            return Err(FtlError::PageState {
                ppa: *ppa,
                expected: PageStatus::Free,
                found: page.status,
            });
        }
        page.status = PageStatus::Valid;
        page.stream = stream;

        let block = &mut self.blocks[pidx / self.space.geometry().pages_per_block];
        debug_assert!(block.vpc + block.ipc < self.space.geometry().pages_per_block);
        block.vpc += 1;

        debug_assert!(line.vpc + line.ipc < self.pages_per_line);
        line.vpc += 1;
        Ok(())
    }

    /// Erases the block containing `ppa`.
    pub fn mark_block_free(&mut self, ppa: &Ppa) -> Result<()> {
        let bidx = self.space.block_index(ppa)?;
        let ppb = self.space.geometry().pages_per_block;
        let block = &mut self.blocks[bidx];
        if block.vpc != 0 {
            return Err(FtlError::EraseLiveBlock(*ppa));
        }

        for page in &mut self.pages[bidx * ppb..(bidx + 1) * ppb] {
            *page = Page::default();
        }

        let line = &mut self.lines[ppa.line()];
        if line.ipc < block.ipc {
            return Err(FtlError::accounting(line.id, "block ipc exceeds line ipc"));
        }
        line.ipc -= block.ipc;
        block.ipc = 0;
        block.erase_cnt += 1;
        Ok(())
    }

    /// Returns a fully erased victim to the free list.
    pub fn release_line(&mut self, id: LineId) -> Result<()> {
        let line = &mut self.lines[id];
        if line.state != LineState::Reclaiming || line.vpc != 0 || line.ipc != 0 {
            return Err(FtlError::accounting(
                id,
                format!(
                    "releasing a {:?} line with vpc {} ipc {}",
                    line.state, line.vpc, line.ipc
                ),
            ));
        }
        line.state = LineState::Free;
        self.free_lines.push_back(id);
        Ok(())
    }

    /// Cross-checks line membership and counters against block accounting.
    pub fn check_invariants(&self) -> Result<()> {
        for line in &self.lines {
            let id = line.id;
            if line.vpc > self.pages_per_line || line.ipc > self.pages_per_line {
                return Err(FtlError::accounting(id, "counter above line capacity"));
            }

            let (vpc, ipc) = self
                .space
                .line_blocks(id)
                .map(|ppa| self.block(&ppa).map(|b| (b.vpc, b.ipc)))
                .try_fold((0, 0), |acc, b| b.map(|(v, i)| (acc.0 + v, acc.1 + i)))?;
            if (vpc, ipc) != (line.vpc, line.ipc) {
                return Err(FtlError::accounting(
                    id,
                    format!("blocks sum to vpc {} ipc {}, line says {} {}", vpc, ipc, line.vpc, line.ipc),
                ));
            }

            let free = self.is_free(id);
            let full = self.is_full(id);
            let victim = self.is_victim(id);
            let consistent = match line.state {
                LineState::Free => free && !full && !victim && line.vpc == 0 && line.ipc == 0,
                LineState::Full => full && !free && !victim && line.vpc == self.pages_per_line,
                LineState::Victim => victim && !free && !full,
                LineState::Open | LineState::Reclaiming => !free && !full && !victim,
            };
            if !consistent {
                return Err(FtlError::accounting(
                    id,
                    format!("membership disagrees with state {:?}", line.state),
                ));
            }
        }
        Ok(())
    }
}
