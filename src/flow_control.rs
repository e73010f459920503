use crate::config::Counter;

/// Write-credit budget coupling host writes to GC throughput.
///
/// Every committed host page costs one credit. Once the budget is spent the
/// owner runs a forced GC pass and refills by the invalid-page count of the
/// line it reclaimed, so host throughput never outruns reclamation.
#[derive(Debug, Clone)]
pub struct FlowController {
    credits: Counter,
    refill_quota: Counter,
}

impl FlowController {
    pub fn new(pages_per_line: Counter) -> Self {
        FlowController {
            credits: pages_per_line,
            refill_quota: pages_per_line,
        }
    }

    pub fn credits(&self) -> Counter {
        self.credits
    }

    pub fn refill_quota(&self) -> Counter {
        self.refill_quota
    }

    pub fn exhausted(&self) -> bool {
        self.credits == 0
    }

    pub fn consume(&mut self) {
        debug_assert!(self.credits > 0, "write admitted without credit");
        self.credits = self.credits.saturating_sub(1);
    }

    /// Records the invalid-page count of the line GC just reclaimed.
    pub fn set_refill_quota(&mut self, reclaimed_ipc: Counter) {
        debug_assert!(reclaimed_ipc > 0);
        self.refill_quota = reclaimed_ipc;
    }

    /// Adds the current quota and returns it.
    pub fn refill(&mut self) -> Counter {
        self.credits += self.refill_quota;
        self.refill_quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_one_line_of_credit() {
        let flow = FlowController::new(16);
        assert_eq!(flow.credits(), 16);
        assert_eq!(flow.refill_quota(), 16);
        assert!(!flow.exhausted());
    }

    #[test]
    fn consume_until_exhausted_then_refill() {
        let mut flow = FlowController::new(4);
        for _ in 0..4 {
            flow.consume();
        }
        assert!(flow.exhausted());

        flow.set_refill_quota(3);
        assert_eq!(flow.refill(), 3);
        assert_eq!(flow.credits(), 3);
    }

    #[test]
    fn quota_persists_across_refills() {
        let mut flow = FlowController::new(8);
        flow.set_refill_quota(2);
        for _ in 0..8 {
            flow.consume();
        }
        flow.refill();
        flow.consume();
        flow.consume();
        assert_eq!(flow.refill(), 2);
        assert_eq!(flow.credits(), 2);
    }
}
