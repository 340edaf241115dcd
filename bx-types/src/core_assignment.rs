use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreAssignmentError {
    #[error("need at least 2 cores, have {0}")]
    InsufficientCores(usize),
    #[error("latency mode needs at least 5 cores, have {0}")]
    InsufficientCoresForLatency(usize),
    #[error("tx_num_core override {requested} exceeds available tx cores ({available})")]
    ExplicitTxCoreExceedsAvailable { requested: usize, available: usize },
}

/// `(main, tx_cores, rx_cores)` for one workload. `main` is never a member
/// of either side; `tx_cores` and `rx_cores` are disjoint except in the
/// degenerate 2-core case, where the single non-main core is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreAssignment {
    main: u32,
    tx_cores: Vec<u32>,
    rx_cores: Vec<u32>,
    /// Set only by `split_latency`: each side split again, bound to port 0
    /// and port 1.
    latency_ports: Option<LatencyPorts>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LatencyPorts {
    tx_port0: Vec<u32>,
    tx_port1: Vec<u32>,
    rx_port0: Vec<u32>,
    rx_port1: Vec<u32>,
}

/// Splits `cores` into two halves, rounded down; any odd remainder is
/// dropped (left idle), mirroring the unidirectional split's handling of a
/// leftover core.
fn split_in_half(cores: &[u32]) -> (Vec<u32>, Vec<u32>) {
    let h = cores.len() / 2;
    (cores[..h].to_vec(), cores[h..2 * h].to_vec())
}

impl CoreAssignment {
    /// Computes the unidirectional-mode split of §4.4: `main = cores[0]`,
    /// the remaining `u = C - 1` cores halve (rounded down) into tx/rx
    /// ranges, with any leftover core left idle. `C == 2` assigns the lone
    /// remaining core to both sides — preserved exactly as specified, not a
    /// bug.
    pub fn split_unidirectional(cores: &[u32]) -> Result<Self, CoreAssignmentError> {
        let c = cores.len();
        if c < 2 {
            return Err(CoreAssignmentError::InsufficientCores(c));
        }
        let main = cores[0];
        let rest = &cores[1..];

        if c == 2 {
            return Ok(CoreAssignment {
                main,
                tx_cores: vec![rest[0]],
                rx_cores: vec![rest[0]],
                latency_ports: None,
            });
        }

        let u = rest.len();
        let h = u / 2;
        let tx_cores = rest[0..h].to_vec();
        let rx_cores = rest[h..2 * h].to_vec();
        Ok(CoreAssignment {
            main,
            tx_cores,
            rx_cores,
            latency_ports: None,
        })
    }

    /// Latency mode requires `C >= 5`. `tx_cores` and `rx_cores` are each
    /// split again in half, bound to port 0 / port 1.
    pub fn split_latency(cores: &[u32]) -> Result<Self, CoreAssignmentError> {
        let c = cores.len();
        if c < 5 {
            return Err(CoreAssignmentError::InsufficientCoresForLatency(c));
        }
        let mut base = Self::split_unidirectional(cores)?;
        let (tx_port0, tx_port1) = split_in_half(&base.tx_cores);
        let (rx_port0, rx_port1) = split_in_half(&base.rx_cores);
        base.latency_ports = Some(LatencyPorts {
            tx_port0,
            tx_port1,
            rx_port0,
            rx_port1,
        });
        Ok(base)
    }

    /// `(port0, port1)` tx-core halves; only set for `split_latency` output.
    pub fn tx_cores_by_port(&self) -> Option<(&[u32], &[u32])> {
        self.latency_ports
            .as_ref()
            .map(|p| (p.tx_port0.as_slice(), p.tx_port1.as_slice()))
    }

    /// `(port0, port1)` rx-core halves; only set for `split_latency` output.
    pub fn rx_cores_by_port(&self) -> Option<(&[u32], &[u32])> {
        self.latency_ports
            .as_ref()
            .map(|p| (p.rx_port0.as_slice(), p.rx_port1.as_slice()))
    }

    pub fn main(&self) -> u32 {
        self.main
    }

    pub fn tx_cores(&self) -> &[u32] {
        &self.tx_cores
    }

    pub fn rx_cores(&self) -> &[u32] {
        &self.rx_cores
    }

    /// True when this is the degenerate 2-core case (tx/rx share one core).
    pub fn is_shared(&self) -> bool {
        self.tx_cores.len() == 1 && self.tx_cores == self.rx_cores
    }

    /// Truncates `tx_cores` to exactly `n`, leaving the dropped cores idle.
    /// Recomputes the port halves if this assignment came from
    /// `split_latency`, so the two stay consistent. Rejects `n` exceeding
    /// the computed tx-core count instead of silently no-op'ing, matching
    /// the receiver side's explicit-count rejection.
    pub fn truncate_tx(&mut self, n: usize) -> Result<(), CoreAssignmentError> {
        if n > self.tx_cores.len() {
            return Err(CoreAssignmentError::ExplicitTxCoreExceedsAvailable {
                requested: n,
                available: self.tx_cores.len(),
            });
        }
        self.tx_cores.truncate(n);
        if self.latency_ports.is_some() {
            self.recompute_latency_ports();
        }
        Ok(())
    }

    fn recompute_latency_ports(&mut self) {
        let (tx_port0, tx_port1) = split_in_half(&self.tx_cores);
        let (rx_port0, rx_port1) = split_in_half(&self.rx_cores);
        self.latency_ports = Some(LatencyPorts {
            tx_port0,
            tx_port1,
            rx_port0,
            rx_port1,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_single_core() {
        assert_eq!(
            CoreAssignment::split_unidirectional(&[1]).unwrap_err(),
            CoreAssignmentError::InsufficientCores(1)
        );
    }

    #[test]
    fn degenerate_two_core_shares() {
        let a = CoreAssignment::split_unidirectional(&[0, 1]).unwrap();
        assert_eq!(a.main(), 0);
        assert_eq!(a.tx_cores(), &[1]);
        assert_eq!(a.rx_cores(), &[1]);
        assert!(a.is_shared());
    }

    #[test]
    fn five_cores_splits_two_and_two_with_one_idle() {
        let a = CoreAssignment::split_unidirectional(&[0, 1, 2, 3, 4]).unwrap();
        assert_eq!(a.main(), 0);
        assert_eq!(a.tx_cores(), &[1, 2]);
        assert_eq!(a.rx_cores(), &[3, 4]);
    }

    #[test]
    fn main_never_in_either_side() {
        let a = CoreAssignment::split_unidirectional(&[7, 1, 2, 3, 4, 5]).unwrap();
        assert!(!a.tx_cores().contains(&a.main()));
        assert!(!a.rx_cores().contains(&a.main()));
    }

    #[test]
    fn latency_mode_requires_five_cores() {
        assert_eq!(
            CoreAssignment::split_latency(&[0, 1, 2, 3]).unwrap_err(),
            CoreAssignmentError::InsufficientCoresForLatency(4)
        );
        assert!(CoreAssignment::split_latency(&[0, 1, 2, 3, 4]).is_ok());
    }

    #[test]
    fn latency_mode_splits_each_side_by_port() {
        // 9 cores: main=0, rest=8 -> tx=[1,2,3,4], rx=[5,6,7,8]
        let a = CoreAssignment::split_latency(&[0, 1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let (tx0, tx1) = a.tx_cores_by_port().unwrap();
        let (rx0, rx1) = a.rx_cores_by_port().unwrap();
        assert_eq!(tx0, &[1, 2]);
        assert_eq!(tx1, &[3, 4]);
        assert_eq!(rx0, &[5, 6]);
        assert_eq!(rx1, &[7, 8]);
    }

    #[test]
    fn unidirectional_split_has_no_latency_ports() {
        let a = CoreAssignment::split_unidirectional(&[0, 1, 2, 3, 4]).unwrap();
        assert!(a.tx_cores_by_port().is_none());
    }

    #[test]
    fn truncate_tx_drops_trailing_cores() {
        let mut a = CoreAssignment::split_unidirectional(&[0, 1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(a.tx_cores(), &[1, 2, 3]);
        a.truncate_tx(1).unwrap();
        assert_eq!(a.tx_cores(), &[1]);
        assert_eq!(a.rx_cores(), &[4, 5, 6]);
    }

    #[test]
    fn truncate_tx_recomputes_latency_ports() {
        let mut a = CoreAssignment::split_latency(&[0, 1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        a.truncate_tx(2).unwrap();
        let (tx0, tx1) = a.tx_cores_by_port().unwrap();
        assert_eq!(tx0, &[1]);
        assert_eq!(tx1, &[2]);
    }

    #[test]
    fn truncate_tx_rejects_count_exceeding_available() {
        let mut a = CoreAssignment::split_unidirectional(&[0, 1, 2, 3, 4]).unwrap();
        assert_eq!(a.tx_cores(), &[1, 2]);
        assert_eq!(
            a.truncate_tx(99).unwrap_err(),
            CoreAssignmentError::ExplicitTxCoreExceedsAvailable {
                requested: 99,
                available: 2
            }
        );
        // rejected override leaves the assignment untouched.
        assert_eq!(a.tx_cores(), &[1, 2]);
    }
}
