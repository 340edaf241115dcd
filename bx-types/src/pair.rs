use crate::workload::Workload;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairError {
    #[error("tx workload name {0:?} does not start with \"tx\"")]
    BadTxName(String),
    #[error("rx workload name {0:?} is not the tx→rx substitution of {1:?}")]
    NameMismatch(String, String),
}

/// An ordered (TX, RX) tuple. `tx.name` begins with `tx`; `rx.name` is the
/// same string with the leading `tx` replaced by `rx` (I: Pair).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    tx: Workload,
    rx: Workload,
}

impl Pair {
    pub fn new(tx: Workload, rx: Workload) -> Result<Self, PairError> {
        let expected_rx = tx
            .name()
            .strip_prefix("tx")
            .map(|suffix| format!("rx{suffix}"))
            .ok_or_else(|| PairError::BadTxName(tx.name().to_string()))?;
        if rx.name() != expected_rx {
            return Err(PairError::NameMismatch(
                rx.name().to_string(),
                tx.name().to_string(),
            ));
        }
        Ok(Pair { tx, rx })
    }

    pub fn tx(&self) -> &Workload {
        &self.tx
    }

    pub fn rx(&self) -> &Workload {
        &self.rx
    }

    /// `<tx>-<rx>`, the artifact subdirectory name for this pair (§4.8).
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.tx.name(), self.rx.name())
    }
}

/// Sorts workload names lexicographically, splits into tx/rx groups, and
/// pairs by index. Mirrors C1's topology-resolution pairing rule.
pub fn pair_by_index(mut workloads: Vec<Workload>) -> Result<Vec<Pair>, PairError> {
    workloads.sort_by(|a, b| a.name().cmp(b.name()));
    let (tx, rx): (Vec<_>, Vec<_>) = workloads.into_iter().partition(|w| w.is_tx());

    let mut tx = tx;
    let mut rx = rx;
    tx.sort_by(|a, b| a.name().cmp(b.name()));
    rx.sort_by(|a, b| a.name().cmp(b.name()));

    tx.into_iter()
        .zip(rx)
        .map(|(t, r)| Pair::new(t, r))
        .collect()
}
