use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stage slots of a deck graph. Each stage has one input port and one
/// output port; `Source` has no input and `Bus` has no output.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum StageKind {
    Source,
    Tone,
    Stretch,
    Gain,
    Bus,
}

impl StageKind {
    fn has_output(self) -> bool {
        self != StageKind::Bus
    }

    fn has_input(self) -> bool {
        self != StageKind::Source
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WiringError {
    #[error("{0} has no such port")]
    NoSuchPort(StageKind),
    #[error("{0} output already connected")]
    OutputInUse(StageKind),
    #[error("{0} input already connected")]
    InputInUse(StageKind),
    #[error("{0} is not connected to {1}")]
    NotConnected(StageKind, StageKind),
}

/// Directed output -> input connections of one deck.
#[derive(Debug, Default, Clone)]
pub(crate) struct Wiring {
    edges: Vec<(StageKind, StageKind)>,
}

impl Wiring {
    pub(crate) fn connect(&mut self, from: StageKind, to: StageKind) -> Result<(), WiringError> {
        if !from.has_output() {
            return Err(WiringError::NoSuchPort(from));
        }
        if !to.has_input() {
            return Err(WiringError::NoSuchPort(to));
        }
        if self.downstream(from).is_some() {
            return Err(WiringError::OutputInUse(from));
        }
        if self.upstream(to).is_some() {
            return Err(WiringError::InputInUse(to));
        }
        self.edges.push((from, to));
        Ok(())
    }

    /// Removes the edge leaving `from`. Disconnecting an unconnected port
    /// is not an error.
    pub(crate) fn disconnect(&mut self, from: StageKind) -> bool {
        let before = self.edges.len();
        self.edges.retain(|(src, _)| *src != from);
        before != self.edges.len()
    }

    pub(crate) fn disconnect_all(&mut self) {
        self.edges.clear();
    }

    pub(crate) fn downstream(&self, from: StageKind) -> Option<StageKind> {
        self.edges
            .iter()
            .find(|(src, _)| *src == from)
            .map(|(_, dst)| *dst)
    }

    fn upstream(&self, to: StageKind) -> Option<StageKind> {
        self.edges
            .iter()
            .find(|(_, dst)| *dst == to)
            .map(|(src, _)| *src)
    }

    /// Splices `stage` into the existing `upstream -> downstream` edge.
    /// On error the wiring is left as it was.
    pub(crate) fn insert_between(
        &mut self,
        upstream: StageKind,
        stage: StageKind,
        downstream: StageKind,
    ) -> Result<(), WiringError> {
        if self.downstream(upstream) != Some(downstream) {
            return Err(WiringError::NotConnected(upstream, downstream));
        }
        let snapshot = self.edges.clone();
        self.disconnect(upstream);
        let spliced = self
            .connect(upstream, stage)
            .and_then(|_| self.connect(stage, downstream));
        if spliced.is_err() {
            self.edges = snapshot;
        }
        spliced
    }

    /// Stages reached by following edges from `Source`. Ends at `Bus` when
    /// the chain is complete.
    pub(crate) fn chain(&self) -> Vec<StageKind> {
        let mut chain = vec![StageKind::Source];
        let mut current = StageKind::Source;
        while let Some(next) = self.downstream(current) {
            if chain.contains(&next) {
                break;
            }
            chain.push(next);
            current = next;
        }
        chain
    }

    pub(crate) fn reaches_bus(&self) -> bool {
        self.chain().last() == Some(&StageKind::Bus)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
