use crate::compile::BuildContext;
use crate::error::SimError;
use crate::id::{ClientKey, StationId};
use crate::model::DuplicateDescription;
use crate::replication::Replication;

use super::{Forward, Links, StationBehavior};

/// Moves clients to a named station without an edge.
#[derive(Debug, Clone)]
pub struct TeleportStation {
    pub destination: StationId,
}

impl TeleportStation {
    pub(crate) fn build(destination: &str, cx: &mut BuildContext<'_>) -> Self {
        Self {
            destination: cx.station(destination),
        }
    }
}

impl Links for TeleportStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.destination]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.destination]
    }
}

impl StationBehavior for TeleportStation {
    type State = ();

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) {}

    fn arrival(&self, rep: &mut Replication<'_>, _: &mut (), at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.release_to(at, client, self.destination);
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut (), _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.destination))
    }
}

/// Sends `copies` clients to every destination. The arriving client is the
/// first copy for the first destination.
#[derive(Debug, Clone)]
pub struct DuplicateStation {
    pub destinations: Vec<StationId>,
    pub copies: u32,
}

impl DuplicateStation {
    pub(crate) fn build(desc: &DuplicateDescription, cx: &mut BuildContext<'_>) -> Self {
        if desc.copies == 0 {
            cx.error("copies must be at least 1");
        }
        if desc.destinations.is_empty() {
            cx.error("duplicate station has no destinations");
        }
        Self {
            destinations: desc.destinations.iter().map(|d| cx.station(d)).collect(),
            copies: desc.copies,
        }
    }
}

impl Links for DuplicateStation {
    fn successors(&self) -> Vec<StationId> {
        self.destinations.clone()
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        self.destinations.iter_mut().collect()
    }
}

impl StationBehavior for DuplicateStation {
    type State = ();

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) {}

    fn arrival(&self, rep: &mut Replication<'_>, _: &mut (), at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.schedule_leave(at, client, 0);
        Ok(())
    }

    fn leave(&self, rep: &mut Replication<'_>, _: &mut (), _: StationId, client: ClientKey) -> Result<Forward, SimError> {
        let mut moves = Vec::with_capacity(self.destinations.len() * self.copies as usize);
        for &destination in &self.destinations {
            for _ in 0..self.copies {
                let copy = if moves.is_empty() {
                    client
                } else {
                    match rep.clone_client(client) {
                        Some(copy) => copy,
                        None => continue,
                    }
                };
                moves.push((copy, destination));
            }
        }
        Ok(Forward::Many(moves))
    }
}
