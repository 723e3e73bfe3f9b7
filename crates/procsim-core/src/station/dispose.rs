use crate::error::SimError;
use crate::id::{ClientKey, StationId};
use crate::replication::Replication;

use super::{Forward, Links, StationBehavior};

/// Removes clients from the system and records their statistics.
#[derive(Debug, Clone, Default)]
pub struct DisposeStation {
    /// End the replication when a client gets here.
    pub stop_simulation: bool,
}

impl Links for DisposeStation {
    fn successors(&self) -> Vec<StationId> {
        Vec::new()
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        Vec::new()
    }
}

impl StationBehavior for DisposeStation {
    type State = ();

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) {}

    fn arrival(&self, rep: &mut Replication<'_>, _: &mut (), at: StationId, client: ClientKey) -> Result<(), SimError> {
        rep.dispose_client(at, client);
        if self.stop_simulation {
            rep.terminate("dispose station reached");
        }
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut (), _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::Consumed)
    }
}
