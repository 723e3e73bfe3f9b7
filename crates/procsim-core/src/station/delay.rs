use crate::client::TimeBucket;
use crate::compile::BuildContext;
use crate::error::SimError;
use crate::id::{ClientKey, StationId};
use crate::model::DelayDescription;
use crate::param::TypedTime;
use crate::replication::Replication;

use super::{Forward, Links, StationBehavior};

/// Holds every client for a sampled time, without capacity limits.
#[derive(Debug, Clone)]
pub struct DelayStation {
    pub time: TypedTime,
    /// Bucket the delay is booked to.
    pub bucket: TimeBucket,
    pub next: StationId,
}

impl DelayStation {
    pub(crate) fn build(desc: &DelayDescription, cx: &mut BuildContext<'_>) -> Self {
        Self {
            time: cx.typed_time(&desc.time),
            bucket: desc.bucket,
            next: cx.next(desc.next),
        }
    }
}

impl Links for DelayStation {
    fn successors(&self) -> Vec<StationId> {
        vec![self.next]
    }

    fn links_mut(&mut self) -> Vec<&mut StationId> {
        vec![&mut self.next]
    }
}

impl StationBehavior for DelayStation {
    type State = ();

    fn init_state(&self, _: &mut Replication<'_>, _: StationId) {}

    fn arrival(&self, rep: &mut Replication<'_>, _: &mut (), at: StationId, client: ClientKey) -> Result<(), SimError> {
        let duration = rep.sample_typed(&self.time, client, at);
        rep.book(client, self.bucket, duration);
        if self.bucket == TimeBucket::Process {
            rep.record_process(at, duration);
        }
        rep.release_after(at, client, self.next, duration);
        Ok(())
    }

    fn leave(&self, _: &mut Replication<'_>, _: &mut (), _: StationId, _: ClientKey) -> Result<Forward, SimError> {
        Ok(Forward::To(self.next))
    }
}
