//! Running independent replications of one network.

use tracing::info;

use crate::config::{ConfigError, RunConfig};
use crate::network::Network;
use crate::replication::Replication;
use crate::stats::ReplicationStatistics;

/// Run `config.replications` replications and return their statistics in
/// replication order. Replications share nothing but the network; with the
/// `parallel` feature they run on the rayon pool.
pub fn run_replications(net: &Network, config: &RunConfig) -> Result<Vec<ReplicationStatistics>, ConfigError> {
    config.validate()?;
    info!(
        model = %net.name,
        replications = config.replications,
        seed = config.seed,
        "running replications"
    );
    let run_one = |index: u32| Replication::new(net, config.clone(), index).run();

    #[cfg(feature = "parallel")]
    let results = {
        use rayon::prelude::*;
        (0..config.replications).into_par_iter().map(run_one).collect()
    };
    #[cfg(not(feature = "parallel"))]
    let results = (0..config.replications).map(run_one).collect();

    Ok(results)
}
