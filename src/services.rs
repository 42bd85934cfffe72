//! External collaborators the master drives but does not implement: the
//! chain node, the search cluster, and the queue broker.

pub mod broker;
pub mod chain;
pub mod errlog;
pub mod search;

use std::sync::Arc;

/// Bundle of collaborator clients handed to the controller.
#[derive(Clone)]
pub struct Services {
    pub chain: Arc<dyn chain::ChainClient>,
    pub search: Arc<dyn search::SearchCluster>,
    pub broker: Arc<dyn broker::QueueBroker>,
}
