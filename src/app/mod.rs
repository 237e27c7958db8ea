pub mod factory;

use crate::{config::Config, context::CategoryGraph, semantic::RetrievalService};
use std::sync::Arc;

pub use factory::{AppFactory, AppPaths};

/// A ready-to-use application: config, the loaded retrieval service and
/// the category graph.
pub struct App {
    pub config: Config,
    pub service: Arc<RetrievalService>,
    pub context: CategoryGraph,
}
