//! Project model synchronization from a build server.
//!
//! A [`ProjectDetailsCollector`] asks the server for one consistent [`ProjectDetails`] snapshot.
//! The [`MagicMetaModel`] tracks which of its targets are materialized as workspace modules and
//! hands out [`MagicMetaModelDiff`]s for the host to apply. [`SyncTask`] ties the two together
//! and keeps at most one collection in flight.

pub mod collector;
pub mod diff;
mod error;
pub mod magic_model;
mod model;
pub mod module;
pub mod module_details;
pub mod progress;
pub mod resolver;
pub mod strategy;
pub mod sync;
pub mod tasks;
pub mod transform;

pub use collector::{CollectorOptions, CollectorState, ProjectDetailsCollector};
pub use diff::{InMemoryWorkspace, MagicMetaModelDiff, WorkspaceSink};
pub use error::SyncError;
pub use magic_model::{
    CompilableNonOverlapping, DefaultTargetsPolicy, DocumentTargetsDetails, LoadedTargetsListener,
    MagicMetaModel, MagicMetaModelOptions, OverlapGraph,
};
pub use model::{ModuleDetails, ProjectDetails};
pub use module::{Library, Module};
pub use module_details::ModuleDetailsTransformer;
pub use progress::{Progress, ProgressEvent, ProgressSender};
pub use strategy::{ModuleNameProvider, StrategyTable};
pub use sync::SyncTask;
pub use tasks::{TaskOutcome, TaskRunner, TaskStatus};
pub use transform::{ModuleTransformer, TransformContext};
