//! Image version resolution of workload components.
//!
//! Every reconcile pass builds one [`Updater`] per component. [`determine_source`]
//! picks the strategy the component's image comes from and [`VersionReconciler`]
//! either skips the component or resolves its image and rewrites the component's
//! `VersionStatus` in one step.

mod reconciler;
mod source;
mod updater;

pub use reconciler::VersionReconciler;
pub use source::determine_source;
pub use updater::{ComponentUpdater, Updater};
