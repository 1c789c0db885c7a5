pub mod dependency_graph;
pub mod triplet;

pub use dependency_graph::{DependencyGraph, DependencyOutcome};
pub use triplet::{DbView, LocalView, ObjectKind, RemoteView, SyncTriplet};
