/// Interfaces Layer - External Entry Points
///
/// This layer contains the process-level entry points of a node.
///
/// ## Modules
/// - `cli`: Command-line interface (main.rs logic)
/// - `tools`: Random bid generation shared by the simulated agents and the
///   `agent_simulator` binary

pub mod cli;
pub mod tools;
