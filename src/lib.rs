// Public library interface for gce-disk-claim
//
// Moves a zonal persistent disk from whichever instance holds it to the
// instance this code runs on. The binaries are thin wrappers around `cli`.

pub mod cli;
pub mod compute;
pub mod config;
pub mod error;
pub mod locator;
pub mod logging;
pub mod orchestrator;
pub mod waiter;

pub use compute::{ComputeApi, Location, RestCompute};
pub use error::{ClaimError, claim_error};
pub use orchestrator::{ClaimConfig, ClaimReport, HolderPolicy, Orchestrator, Plan};
pub use waiter::{OperationWaiter, WaitPolicy};
