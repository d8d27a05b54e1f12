//! The active stack and the step contract.
//!
//! A [`Stack`] holds one flavor-tagged component per capability slot.
//! Steps receive it through their [`StepContext`] and pattern-match the
//! component they need, failing with a capability mismatch when the slot
//! holds something else.

pub mod factory;
pub mod secrets;
pub mod stack;
pub mod step;
pub mod steps;

pub use secrets::InMemorySecretStore;
pub use stack::{
    ActiveAlerter, ActiveArtifactStore, ActiveDataValidator, ActiveModelDeployer, ActiveStore,
    Stack, StackComponent,
};
pub use step::{FnStep, Step, StepContext, StepInputs, invoke_step};
