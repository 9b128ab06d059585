// src/counting/mod.rs

pub mod debounce;
pub mod hybrid_counter;

pub use debounce::{
    CounterPhase, DebounceController, DebounceTimer, FusionOutcome, IncrementEvent,
    ProposalOutcome,
};
pub use hybrid_counter::HybridCounter;
