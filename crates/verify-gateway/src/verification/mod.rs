//! Per-request verification.

pub mod orchestrator;

pub use orchestrator::{
    UnauthenticatedReason, Verdict, VerificationOrchestrator, CACHE_CORRUPTION_MESSAGE,
};
