//! Test suite for the training pipeline
//!
//! Stub models and scripted data sources live in [`test_utils`]; the
//! remaining modules exercise checkpointing, evaluation, the epoch state
//! machine and full controller runs.

// Test modules
pub mod checkpoint_tests;
pub mod trainer_tests;


// Re-export commonly used test utilities
pub use test_utils::{
    create_test_device, create_test_inputs, create_test_loop, create_test_settings,
    history_epochs, read_rows, scalar_trial, DistanceModel, ScalarPairs, ScriptedTrials,
    TrialList,
};
