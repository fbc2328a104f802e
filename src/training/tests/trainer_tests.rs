//! Tests for the epoch state machine

use anyhow::Result;
use tempfile::TempDir;
use tokio::sync::mpsc;

use super::test_utils::{
    create_test_loop, create_test_settings, history_epochs, read_rows, ScalarPairs, ScriptedTrials,
};
use crate::error::{Error, Phase};
use crate::training::checkpoints::CheckpointStore;
use crate::training::events::TrainingEvent;
use crate::training::logs::{TRAIN_LOG, VALID_LOG};
use crate::training::trainer::{StopReason, TrainingStatus};

#[test]
fn test_early_stop_after_patience() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut settings = create_test_settings(20);
    settings.train_patience = 3;

    let mut training = create_test_loop(
        temp_dir.path(),
        settings,
        ScalarPairs::new(2, 4),
        ScriptedTrials::constant(5),
    );
    let outcome = training.run()?;

    assert_eq!(outcome.epochs_run, 4);
    assert_eq!(outcome.stop_reason, StopReason::EarlyStopped);
    assert_eq!(outcome.best_epoch, 0);
    assert_eq!(outcome.best_score, 0.5);
    assert_eq!(training.status(), TrainingStatus::Stopped);
    assert_eq!(training.epochs_without_improvement(), 3);

    // epoch 0 was the best; the stopping epoch is not checkpointed
    assert_eq!(history_epochs(temp_dir.path()), vec![1]);
    Ok(())
}

#[test]
fn test_checkpoint_cadence() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut training = create_test_loop(
        temp_dir.path(),
        create_test_settings(12),
        ScalarPairs::new(1, 2),
        ScriptedTrials::constant(5),
    );
    let outcome = training.run()?;

    assert_eq!(outcome.epochs_run, 12);
    assert_eq!(outcome.next_epoch, 12);
    assert_eq!(outcome.stop_reason, StopReason::Completed);

    // best at epoch 0, cadence at 5 and 10, final epoch 11; tags are the next epoch
    assert_eq!(history_epochs(temp_dir.path()), vec![1, 6, 11, 12]);

    let best = CheckpointStore::new(temp_dir.path().join("models")).load(true)?;
    assert_eq!(best.epoch, 1);
    assert_eq!(best.best_epoch, 0);
    Ok(())
}

#[test]
fn test_improvements_update_best_record() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut training = create_test_loop(
        temp_dir.path(),
        create_test_settings(4),
        ScalarPairs::new(1, 2),
        ScriptedTrials::new(vec![3, 5, 4, 7]),
    );
    let outcome = training.run()?;

    assert_eq!(outcome.best_epoch, 3);
    assert_eq!(outcome.best_score, 0.7);
    let best_so_far: Vec<f64> = outcome.history.iter().map(|m| m.best_accuracy).collect();
    assert_eq!(best_so_far, vec![0.3, 0.5, 0.5, 0.7]);

    assert_eq!(history_epochs(temp_dir.path()), vec![1, 2, 4]);
    let store = CheckpointStore::new(temp_dir.path().join("models"));
    let best = store.load(true)?;
    assert_eq!(best.best_epoch, 3);
    assert_eq!(best.best_score, 0.7);
    assert!(!best.model_parameters.is_empty());
    assert!(!best.optimizer_state.is_empty());
    Ok(())
}

#[test]
fn test_log_rows() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut training = create_test_loop(
        temp_dir.path(),
        create_test_settings(3),
        ScalarPairs::new(4, 2),
        ScriptedTrials::constant(5),
    );
    training.run()?;

    let logs = temp_dir.path().join("logs");
    let train_rows = read_rows(&logs.join(TRAIN_LOG));
    assert_eq!(train_rows.len(), 12);
    let steps: Vec<usize> = train_rows
        .iter()
        .map(|row| row.split(',').next().unwrap().parse().unwrap())
        .collect();
    assert_eq!(steps, (0..12).collect::<Vec<_>>());
    for row in &train_rows {
        let loss: f64 = row.split(',').nth(1).unwrap().parse()?;
        assert!(loss.is_finite() && loss >= 0.0);
    }

    assert_eq!(read_rows(&logs.join(VALID_LOG)), vec!["0,0.5", "1,0.5", "2,0.5"]);
    Ok(())
}

#[test]
fn test_resume_continues_from_latest() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut first = create_test_loop(
        temp_dir.path(),
        create_test_settings(3),
        ScalarPairs::new(2, 2),
        ScriptedTrials::constant(5),
    );
    first.run()?;
    assert_eq!(history_epochs(temp_dir.path()), vec![1, 3]);

    let mut settings = create_test_settings(6);
    settings.resume = true;
    let mut resumed = create_test_loop(
        temp_dir.path(),
        settings,
        ScalarPairs::new(2, 2),
        ScriptedTrials::constant(5),
    );
    let outcome = resumed.run()?;

    assert_eq!(outcome.epochs_run, 3);
    assert_eq!(outcome.history[0].epoch, 3);
    assert_eq!(outcome.best_epoch, 0);
    assert_eq!(outcome.best_score, 0.5);
    assert_eq!(history_epochs(temp_dir.path()), vec![1, 3, 6]);

    // logs are appended, not truncated
    let logs = temp_dir.path().join("logs");
    assert_eq!(read_rows(&logs.join(VALID_LOG)).len(), 6);
    assert_eq!(read_rows(&logs.join(TRAIN_LOG)).len(), 12);
    Ok(())
}

#[test]
fn test_resume_restores_parameters() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut first = create_test_loop(
        temp_dir.path(),
        create_test_settings(1),
        ScalarPairs::new(3, 4),
        ScriptedTrials::constant(6),
    );
    first.run()?;
    let trained = first.model().state_dict()?;

    let mut settings = create_test_settings(1);
    settings.resume = true;
    let mut resumed = create_test_loop(
        temp_dir.path(),
        settings,
        ScalarPairs::new(3, 4),
        ScriptedTrials::constant(6),
    );
    // budget already spent: restores and stops without training
    let outcome = resumed.run()?;
    assert_eq!(outcome.epochs_run, 0);
    assert_eq!(resumed.model().state_dict()?, trained);
    assert_eq!(resumed.state().epoch, 1);
    Ok(())
}

#[test]
fn test_resume_without_checkpoint() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut settings = create_test_settings(2);
    settings.resume = true;
    let mut training = create_test_loop(
        temp_dir.path(),
        settings,
        ScalarPairs::new(1, 2),
        ScriptedTrials::constant(5),
    );

    let err = training.run().unwrap_err();
    assert!(matches!(err.root_cause(), Error::NotFound { .. }));
    assert!(matches!(err, Error::Training { phase: Phase::Initializing, .. }));
    assert_eq!(training.status(), TrainingStatus::Stopped);
    Ok(())
}

#[test]
fn test_fresh_run_refuses_existing_history() -> Result<()> {
    let temp_dir = TempDir::new()?;
    create_test_loop(
        temp_dir.path(),
        create_test_settings(1),
        ScalarPairs::new(1, 2),
        ScriptedTrials::constant(5),
    )
    .run()?;

    let err = create_test_loop(
        temp_dir.path(),
        create_test_settings(1),
        ScalarPairs::new(1, 2),
        ScriptedTrials::constant(5),
    )
    .run()
    .unwrap_err();
    assert!(matches!(err.root_cause(), Error::Config(_)));
    assert_eq!(history_epochs(temp_dir.path()), vec![1]);
    Ok(())
}

#[test]
fn test_numeric_failure_aborts_run() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut training = create_test_loop(
        temp_dir.path(),
        create_test_settings(5),
        ScalarPairs::new(3, 2).poisoned(1, 2),
        ScriptedTrials::constant(5),
    );

    let err = training.run().unwrap_err();
    assert!(err.is_numeric());
    match &err {
        Error::Training { epoch, phase, .. } => {
            assert_eq!(*epoch, 1);
            assert_eq!(*phase, Phase::Training);
        }
        other => panic!("expected a tagged error, got {other}"),
    }
    assert!(err.to_string().contains("epoch 1 (training)"));

    // epoch 0 completed and was checkpointed; the failing epoch left nothing behind
    assert_eq!(history_epochs(temp_dir.path()), vec![1]);
    let logs = temp_dir.path().join("logs");
    assert_eq!(read_rows(&logs.join(TRAIN_LOG)).len(), 5);
    assert_eq!(read_rows(&logs.join(VALID_LOG)).len(), 1);
    Ok(())
}

#[test]
fn test_progress_events() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut training = create_test_loop(
        temp_dir.path(),
        create_test_settings(2),
        ScalarPairs::new(2, 2),
        ScriptedTrials::new(vec![4, 6]),
    )
    .with_event_monitoring(tx);
    training.run()?;
    drop(training);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    let phases: Vec<Phase> = events
        .iter()
        .filter_map(|event| match event {
            TrainingEvent::PhaseChanged { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            Phase::Initializing,
            Phase::Training,
            Phase::Validating,
            Phase::Checkpointing,
            Phase::Training,
            Phase::Validating,
            Phase::Checkpointing,
        ]
    );

    let batches = events
        .iter()
        .filter(|event| matches!(event, TrainingEvent::BatchCompleted { .. }))
        .count();
    assert_eq!(batches, 4);

    let best_saves = events
        .iter()
        .filter(|event| matches!(event, TrainingEvent::CheckpointSaved { is_best: true, .. }))
        .count();
    assert_eq!(best_saves, 2);

    assert!(events.contains(&TrainingEvent::ValidationCompleted { epoch: 1, accuracy: 0.6 }));
    assert!(matches!(
        events.last(),
        Some(TrainingEvent::TrainingCompleted { epochs_run: 2, best_epoch: 1, .. })
    ));
    Ok(())
}

#[test]
fn test_unwritable_log_dir_aborts_initialization() -> Result<()> {
    let temp_dir = TempDir::new()?;
    std::fs::write(temp_dir.path().join("logs"), "not a directory")?;

    let mut training = create_test_loop(
        temp_dir.path(),
        create_test_settings(3),
        ScalarPairs::new(1, 2),
        ScriptedTrials::constant(5),
    );
    let err = training.run().unwrap_err();

    assert!(matches!(err, Error::Training { epoch: 0, phase: Phase::Initializing, .. }));
    assert!(matches!(err.root_cause(), Error::Io { .. }));
    assert_eq!(training.status(), TrainingStatus::Stopped);
    assert!(history_epochs(temp_dir.path()).is_empty());
    Ok(())
}

#[test]
fn test_checkpoint_write_failure_aborts_run() -> Result<()> {
    let temp_dir = TempDir::new()?;
    // a non-empty directory where the best record should go cannot be replaced
    let blocked = temp_dir.path().join("models").join("best_model.tar");
    std::fs::create_dir_all(blocked.join("occupied"))?;

    let mut training = create_test_loop(
        temp_dir.path(),
        create_test_settings(3),
        ScalarPairs::new(2, 2),
        ScriptedTrials::constant(5),
    );
    let err = training.run().unwrap_err();

    assert!(matches!(err, Error::Training { epoch: 0, phase: Phase::Checkpointing, .. }));
    assert!(matches!(err.root_cause(), Error::Io { .. }));
    assert!(err.to_string().contains("epoch 0 (checkpointing)"));
    assert_eq!(training.status(), TrainingStatus::Stopped);

    // no later epoch ran; rows written before the failure are on disk
    assert_eq!(history_epochs(temp_dir.path()), vec![1]);
    let logs = temp_dir.path().join("logs");
    assert_eq!(read_rows(&logs.join(TRAIN_LOG)).len(), 2);
    assert_eq!(read_rows(&logs.join(VALID_LOG)), vec!["0,0.5"]);
    assert!(blocked.is_dir());
    Ok(())
}

#[test]
fn test_resume_reports_restored_epoch() -> Result<()> {
    let temp_dir = TempDir::new()?;
    create_test_loop(
        temp_dir.path(),
        create_test_settings(3),
        ScalarPairs::new(1, 2),
        ScriptedTrials::constant(5),
    )
    .run()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut settings = create_test_settings(4);
    settings.resume = true;
    let mut resumed = create_test_loop(
        temp_dir.path(),
        settings,
        ScalarPairs::new(1, 2),
        ScriptedTrials::constant(5),
    )
    .with_event_monitoring(tx);
    resumed.run()?;
    drop(resumed);

    let first = rx.try_recv()?;
    assert_eq!(first, TrainingEvent::PhaseChanged { epoch: 3, phase: Phase::Initializing });
    Ok(())
}
