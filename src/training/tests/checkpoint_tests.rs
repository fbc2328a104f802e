//! Tests for checkpointing functionality

use anyhow::Result;
use tempfile::TempDir;

use crate::error::Error;
use crate::training::checkpoints::{parse_history_epoch, CheckpointStore, TrainingState, BEST_CHECKPOINT};

fn sample_state(epoch: usize) -> TrainingState {
    TrainingState {
        epoch,
        best_epoch: epoch.saturating_sub(1),
        best_score: 0.8125,
        model_parameters: (0..=255u8).cycle().take(1000).collect(),
        optimizer_state: vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0xff],
    }
}

#[test]
fn test_checkpoint_round_trip() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = CheckpointStore::new(temp_dir.path().join("run"));

    let state = sample_state(7);
    let path = store.save(&state, false)?;
    assert_eq!(path, store.history_path(7));

    let restored = store.load(false)?;
    assert_eq!(restored, state);
    assert_eq!(restored.model_parameters, state.model_parameters);
    assert_eq!(restored.optimizer_state, state.optimizer_state);
    assert_eq!(restored.best_score.to_bits(), state.best_score.to_bits());
    Ok(())
}

#[test]
fn test_latest_uses_numeric_epoch_order() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = CheckpointStore::new(temp_dir.path());

    for epoch in [3, 1, 10, 2] {
        store.save(&sample_state(epoch), false)?;
    }

    let epochs: Vec<usize> = store.history()?.into_iter().map(|info| info.epoch).collect();
    assert_eq!(epochs, vec![1, 2, 3, 10]);
    assert_eq!(store.load(false)?.epoch, 10);
    Ok(())
}

#[test]
fn test_best_record_is_overwritten() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = CheckpointStore::new(temp_dir.path());

    store.save(&sample_state(2), true)?;
    let path = store.save(&sample_state(5), true)?;
    assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(BEST_CHECKPOINT));

    assert_eq!(store.load(true)?.epoch, 5);
    // best saves never add history
    assert!(store.history()?.is_empty());
    Ok(())
}

#[test]
fn test_history_is_append_only() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = CheckpointStore::new(temp_dir.path());

    store.save(&sample_state(4), false)?;
    let mut changed = sample_state(4);
    changed.best_score = 0.1;

    let err = store.save(&changed, false).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
    assert_eq!(store.load(false)?.best_score, 0.8125);
    Ok(())
}

#[test]
fn test_missing_records() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = CheckpointStore::new(temp_dir.path().join("never_created"));

    assert!(matches!(store.load(false), Err(Error::NotFound { .. })));
    assert!(matches!(store.load(true), Err(Error::NotFound { .. })));
    assert!(store.history()?.is_empty());
    assert!(store.latest()?.is_none());
    Ok(())
}

#[test]
fn test_corrupt_records() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = CheckpointStore::new(temp_dir.path());
    std::fs::write(store.history_path(4), b"definitely not a checkpoint")?;

    match store.load(false) {
        Err(Error::CorruptData { path, .. }) => assert_eq!(path, store.history_path(4)),
        other => panic!("expected corrupt data, got {other:?}"),
    }

    // valid header, truncated body
    let good = store.save(&sample_state(9), false)?;
    let bytes = std::fs::read(&good)?;
    std::fs::write(&good, &bytes[..bytes.len() / 2])?;
    assert!(matches!(store.load(false), Err(Error::CorruptData { .. })));
    Ok(())
}

#[test]
fn test_foreign_files_are_ignored() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = CheckpointStore::new(temp_dir.path());

    store.save(&sample_state(2), false)?;
    for name in ["notes.txt", ".model_ckpt_9.tar.tmp", "model_ckpt_x.tar", BEST_CHECKPOINT] {
        std::fs::write(temp_dir.path().join(name), b"junk")?;
    }

    let history = store.history()?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].epoch, 2);
    assert_eq!(store.load(false)?.epoch, 2);
    Ok(())
}

#[test]
fn test_save_leaves_no_temporary_files() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = CheckpointStore::new(temp_dir.path());
    store.save(&sample_state(1), false)?;
    store.save(&sample_state(1), true)?;

    let mut names: Vec<String> = std::fs::read_dir(temp_dir.path())?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    names.sort();
    assert_eq!(names, vec![BEST_CHECKPOINT.to_string(), "model_ckpt_1.tar".to_string()]);
    Ok(())
}

#[test]
fn test_parse_history_epoch() {
    assert_eq!(parse_history_epoch("model_ckpt_0.tar"), Some(0));
    assert_eq!(parse_history_epoch("model_ckpt_12.tar"), Some(12));
    assert_eq!(parse_history_epoch("best_model.tar"), None);
    assert_eq!(parse_history_epoch("model_ckpt_.tar"), None);
    assert_eq!(parse_history_epoch("model_ckpt_3.tar.tmp"), None);
}
