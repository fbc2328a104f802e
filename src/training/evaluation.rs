//! One-shot evaluation over trial sets
//!
//! For every trial the probe is scored against each candidate; the verdict is
//! correct when the highest-scoring candidate is the trial's true match.
//! Accuracy is `correct / total`, independent of trial order.

use candle_core::DType;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Phase, Result};
use crate::model::SiameseModel;
use crate::training::data::{Trial, TrialSource};
use crate::training::events::{EventSink, TrainingEvent};

/// Outcome of one evaluation pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Trials judged correct
    pub correct: usize,
    /// Trials judged
    pub total: usize,
    /// `correct / total`, or 0 when no trial was run
    pub accuracy: f64,
    /// No trial was run
    pub degenerate: bool,
}

impl EvaluationReport {
    fn from_counts(correct: usize, total: usize) -> Self {
        if total == 0 {
            Self {
                correct: 0,
                total: 0,
                accuracy: 0.0,
                degenerate: true,
            }
        } else {
            Self {
                correct,
                total,
                accuracy: correct as f64 / total as f64,
                degenerate: false,
            }
        }
    }

    /// Accuracy in percent
    pub fn percentage(&self) -> f64 {
        self.accuracy * 100.0
    }
}

/// Index of the highest score; ties resolve to the lowest index
pub fn argmax(scores: &[f32]) -> Result<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if !score.is_finite() {
            return Err(Error::numeric(format!("candidate {index} scored {score}")));
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((index, score)),
        }
    }
    best.map(|(index, _)| index)
        .ok_or_else(|| Error::data("trial has no candidates"))
}

/// Read-only pass of a model over a trial set
pub struct EvaluationLoop<'a> {
    model: &'a dyn SiameseModel,
    phase: Phase,
    events: EventSink,
}

impl<'a> EvaluationLoop<'a> {
    /// Evaluate `model` during `phase`
    pub fn new(model: &'a dyn SiameseModel, phase: Phase) -> Self {
        Self {
            model,
            phase,
            events: EventSink::disabled(),
        }
    }

    /// Publish per-trial running accuracy
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Judge one trial
    pub fn judge(&self, trial: &Trial) -> Result<bool> {
        let way = trial.way();
        if trial.target >= way {
            return Err(Error::data(format!(
                "true match index {} out of range for {}-way trial",
                trial.target, way
            )));
        }

        let probes = trial
            .probe
            .broadcast_as(trial.candidates.shape())?
            .contiguous()?;
        let scores = self
            .model
            .forward(&probes, &trial.candidates)?
            .detach()
            .flatten_all()?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;

        if scores.len() != way {
            return Err(Error::data(format!(
                "model returned {} scores for {} candidates",
                scores.len(),
                way
            )));
        }
        Ok(argmax(&scores)? == trial.target)
    }

    /// Rewind `trials` and judge every trial
    pub fn run(&self, trials: &mut dyn TrialSource) -> Result<EvaluationReport> {
        trials.reset()?;
        let expected = trials.num_trials();

        let mut correct = 0;
        let mut total = 0;
        while let Some(trial) = trials.next_trial()? {
            let hit = self.judge(&trial)?;
            total += 1;
            if hit {
                correct += 1;
            }
            self.events.send(TrainingEvent::TrialEvaluated {
                phase: self.phase,
                trial: total - 1,
                total: expected,
                correct: hit,
                running_accuracy: correct as f64 / total as f64,
            });
        }

        let report = EvaluationReport::from_counts(correct, total);
        if report.degenerate {
            warn!("{} pass ran zero trials; reporting accuracy 0", self.phase);
        } else {
            debug!(
                "{} pass: {}/{} correct ({:.2}%)",
                self.phase,
                report.correct,
                report.total,
                report.percentage()
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_first_wins_ties() {
        assert_eq!(argmax(&[0.5, 0.9, 0.9, 0.1]).unwrap(), 1);
        assert_eq!(argmax(&[2.0, 2.0]).unwrap(), 0);
        assert_eq!(argmax(&[-3.0]).unwrap(), 0);
    }

    #[test]
    fn test_argmax_rejects_non_finite() {
        let err = argmax(&[0.1, f32::NAN]).unwrap_err();
        assert!(err.is_numeric());
        assert!(argmax(&[f32::INFINITY]).is_err());
    }

    #[test]
    fn test_argmax_empty() {
        assert!(matches!(argmax(&[]), Err(Error::Data(_))));
    }

    #[test]
    fn test_report_from_counts() {
        let report = EvaluationReport::from_counts(7, 10);
        assert_eq!(report.accuracy, 0.7);
        assert!((report.percentage() - 70.0).abs() < 1e-9);

        let empty = EvaluationReport::from_counts(0, 0);
        assert_eq!(empty.accuracy, 0.0);
        assert!(empty.degenerate);
    }
}
