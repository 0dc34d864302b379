//! Batch scorers: the pluggable strategy between the record stream and the sink.
//!
//! A scorer maps a batch of texts to one row of extra cells per text, same
//! length and order. The orchestrator never looks inside the cells.

use crate::config::{AnnotateOptions, Stage};
use crate::util::shell_command;
use ahash::AHashMap;
use anyhow::{anyhow, bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use tracing::{debug, info};

pub trait BatchScorer: Send {
    /// Column names appended after the record's own columns.
    fn columns(&self) -> Vec<String>;

    /// One row of cells per input text, in input order.
    fn score_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<String>>>;
}

/// `f64` the way downstream readers expect it (`-1.0`, `0.5`, `0.30000000000000004`).
pub fn fmt_float(x: f64) -> String {
    format!("{x:?}")
}

/// Appends nothing; used when the record format already produced the final row.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl BatchScorer for PassThrough {
    fn columns(&self) -> Vec<String> {
        Vec::new()
    }

    fn score_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<String>>> {
        Ok(vec![Vec::new(); texts.len()])
    }
}

// ------------------------------ policies ----------------------------------------

pub fn stars_to_label(stars: u8) -> &'static str {
    match stars {
        0 | 1 => "very_negative",
        2 => "negative",
        3 => "neutral",
        4 => "positive",
        _ => "very_positive",
    }
}

pub fn stars_to_polarity(stars: u8) -> f64 {
    (f64::from(stars.clamp(1, 5)) - 3.0) / 2.0
}

/// Inclusive lower bound: `score == threshold` is hostile.
pub fn hostility_label(score: f64, threshold: f64) -> u8 {
    u8::from(score >= threshold)
}

pub fn compound_label(compound: f64) -> &'static str {
    if compound >= 0.05 {
        "positive"
    } else if compound <= -0.05 {
        "negative"
    } else {
        "neutral"
    }
}

// ------------------------------ lexicon -----------------------------------------

const ALPHA: f64 = 15.0;
const NEGATION_SCALAR: f64 = -0.74;
const NEGATION_WINDOW: usize = 3;
const NEGATIONS: &[&str] = &["not", "no", "never", "nao", "não", "nunca", "nem", "jamais"];

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sentiment {
    pub compound: f64,
    pub pos: f64,
    pub neu: f64,
    pub neg: f64,
}

fn round_to(x: f64, places: i32) -> f64 {
    let m = 10f64.powi(places);
    (x * m).round() / m
}

/// Token → valence table with VADER-style aggregation.
#[derive(Clone, Debug, Default)]
pub struct LexiconScorer {
    valence: AHashMap<String, f64>,
}

impl LexiconScorer {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let valence = pairs.into_iter().map(|(t, v)| (t.as_ref().to_lowercase(), v)).collect();
        Self { valence }
    }

    /// `token<TAB>valence[<TAB>...]` per line; malformed lines are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let f = File::open(path).with_context(|| format!("open lexicon {}", path.display()))?;
        let mut valence = AHashMap::new();
        for line in BufReader::new(f).lines() {
            let line = line.with_context(|| format!("read lexicon {}", path.display()))?;
            let mut cols = line.split('\t');
            let (Some(tok), Some(val)) = (cols.next(), cols.next()) else { continue };
            if let Ok(v) = val.trim().parse::<f64>() {
                valence.insert(tok.trim().to_lowercase(), v);
            }
        }
        info!("lexicon loaded: {} entries from {}", valence.len(), path.display());
        Ok(Self { valence })
    }

    pub fn len(&self) -> usize {
        self.valence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valence.is_empty()
    }

    pub fn polarity_scores(&self, text: &str) -> Sentiment {
        let lower = text.to_lowercase();
        let tokens: Vec<&str> = lower
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return Sentiment::default();
        }

        let mut sum = 0.0;
        let (mut pos_sum, mut neg_sum, mut neu_count) = (0.0f64, 0.0f64, 0usize);
        for (i, tok) in tokens.iter().enumerate() {
            let Some(&base) = self.valence.get(*tok) else {
                neu_count += 1;
                continue;
            };
            let negated = tokens[i.saturating_sub(NEGATION_WINDOW)..i].iter().any(|p| NEGATIONS.contains(p));
            let v = if negated { base * NEGATION_SCALAR } else { base };
            sum += v;
            if v > 0.0 {
                pos_sum += v + 1.0;
            } else if v < 0.0 {
                neg_sum += v - 1.0;
            } else {
                neu_count += 1;
            }
        }

        let compound = (sum / (sum * sum + ALPHA).sqrt()).clamp(-1.0, 1.0);
        let total = pos_sum + neg_sum.abs() + neu_count as f64;
        let share = |x: f64| if total > 0.0 { round_to(x / total, 3) } else { 0.0 };
        Sentiment {
            compound: round_to(compound, 4),
            pos: share(pos_sum),
            neu: share(neu_count as f64),
            neg: share(neg_sum.abs()),
        }
    }
}

impl BatchScorer for LexiconScorer {
    fn columns(&self) -> Vec<String> {
        ["vader_compound", "vader_pos", "vader_neu", "vader_neg", "vader_label"]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    fn score_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<String>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let s = self.polarity_scores(t);
                vec![
                    fmt_float(s.compound),
                    fmt_float(s.pos),
                    fmt_float(s.neu),
                    fmt_float(s.neg),
                    compound_label(s.compound).to_string(),
                ]
            })
            .collect())
    }
}

// ------------------------------ models ------------------------------------------

/// Opaque classifier: per-text class probabilities.
pub trait ProbabilityModel: Send {
    fn predict(&mut self, texts: &[String]) -> Result<Vec<Vec<f64>>>;
}

/// Scalar hostility probability plus the thresholded 0/1 label.
pub struct HostilityScorer<M> {
    model: M,
    threshold: f64,
}

impl<M: ProbabilityModel> HostilityScorer<M> {
    pub fn new(model: M, threshold: f64) -> Self {
        Self { model, threshold }
    }
}

impl<M: ProbabilityModel> BatchScorer for HostilityScorer<M> {
    fn columns(&self) -> Vec<String> {
        vec!["tybyria_score".into(), "tybyria_label".into()]
    }

    fn score_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<String>>> {
        let probs = self.model.predict(texts)?;
        probs
            .iter()
            .map(|p| {
                // two-class softmax: hostile is class 1; a single output is already the probability
                let score = match p.as_slice() {
                    [only] => *only,
                    [_, hostile, ..] => *hostile,
                    [] => bail!("model returned no probabilities"),
                };
                Ok(vec![fmt_float(score), hostility_label(score, self.threshold).to_string()])
            })
            .collect()
    }
}

/// 5-class star rating → stars, label, polarity, and the five probabilities.
pub struct StarScorer<M> {
    model: M,
}

impl<M: ProbabilityModel> StarScorer<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

impl<M: ProbabilityModel> BatchScorer for StarScorer<M> {
    fn columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = vec!["sentiment_stars".into(), "sentiment_label".into(), "polarity".into()];
        cols.extend((1..=5).map(|i| format!("p_star_{i}")));
        cols
    }

    fn score_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<String>>> {
        let probs = self.model.predict(texts)?;
        probs
            .iter()
            .map(|p| {
                if p.len() != 5 {
                    bail!("star model returned {} classes, expected 5", p.len());
                }
                let best = p
                    .iter()
                    .enumerate()
                    .fold(0usize, |best, (i, v)| if *v > p[best] { i } else { best });
                let stars = best as u8 + 1;
                let mut row = vec![
                    stars.to_string(),
                    stars_to_label(stars).to_string(),
                    fmt_float(stars_to_polarity(stars)),
                ];
                row.extend(p.iter().map(|v| fmt_float(*v)));
                Ok(row)
            })
            .collect()
    }
}

/// External inference process, spawned once and fed one JSON array of texts per
/// line; it answers with one JSON array of probability arrays per line.
pub struct CommandModel {
    command: String,
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl CommandModel {
    pub fn spawn(command: &str) -> Result<Self> {
        let mut child = shell_command(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn model command `{command}`"))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("model stdin unavailable"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("model stdout unavailable"))?;
        info!("model process started: {command}");
        Ok(Self {
            command: command.to_string(),
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
        })
    }
}

impl ProbabilityModel for CommandModel {
    fn predict(&mut self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        serde_json::to_writer(&mut self.stdin, texts)?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush().with_context(|| format!("write batch to `{}`", self.command))?;

        let mut line = String::new();
        let n = self.stdout.read_line(&mut line)?;
        if n == 0 {
            bail!("model command `{}` closed its output", self.command);
        }
        let probs: Vec<Vec<f64>> =
            serde_json::from_str(line.trim()).with_context(|| format!("parse model output from `{}`", self.command))?;
        if probs.len() != texts.len() {
            bail!("model returned {} results for {} texts", probs.len(), texts.len());
        }
        Ok(probs)
    }
}

impl Drop for CommandModel {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("model process already gone: {e}");
        }
        let _ = self.child.wait();
    }
}

/// Scorer for a stage, built from the options.
pub fn for_stage(opts: &AnnotateOptions) -> Result<Box<dyn BatchScorer>> {
    let model_cmd = || {
        opts.model_command
            .as_deref()
            .ok_or_else(|| anyhow!("stage {:?} needs ANNOTL_MODEL_CMD", opts.stage))
    };
    Ok(match opts.stage {
        Stage::Dump | Stage::Bluesky => Box::new(PassThrough),
        Stage::Vader => {
            let path = opts.lexicon_path.as_deref().ok_or_else(|| anyhow!("vader stage needs ANNOTL_LEXICON"))?;
            Box::new(LexiconScorer::load(path)?)
        }
        Stage::Tybyria => Box::new(HostilityScorer::new(CommandModel::spawn(model_cmd()?)?, opts.threshold)),
        Stage::Stars => Box::new(StarScorer::new(CommandModel::spawn(model_cmd()?)?)),
    })
}
