//! Multi-source metric resolution
//!
//! A logical metric (CPU temperature, package power, drive media kind...) is
//! answered by an ordered chain of sources. Each stage is a lazy closure, so
//! later sources are only queried when every earlier stage came back empty.
//! Numeric stages filter candidates by a plausibility range and pick the best
//! survivor by keyword score, preferring the larger reading on ties.

use serde::Serialize;
use std::time::Instant;

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    HardwareSensor,
    BoardSensor,
    PerformanceCounter,
    ThermalZone,
    Inventory,
    KernelTrace,
    SocketTable,
    Estimate,
    Synthetic,
    #[default]
    None,
}

/// A scalar that may be unknown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Known(f64),
    Unknown,
}

/// A resolved reading for one metric at one instant. Never mutated.
#[derive(Debug, Clone, Copy)]
pub struct MetricSample {
    pub value: Reading,
    pub source: SourceTag,
    pub at: Instant,
}

impl MetricSample {
    pub fn known(value: f64, source: SourceTag) -> Self {
        Self {
            value: Reading::Known(value),
            source,
            at: Instant::now(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            value: Reading::Unknown,
            source: SourceTag::None,
            at: Instant::now(),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self.value, Reading::Known(_))
    }

    /// The zero sentinel used by display code for unknown readings.
    pub fn value_or_zero(&self) -> f64 {
        match self.value {
            Reading::Known(v) => v,
            Reading::Unknown => 0.0,
        }
    }
}

/// A labelled reading offered by one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub label: String,
    pub value: f64,
}

impl Candidate {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Plausibility range plus keyword scoring for one metric family.
#[derive(Debug, Clone)]
pub struct ScoringRule {
    min: f64,
    max: f64,
    scores: Vec<(Vec<&'static str>, i32)>,
    include: Vec<&'static str>,
    exclude: Vec<&'static str>,
}

impl ScoringRule {
    /// Values must lie strictly inside `(min, max)`.
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            scores: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Add `score` when the upper-cased label contains `keyword`.
    pub fn score(mut self, keyword: &'static str, score: i32) -> Self {
        self.scores.push((vec![keyword], score));
        self
    }

    /// Add `score` when the label contains every keyword.
    pub fn score_all(mut self, keywords: &[&'static str], score: i32) -> Self {
        self.scores.push((keywords.to_vec(), score));
        self
    }

    /// Only accept labels containing at least one of these keywords.
    pub fn include(mut self, keywords: &[&'static str]) -> Self {
        self.include.extend_from_slice(keywords);
        self
    }

    /// Reject labels containing any of these keywords.
    pub fn exclude(mut self, keywords: &[&'static str]) -> Self {
        self.exclude.extend_from_slice(keywords);
        self
    }

    pub fn plausible(&self, value: f64) -> bool {
        value.is_finite() && value > self.min && value < self.max
    }

    fn admits(&self, label: &str) -> bool {
        if self.exclude.iter().any(|k| label.contains(k)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|k| label.contains(k))
    }

    pub fn score_of(&self, label: &str) -> i32 {
        let upper = label.to_uppercase();
        self.scores
            .iter()
            .filter(|(keys, _)| keys.iter().all(|k| upper.contains(k)))
            .map(|(_, s)| *s)
            .sum()
    }

    /// Candidates that survive the plausibility and label filters.
    pub fn admissible<'c>(&self, candidates: &'c [Candidate]) -> Vec<&'c Candidate> {
        candidates
            .iter()
            .filter(|c| self.plausible(c.value) && self.admits(&c.label.to_uppercase()))
            .collect()
    }

    /// Highest score wins, ties go to the larger value.
    pub fn pick(&self, candidates: &[Candidate]) -> Option<f64> {
        self.admissible(candidates)
            .into_iter()
            .max_by(|a, b| {
                self.score_of(&a.label)
                    .cmp(&self.score_of(&b.label))
                    .then(a.value.total_cmp(&b.value))
            })
            .map(|c| c.value)
    }
}

type Stage<'a, T> = (SourceTag, Box<dyn FnOnce() -> Option<T> + 'a>);

/// An ordered chain of sources; the first one that answers wins.
pub struct Fallback<'a, T> {
    stages: Vec<Stage<'a, T>>,
}

impl<'a, T: 'a> Default for Fallback<'a, T> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<'a, T: 'a> Fallback<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, source: SourceTag, fetch: impl FnOnce() -> Option<T> + 'a) -> Self {
        self.stages.push((source, Box::new(fetch)));
        self
    }

    pub fn resolve(self) -> Option<(T, SourceTag)> {
        for (source, fetch) in self.stages {
            if let Some(value) = fetch() {
                return Some((value, source));
            }
        }
        None
    }
}

/// Numeric resolver: candidate stages scored by a rule, plus estimate stages.
pub struct MetricResolver<'a> {
    chain: Fallback<'a, f64>,
}

impl<'a> Default for MetricResolver<'a> {
    fn default() -> Self {
        Self {
            chain: Fallback::new(),
        }
    }
}

impl<'a> MetricResolver<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source offering labelled candidates. Scoring only applies within
    /// this source's candidate set.
    pub fn candidates(
        self,
        source: SourceTag,
        rule: &'a ScoringRule,
        fetch: impl FnOnce() -> Vec<Candidate> + 'a,
    ) -> Self {
        Self {
            chain: self.chain.then(source, move || rule.pick(&fetch())),
        }
    }

    /// A derived value; accepted when finite and positive.
    pub fn estimate(self, source: SourceTag, fetch: impl FnOnce() -> Option<f64> + 'a) -> Self {
        Self {
            chain: self.chain.then(source, move || {
                fetch().filter(|v| v.is_finite() && *v > 0.0)
            }),
        }
    }

    pub fn resolve(self) -> MetricSample {
        match self.chain.resolve() {
            Some((value, source)) => MetricSample::known(value, source),
            None => MetricSample::unknown(),
        }
    }
}

/// First non-blank string from an ordered chain of sources.
pub fn first_text<'a>(stages: Vec<Box<dyn FnOnce() -> Option<String> + 'a>>) -> String {
    stages
        .into_iter()
        .find_map(|fetch| fetch().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn power_rule() -> ScoringRule {
        ScoringRule::new(0.5, 400.0)
            .score("PACKAGE", 100)
            .score("SOCKET", 90)
            .score("SOC", 80)
            .score("CORE", 60)
            .score("CPU", 50)
    }

    fn temperature_rule() -> ScoringRule {
        ScoringRule::new(0.0, 150.0)
            .score("TDIE", 100)
            .score("TCTL", 90)
            .score("PACKAGE", 85)
            .score("CPU", 50)
    }

    #[test]
    fn test_first_source_with_valid_candidate_wins() {
        let rule = power_rule();
        let sample = MetricResolver::new()
            .candidates(SourceTag::HardwareSensor, &rule, Vec::new)
            .candidates(SourceTag::BoardSensor, &rule, || {
                vec![Candidate::new("PACKAGE", 60.0)]
            })
            .candidates(SourceTag::PerformanceCounter, &rule, || {
                vec![Candidate::new("SOCKET", 55.0)]
            })
            .resolve();
        assert_eq!(sample.value, Reading::Known(60.0));
        assert_eq!(sample.source, SourceTag::BoardSensor);
    }

    #[test]
    fn test_scoring_does_not_cross_sources() {
        let rule = power_rule();
        let sample = MetricResolver::new()
            .candidates(SourceTag::HardwareSensor, &rule, || {
                vec![Candidate::new("CPU", 20.0)]
            })
            .candidates(SourceTag::BoardSensor, &rule, || {
                vec![Candidate::new("CPU PACKAGE", 60.0)]
            })
            .resolve();
        assert_eq!(sample.value, Reading::Known(20.0));
    }

    #[test]
    fn test_score_beats_value_within_source() {
        let rule = power_rule();
        let picked = rule.pick(&[
            Candidate::new("CPU Cores", 70.0),
            Candidate::new("CPU Package", 45.0),
        ]);
        assert_eq!(picked, Some(45.0));
    }

    #[test]
    fn test_ties_prefer_larger_value() {
        let rule = temperature_rule();
        let picked = rule.pick(&[
            Candidate::new("Core #0", 51.0),
            Candidate::new("Core #1", 63.0),
        ]);
        assert_eq!(picked, Some(63.0));
    }

    #[test]
    fn test_implausible_temperature_is_rejected() {
        let rule = temperature_rule();
        let sample = MetricResolver::new()
            .candidates(SourceTag::HardwareSensor, &rule, || {
                vec![Candidate::new("Tdie", 999.0)]
            })
            .resolve();
        assert_eq!(sample.value, Reading::Unknown);
        assert_eq!(sample.value_or_zero(), 0.0);
    }

    #[test]
    fn test_later_stages_are_not_queried() {
        let rule = power_rule();
        let mut queried = false;
        let sample = MetricResolver::new()
            .candidates(SourceTag::HardwareSensor, &rule, || {
                vec![Candidate::new("Package", 30.0)]
            })
            .estimate(SourceTag::Estimate, || {
                queried = true;
                Some(1.0)
            })
            .resolve();
        assert!(sample.is_known());
        assert!(!queried);
    }

    #[test]
    fn test_estimate_rejects_zero() {
        let sample = MetricResolver::new()
            .estimate(SourceTag::Estimate, || Some(0.0))
            .estimate(SourceTag::Inventory, || Some(8.0))
            .resolve();
        assert_eq!(sample.value, Reading::Known(8.0));
        assert_eq!(sample.source, SourceTag::Inventory);
    }

    #[test]
    fn test_include_and_exclude_filters() {
        let rule = ScoringRule::new(0.0, 150.0)
            .include(&["CPU", "SOCKET"])
            .exclude(&["VRM"]);
        assert_eq!(rule.pick(&[Candidate::new("CPU VRM", 80.0)]), None);
        assert_eq!(rule.pick(&[Candidate::new("System", 30.0)]), None);
        assert_eq!(rule.pick(&[Candidate::new("CPU Socket", 41.0)]), Some(41.0));
    }

    #[test]
    fn test_score_all_requires_every_keyword() {
        let rule = ScoringRule::new(0.2, 2.5).score_all(&["VDDCR", "CPU"], 95);
        assert_eq!(rule.score_of("VDDCR_CPU"), 95);
        assert_eq!(rule.score_of("VDDCR_SOC"), 0);
    }

    #[test]
    fn test_first_text_skips_blank() {
        let text = first_text(vec![
            Box::new(|| None),
            Box::new(|| Some("   ".to_string())),
            Box::new(|| Some(" 550.54 ".to_string())),
        ]);
        assert_eq!(text, "550.54");
    }
}
