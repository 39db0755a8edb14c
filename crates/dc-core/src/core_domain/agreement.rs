use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{AnnotatorId, ItemId, LabelRecord, LabelSet, PreconditionError};

/// Category used for a dimension an annotator left empty.
pub const UNKNOWN_CATEGORY: &str = "unknown";

// ---------------------------------------------------------------------------
// LabelDimension
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelDimension {
    Intent,
    Sentiment,
    RiskLevel,
}

impl LabelDimension {
    pub const ALL: [LabelDimension; 3] = [
        LabelDimension::Intent,
        LabelDimension::Sentiment,
        LabelDimension::RiskLevel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LabelDimension::Intent => "intent",
            LabelDimension::Sentiment => "sentiment",
            LabelDimension::RiskLevel => "risk_level",
        }
    }

    /// Wire value of this dimension on a record, if set.
    pub fn value_of(&self, record: &LabelRecord) -> Option<&'static str> {
        match self {
            LabelDimension::Intent => record.intent.map(|v| v.as_str()),
            LabelDimension::Sentiment => record.sentiment.map(|v| v.as_str()),
            LabelDimension::RiskLevel => record.risk_level.map(|v| v.as_str()),
        }
    }
}

impl fmt::Display for LabelDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Kappa interpretation
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementLevel {
    Poor,
    Slight,
    Fair,
    Moderate,
    Substantial,
    AlmostPerfect,
}

impl fmt::Display for AgreementLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgreementLevel::Poor => "poor",
            AgreementLevel::Slight => "slight",
            AgreementLevel::Fair => "fair",
            AgreementLevel::Moderate => "moderate",
            AgreementLevel::Substantial => "substantial",
            AgreementLevel::AlmostPerfect => "almost perfect",
        };
        f.write_str(label)
    }
}

/// Lower bounds of slight, fair, moderate, substantial and almost perfect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KappaBands(pub [f64; 5]);

impl Default for KappaBands {
    fn default() -> Self {
        Self([0.0, 0.2, 0.4, 0.6, 0.8])
    }
}

impl KappaBands {
    pub fn interpret(&self, kappa: f64) -> AgreementLevel {
        const LEVELS: [AgreementLevel; 5] = [
            AgreementLevel::Poor,
            AgreementLevel::Slight,
            AgreementLevel::Fair,
            AgreementLevel::Moderate,
            AgreementLevel::Substantial,
        ];
        self.0
            .iter()
            .zip(LEVELS)
            .find(|(bound, _)| kappa < **bound)
            .map_or(AgreementLevel::AlmostPerfect, |(_, level)| level)
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Cohen's kappa over two equally long label sequences.
///
/// Returns `None` when the sequences are empty or of different length, or
/// when chance agreement is total (both annotators used one and the same
/// category throughout). Chance agreement is summed in category order, so
/// the result is bit-identical for either argument order.
pub fn cohen_kappa<T: Ord>(first: &[T], second: &[T]) -> Option<f64> {
    if first.is_empty() || first.len() != second.len() {
        return None;
    }
    let n = first.len() as f64;

    let observed = exact_agreement(first, second);

    let mut first_counts: BTreeMap<&T, usize> = BTreeMap::new();
    let mut second_counts: BTreeMap<&T, usize> = BTreeMap::new();
    for (a, b) in first.iter().zip(second) {
        *first_counts.entry(a).or_insert(0) += 1;
        *second_counts.entry(b).or_insert(0) += 1;
    }
    let expected: f64 = first_counts
        .iter()
        .filter_map(|(category, &count)| {
            let other = *second_counts.get(category)?;
            Some((count as f64 / n) * (other as f64 / n))
        })
        .sum();

    if (1.0 - expected).abs() < f64::EPSILON {
        return None;
    }
    Some((observed - expected) / (1.0 - expected))
}

/// Fraction of positions where both sequences hold the same value.
pub fn exact_agreement<T: Eq>(first: &[T], second: &[T]) -> f64 {
    if first.is_empty() {
        return 0.0;
    }
    let matching = first.iter().zip(second).filter(|(a, b)| a == b).count();
    matching as f64 / first.len() as f64
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PairAgreement {
    /// 1-based positions of the two label sets in the input.
    pub first: usize,
    pub second: usize,
    pub first_annotator: AnnotatorId,
    pub second_annotator: AnnotatorId,
    pub exact_agreement: f64,
    pub kappa: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DimensionAgreement {
    pub dimension: LabelDimension,
    pub pairwise: Vec<PairAgreement>,
    pub average_exact_agreement: f64,
    /// Mean over the defined pairwise kappas; `None` when none is defined.
    pub average_kappa: Option<f64>,
    pub level: Option<AgreementLevel>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgreementReport {
    pub label_sets: usize,
    pub common_items: usize,
    pub dimensions: Vec<DimensionAgreement>,
}

impl AgreementReport {
    pub fn dimension(&self, dimension: LabelDimension) -> Option<&DimensionAgreement> {
        self.dimensions.iter().find(|d| d.dimension == dimension)
    }
}

// ---------------------------------------------------------------------------
// AgreementCalculator
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct AgreementCalculator {
    bands: KappaBands,
}

impl AgreementCalculator {
    pub fn new(bands: KappaBands) -> Self {
        Self { bands }
    }

    pub fn calculate(&self, label_sets: &[LabelSet]) -> Result<AgreementReport, PreconditionError> {
        if label_sets.len() < 2 {
            return Err(PreconditionError::TooFewLabelSets {
                required: 2,
                actual: label_sets.len(),
            });
        }

        let indexes: Vec<HashMap<&ItemId, &LabelRecord>> =
            label_sets.iter().map(LabelSet::index).collect();

        // Order follows the first set so reports are stable.
        let common: Vec<&ItemId> = label_sets[0]
            .labels()
            .iter()
            .map(|r| &r.item_id)
            .filter(|id| indexes.iter().all(|index| index.contains_key(id)))
            .collect();
        if common.is_empty() {
            return Err(PreconditionError::NoCommonItems);
        }

        let dimensions = LabelDimension::ALL
            .iter()
            .map(|&dimension| self.dimension_agreement(dimension, label_sets, &indexes, &common))
            .collect();

        tracing::info!(
            label_sets = label_sets.len(),
            common_items = common.len(),
            "agreement calculated"
        );

        Ok(AgreementReport {
            label_sets: label_sets.len(),
            common_items: common.len(),
            dimensions,
        })
    }

    fn dimension_agreement(
        &self,
        dimension: LabelDimension,
        label_sets: &[LabelSet],
        indexes: &[HashMap<&ItemId, &LabelRecord>],
        common: &[&ItemId],
    ) -> DimensionAgreement {
        let sequences: Vec<Vec<&str>> = indexes
            .iter()
            .map(|index| {
                common
                    .iter()
                    .map(|id| {
                        index
                            .get(id)
                            .and_then(|record| dimension.value_of(record))
                            .unwrap_or(UNKNOWN_CATEGORY)
                    })
                    .collect()
            })
            .collect();

        let mut pairwise = Vec::new();
        for i in 0..sequences.len() {
            for j in i + 1..sequences.len() {
                pairwise.push(PairAgreement {
                    first: i + 1,
                    second: j + 1,
                    first_annotator: label_sets[i].annotator.clone(),
                    second_annotator: label_sets[j].annotator.clone(),
                    exact_agreement: exact_agreement(&sequences[i], &sequences[j]),
                    kappa: cohen_kappa(&sequences[i], &sequences[j]),
                });
            }
        }

        let average_exact_agreement =
            pairwise.iter().map(|p| p.exact_agreement).sum::<f64>() / pairwise.len() as f64;
        let kappas: Vec<f64> = pairwise.iter().filter_map(|p| p.kappa).collect();
        let average_kappa =
            (!kappas.is_empty()).then(|| kappas.iter().sum::<f64>() / kappas.len() as f64);

        DimensionAgreement {
            dimension,
            pairwise,
            average_exact_agreement,
            average_kappa,
            level: average_kappa.map(|k| self.bands.interpret(k)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
