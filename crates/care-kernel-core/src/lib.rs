use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("query error: {0}")]
    Query(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ConcernId(pub String);

impl ConcernId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl Display for ConcernId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CareId(pub String);

impl CareId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl Display for CareId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VariantId(pub String);

impl VariantId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl Display for VariantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum LegalBasis {
    Optional,
    ReasonableEffort,
    Mandatory,
}

impl LegalBasis {
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Optional => 0,
            Self::ReasonableEffort => 1,
            Self::Mandatory => 2,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Optional => "optional",
            Self::ReasonableEffort => "reasonable-effort",
            Self::Mandatory => "mandatory",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "optional" => Some(Self::Optional),
            "reasonable-effort" => Some(Self::ReasonableEffort),
            "mandatory" => Some(Self::Mandatory),
            _ => None,
        }
    }
}

/// Scoring metadata attached to a [`Care`]. Every field is optional; a
/// missing field scores neutral rather than excluding the candidate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CareTags {
    pub cost: Option<Level>,
    pub difficulty: Option<Level>,
    pub expertise_required: Option<Level>,
    pub psychological_ease: Option<Level>,
    pub legal_basis: Option<LegalBasis>,
    pub effect_type: Option<String>,
    pub lead_time_days: Option<f32>,
    pub monthly_upkeep_hours: Option<f32>,
    pub stakeholder_count: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Concern {
    pub id: ConcernId,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub primary_tags: BTreeSet<String>,
    #[serde(default)]
    pub secondary_tags: BTreeSet<String>,
    #[serde(default)]
    pub trait_types: BTreeSet<String>,
    #[serde(default)]
    pub situations: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub examples: BTreeMap<String, Vec<String>>,
    /// Informational only; display order comes from the concern's [`Bundle`].
    #[serde(default)]
    pub care_ids: Vec<CareId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Care {
    pub id: CareId,
    pub title: String,
    #[serde(default)]
    pub bullets: Vec<String>,
    #[serde(default)]
    pub tags: CareTags,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CareVariant {
    pub id: VariantId,
    pub care_id: CareId,
    pub domain: String,
    #[serde(default)]
    pub detail: Vec<String>,
    #[serde(default)]
    pub request_difficulty: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Bundle {
    pub concern_id: ConcernId,
    #[serde(default)]
    pub entries: Vec<BundleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct BundleEntry {
    pub care_id: CareId,
    #[serde(default)]
    pub variant_ids: Vec<VariantId>,
}

/// The three conventionally supported domains. Nothing in the pipeline
/// rejects other domain strings; unknown domains simply match nothing.
#[must_use]
pub fn supported_domains() -> [&'static str; 3] {
    ["workplace", "education", "support-service"]
}

/// Raw ingestion shape for a record store, as produced by any loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreData {
    pub concerns: Vec<Concern>,
    pub cares: Vec<Care>,
    pub variants: Vec<CareVariant>,
    pub bundles: Vec<Bundle>,
}

/// Immutable, id-keyed view over the four entity collections.
///
/// Duplicate ids within a collection keep the first occurrence; the same
/// rule gives each concern at most one bundle. Lookups return `None` for
/// unknown ids; referential integrity is never assumed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordStore {
    concerns: BTreeMap<ConcernId, Concern>,
    cares: BTreeMap<CareId, Care>,
    variants: BTreeMap<VariantId, CareVariant>,
    bundles: BTreeMap<ConcernId, Bundle>,
}

impl RecordStore {
    #[must_use]
    pub fn new(data: StoreData) -> Self {
        let mut concerns = BTreeMap::new();
        for concern in data.concerns {
            concerns.entry(concern.id.clone()).or_insert(concern);
        }
        let mut cares = BTreeMap::new();
        for care in data.cares {
            cares.entry(care.id.clone()).or_insert(care);
        }
        let mut variants = BTreeMap::new();
        for variant in data.variants {
            variants.entry(variant.id.clone()).or_insert(variant);
        }
        let mut bundles = BTreeMap::new();
        for bundle in data.bundles {
            bundles.entry(bundle.concern_id.clone()).or_insert(bundle);
        }

        Self { concerns, cares, variants, bundles }
    }

    #[must_use]
    pub fn concern(&self, id: &ConcernId) -> Option<&Concern> {
        self.concerns.get(id)
    }

    #[must_use]
    pub fn care(&self, id: &CareId) -> Option<&Care> {
        self.cares.get(id)
    }

    #[must_use]
    pub fn variant(&self, id: &VariantId) -> Option<&CareVariant> {
        self.variants.get(id)
    }

    #[must_use]
    pub fn bundle_for(&self, id: &ConcernId) -> Option<&Bundle> {
        self.bundles.get(id)
    }

    /// All concerns, ascending by id.
    pub fn concerns(&self) -> impl Iterator<Item = &Concern> {
        self.concerns.values()
    }

    #[must_use]
    pub fn concern_count(&self) -> usize {
        self.concerns.len()
    }
}

fn situation_key(domain: &str, situation: &str) -> String {
    format!("{domain}:{situation}")
}

/// Inverted indices derived from a [`RecordStore`]. Disposable: rebuild
/// whenever the store is reloaded.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ConcernIndices {
    traits: BTreeMap<String, BTreeSet<ConcernId>>,
    domains: BTreeMap<String, BTreeSet<ConcernId>>,
    situations: BTreeMap<String, BTreeSet<ConcernId>>,
}

impl ConcernIndices {
    #[must_use]
    pub fn build(store: &RecordStore) -> Self {
        let mut traits: BTreeMap<String, BTreeSet<ConcernId>> = BTreeMap::new();
        let mut domains: BTreeMap<String, BTreeSet<ConcernId>> = BTreeMap::new();
        let mut situations: BTreeMap<String, BTreeSet<ConcernId>> = BTreeMap::new();

        for concern in store.concerns() {
            for trait_type in &concern.trait_types {
                traits.entry(trait_type.clone()).or_default().insert(concern.id.clone());
            }
            for (domain, labels) in &concern.situations {
                domains.entry(domain.clone()).or_default().insert(concern.id.clone());
                for label in labels {
                    situations
                        .entry(situation_key(domain, label))
                        .or_default()
                        .insert(concern.id.clone());
                }
            }
        }

        Self { traits, domains, situations }
    }

    #[must_use]
    pub fn trait_entry(&self, trait_type: &str) -> Option<&BTreeSet<ConcernId>> {
        self.traits.get(trait_type)
    }

    #[must_use]
    pub fn domain_entry(&self, domain: &str) -> Option<&BTreeSet<ConcernId>> {
        self.domains.get(domain)
    }

    #[must_use]
    pub fn situation_entry(&self, domain: &str, situation: &str) -> Option<&BTreeSet<ConcernId>> {
        self.situations.get(&situation_key(domain, situation))
    }
}

/// A user query. Empty `traits`/`situations` and an empty `domain` are
/// wildcards, not errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ConcernQuery {
    pub traits: Vec<String>,
    pub domain: String,
    pub situations: Vec<String>,
}

/// Evaluate a query: OR within each category, AND across categories.
///
/// Situations are always keyed under the query's domain, so situations with
/// an empty domain match nothing. The result is sorted ascending by concern
/// id; an empty result is valid.
#[must_use]
pub fn filter_concerns<'a>(
    store: &'a RecordStore,
    indices: &ConcernIndices,
    query: &ConcernQuery,
) -> Vec<&'a Concern> {
    let trait_match: Option<BTreeSet<ConcernId>> = if query.traits.is_empty() {
        None
    } else {
        let mut ids = BTreeSet::new();
        for trait_type in &query.traits {
            if let Some(entry) = indices.trait_entry(trait_type) {
                ids.extend(entry.iter().cloned());
            }
        }
        Some(ids)
    };

    let domain_match: Option<BTreeSet<ConcernId>> = if query.domain.is_empty() {
        None
    } else {
        Some(indices.domain_entry(&query.domain).cloned().unwrap_or_default())
    };

    let situation_match: Option<BTreeSet<ConcernId>> = if query.situations.is_empty() {
        None
    } else {
        let mut ids = BTreeSet::new();
        for situation in &query.situations {
            if let Some(entry) = indices.situation_entry(&query.domain, situation) {
                ids.extend(entry.iter().cloned());
            }
        }
        Some(ids)
    };

    let mut constrained: Option<BTreeSet<ConcernId>> = None;
    for category in [trait_match, domain_match, situation_match] {
        let Some(ids) = category else { continue };
        constrained = Some(match constrained {
            None => ids,
            Some(current) => current.intersection(&ids).cloned().collect(),
        });
    }

    match constrained {
        Some(ids) => ids.iter().filter_map(|id| store.concern(id)).collect(),
        None => store.concerns().collect(),
    }
}

const PLACEHOLDER_CARE_TITLE: &str = "unknown";
const BULLET_FALLBACK_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CareCard {
    pub care: Care,
    pub bullets: Vec<String>,
    pub detail: Vec<String>,
    pub difficulty: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcernView {
    pub concern: Concern,
    pub cards: Vec<CareCard>,
}

fn placeholder_care(id: &CareId) -> Care {
    Care {
        id: id.clone(),
        title: PLACEHOLDER_CARE_TITLE.to_string(),
        bullets: Vec::new(),
        tags: CareTags::default(),
    }
}

fn assemble_card(store: &RecordStore, entry: &BundleEntry, domain: &str) -> CareCard {
    let Some(care) = store.care(&entry.care_id) else {
        // Dangling care reference: the whole card degrades, variants included.
        return CareCard {
            care: placeholder_care(&entry.care_id),
            bullets: Vec::new(),
            detail: Vec::new(),
            difficulty: 0.0,
        };
    };
    let care = care.clone();

    // First variant resolving to the target domain wins; the data model
    // implies at most one per domain but does not enforce it.
    let variant = entry
        .variant_ids
        .iter()
        .filter_map(|id| store.variant(id))
        .find(|variant| variant.domain == domain);

    let detail = variant.map(|variant| variant.detail.clone()).unwrap_or_default();
    let bullets = if care.bullets.is_empty() {
        detail.iter().take(BULLET_FALLBACK_LIMIT).cloned().collect()
    } else {
        care.bullets.clone()
    };
    let difficulty = variant.map_or(0.0, |variant| variant.request_difficulty);

    CareCard { care, bullets, detail, difficulty }
}

/// Join filtered concerns with their bundled care options, scoped to one
/// domain. One [`ConcernView`] per input concern, in input order; a concern
/// without a bundle gets an empty card list. Dangling references degrade to
/// placeholders; this function never fails.
#[must_use]
pub fn assemble_views(
    store: &RecordStore,
    concerns: &[&Concern],
    domain: &str,
) -> Vec<ConcernView> {
    concerns
        .iter()
        .map(|concern| {
            let cards = store
                .bundle_for(&concern.id)
                .map(|bundle| {
                    bundle
                        .entries
                        .iter()
                        .map(|entry| assemble_card(store, entry, domain))
                        .collect()
                })
                .unwrap_or_default();

            ConcernView { concern: (*concern).clone(), cards }
        })
        .collect()
}

const HARD_LIMIT_PENALTY: f32 = 0.5;
const REASON_PHRASE_LIMIT: usize = 3;
const LEAD_TIME_GOOD_MAX_DAYS: f32 = 7.0;
const LEAD_TIME_HARD_MAX_DAYS: f32 = 45.0;
const UPKEEP_GOOD_MAX_HOURS: f32 = 2.0;
const UPKEEP_HARD_MAX_HOURS: f32 = 12.0;
const STAKEHOLDER_GOOD_MAX: f32 = 2.0;
const STAKEHOLDER_HARD_MAX: f32 = 10.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreWeights {
    pub cost: f32,
    pub difficulty: f32,
    pub psychological_ease: f32,
    pub effect_type: f32,
    pub legal_basis: f32,
    pub lead_time: f32,
    pub upkeep: f32,
    pub stakeholders: f32,
    pub expertise: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            cost: 0.18,
            difficulty: 0.16,
            psychological_ease: 0.16,
            effect_type: 0.20,
            legal_basis: 0.15,
            lead_time: 0.08,
            upkeep: 0.04,
            stakeholders: 0.02,
            expertise: 0.01,
        }
    }
}

impl ScoreWeights {
    fn sum(&self) -> f32 {
        self.cost
            + self.difficulty
            + self.psychological_ease
            + self.effect_type
            + self.legal_basis
            + self.lead_time
            + self.upkeep
            + self.stakeholders
            + self.expertise
    }

    fn normalized(self, sum: f32) -> Self {
        Self {
            cost: self.cost / sum,
            difficulty: self.difficulty / sum,
            psychological_ease: self.psychological_ease / sum,
            effect_type: self.effect_type / sum,
            legal_basis: self.legal_basis / sum,
            lead_time: self.lead_time / sum,
            upkeep: self.upkeep / sum,
            stakeholders: self.stakeholders / sum,
            expertise: self.expertise / sum,
        }
    }
}

#[must_use]
pub fn default_weights() -> ScoreWeights {
    ScoreWeights::default()
}

/// Per-field overrides for [`ScoreWeights`]; unset fields keep the default.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeightOverrides {
    pub cost: Option<f32>,
    pub difficulty: Option<f32>,
    pub psychological_ease: Option<f32>,
    pub effect_type: Option<f32>,
    pub legal_basis: Option<f32>,
    pub lead_time: Option<f32>,
    pub upkeep: Option<f32>,
    pub stakeholders: Option<f32>,
    pub expertise: Option<f32>,
}

/// Soft constraints: a violating candidate is penalized, never dropped.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HardLimits {
    pub max_cost: Option<Level>,
    pub max_difficulty: Option<Level>,
    pub min_legal: Option<LegalBasis>,
    pub max_lead_time_days: Option<f32>,
    pub max_upkeep_hours_per_month: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Preference {
    pub weights: WeightOverrides,
    pub hard_limits: HardLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CareCandidate {
    pub id: String,
    pub label: String,
    pub title: String,
    #[serde(default)]
    pub tags: CareTags,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CriterionScores {
    pub cost: f32,
    pub difficulty: f32,
    pub psychological_ease: f32,
    pub effect_type: f32,
    pub legal_basis: f32,
    pub lead_time: f32,
    pub upkeep: f32,
    pub stakeholders: f32,
    pub expertise: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub criteria: CriterionScores,
    pub weights: ScoreWeights,
    pub weighted_sum: f32,
    pub limit_violations: Vec<String>,
    pub bonuses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedCare {
    pub rank: usize,
    pub id: String,
    pub label: String,
    pub title: String,
    pub score: f32,
    pub badges: Vec<String>,
    pub reason: String,
    pub breakdown: Option<ScoreBreakdown>,
}

#[must_use]
pub fn rank_tie_breakers() -> Vec<String> {
    vec![
        "score desc".to_string(),
        "legal_basis_score desc".to_string(),
        "effect_type_score desc".to_string(),
        "cost_score desc".to_string(),
        "candidate_id asc".to_string(),
    ]
}

fn ordinal_score(level: Option<Level>) -> f32 {
    level.map_or(0.5, |level| match level {
        Level::Low => 1.0,
        Level::Medium => 0.5,
        Level::High => 0.0,
    })
}

// psychological_ease has the opposite polarity: "high" means easy to ask for.
fn inverted_ordinal_score(level: Option<Level>) -> f32 {
    level.map_or(0.5, |level| match level {
        Level::High => 1.0,
        Level::Medium => 0.5,
        Level::Low => 0.0,
    })
}

fn legal_basis_score(basis: Option<LegalBasis>) -> f32 {
    basis.map_or(0.5, |basis| match basis {
        LegalBasis::Mandatory => 1.0,
        LegalBasis::ReasonableEffort => 0.6,
        LegalBasis::Optional => 0.3,
    })
}

fn effect_type_score(effect: Option<&str>) -> f32 {
    match effect {
        None | Some("") => 0.5,
        Some("immediate") => 0.85,
        Some("broad-impact") => 0.75,
        Some("sustained") => 0.70,
        Some("localized") => 0.55,
        Some(_) => 0.6,
    }
}

fn inverse_linear_score(value: Option<f32>, good_max: f32, hard_max: f32) -> f32 {
    let Some(value) = value else { return 0.5 };
    if value <= good_max {
        1.0
    } else if value >= hard_max {
        0.0
    } else {
        (hard_max - value) / (hard_max - good_max)
    }
}

fn checked_weight(field: &str, value: f32) -> Result<f32, EngineError> {
    if !value.is_finite() || value < 0.0 {
        return Err(EngineError::Validation(format!(
            "weight `{field}` MUST be a finite non-negative number"
        )));
    }
    Ok(value)
}

fn resolve_weights(overrides: &WeightOverrides) -> Result<ScoreWeights, EngineError> {
    let defaults = ScoreWeights::default();
    let resolved = ScoreWeights {
        cost: checked_weight("cost", overrides.cost.unwrap_or(defaults.cost))?,
        difficulty: checked_weight("difficulty", overrides.difficulty.unwrap_or(defaults.difficulty))?,
        psychological_ease: checked_weight(
            "psychological_ease",
            overrides.psychological_ease.unwrap_or(defaults.psychological_ease),
        )?,
        effect_type: checked_weight(
            "effect_type",
            overrides.effect_type.unwrap_or(defaults.effect_type),
        )?,
        legal_basis: checked_weight(
            "legal_basis",
            overrides.legal_basis.unwrap_or(defaults.legal_basis),
        )?,
        lead_time: checked_weight("lead_time", overrides.lead_time.unwrap_or(defaults.lead_time))?,
        upkeep: checked_weight("upkeep", overrides.upkeep.unwrap_or(defaults.upkeep))?,
        stakeholders: checked_weight(
            "stakeholders",
            overrides.stakeholders.unwrap_or(defaults.stakeholders),
        )?,
        expertise: checked_weight("expertise", overrides.expertise.unwrap_or(defaults.expertise))?,
    };

    let sum = resolved.sum();
    if sum <= 0.0 {
        return Err(EngineError::Validation(
            "weights MUST resolve to a positive sum".to_string(),
        ));
    }

    Ok(resolved.normalized(sum))
}

fn checked_limit(field: &str, value: Option<f32>) -> Result<(), EngineError> {
    if let Some(value) = value {
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::Validation(format!(
                "hard limit `{field}` MUST be a finite non-negative number"
            )));
        }
    }
    Ok(())
}

fn validate_limits(limits: &HardLimits) -> Result<(), EngineError> {
    checked_limit("max_lead_time_days", limits.max_lead_time_days)?;
    checked_limit("max_upkeep_hours_per_month", limits.max_upkeep_hours_per_month)?;
    Ok(())
}

// A missing tag value never violates a limit: an option is only penalized
// for what its metadata actually states.
fn limit_violations(tags: &CareTags, limits: &HardLimits) -> Vec<String> {
    let mut violations = Vec::new();

    if let (Some(max), Some(cost)) = (limits.max_cost, tags.cost) {
        if cost.rank() > max.rank() {
            violations.push("max_cost".to_string());
        }
    }
    if let (Some(max), Some(difficulty)) = (limits.max_difficulty, tags.difficulty) {
        if difficulty.rank() > max.rank() {
            violations.push("max_difficulty".to_string());
        }
    }
    if let (Some(min), Some(basis)) = (limits.min_legal, tags.legal_basis) {
        if basis.rank() < min.rank() {
            violations.push("min_legal".to_string());
        }
    }
    if let (Some(max), Some(days)) = (limits.max_lead_time_days, tags.lead_time_days) {
        if days > max {
            violations.push("max_lead_time_days".to_string());
        }
    }
    if let (Some(max), Some(hours)) = (limits.max_upkeep_hours_per_month, tags.monthly_upkeep_hours)
    {
        if hours > max {
            violations.push("max_upkeep_hours_per_month".to_string());
        }
    }

    violations
}

fn rule_bonuses(tags: &CareTags) -> (f32, Vec<String>) {
    let mut total = 0.0_f32;
    let mut granted = Vec::new();

    if tags.cost == Some(Level::Low) && tags.difficulty == Some(Level::Low) {
        total += 0.03;
        granted.push("low_cost_low_difficulty".to_string());
    }
    if tags.legal_basis == Some(LegalBasis::Mandatory) {
        total += 0.02;
        granted.push("mandatory_legal_basis".to_string());
    }
    // An absent lead time does not qualify as a quick win.
    if tags.effect_type.as_deref() == Some("immediate")
        && tags.lead_time_days.is_some_and(|days| days <= LEAD_TIME_GOOD_MAX_DAYS)
    {
        total += 0.02;
        granted.push("quick_win".to_string());
    }

    (total, granted)
}

fn badges(tags: &CareTags) -> Vec<String> {
    let mut badges = Vec::new();
    if let Some(cost) = tags.cost {
        badges.push(format!("cost: {}", cost.as_str()));
    }
    if let Some(difficulty) = tags.difficulty {
        badges.push(format!("difficulty: {}", difficulty.as_str()));
    }
    if let Some(basis) = tags.legal_basis {
        badges.push(format!("legal_basis: {}", basis.as_str()));
    }
    if let Some(ease) = tags.psychological_ease {
        badges.push(format!("psychological_ease: {}", ease.as_str()));
    }
    if let Some(effect) = &tags.effect_type {
        if !effect.is_empty() {
            badges.push(format!("effect_type: {effect}"));
        }
    }
    badges
}

fn reason(tags: &CareTags) -> String {
    let mut phrases: Vec<&str> = Vec::new();

    if tags.cost == Some(Level::Low) {
        phrases.push("low cost");
    }
    if tags.difficulty == Some(Level::Low) {
        phrases.push("easy to set up");
    }
    if matches!(tags.legal_basis, Some(LegalBasis::Mandatory | LegalBasis::ReasonableEffort)) {
        phrases.push("strong legal footing");
    }
    if tags.psychological_ease == Some(Level::High) {
        phrases.push("comfortable to request");
    }
    if tags.lead_time_days.is_some_and(|days| days <= LEAD_TIME_GOOD_MAX_DAYS) {
        phrases.push("quick lead time");
    }
    // Absent upkeep counts as 0 and passes, unlike the lead-time check above.
    if tags.monthly_upkeep_hours.unwrap_or(0.0) <= UPKEEP_GOOD_MAX_HOURS {
        phrases.push("little ongoing upkeep");
    }
    if tags.effect_type.as_deref() == Some("immediate") {
        phrases.push("takes effect immediately");
    }

    phrases.truncate(REASON_PHRASE_LIMIT);
    if phrases.is_empty() {
        "balanced across all criteria".to_string()
    } else {
        phrases.join(", ")
    }
}

#[derive(Debug, Clone)]
struct ScoredCandidate<'a> {
    candidate: &'a CareCandidate,
    score: f32,
    criteria: CriterionScores,
    weighted_sum: f32,
    limit_violations: Vec<String>,
    bonuses: Vec<String>,
}

impl ScoredCandidate<'_> {
    fn cmp(lhs: &Self, rhs: &Self) -> Ordering {
        rhs.score
            .partial_cmp(&lhs.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                rhs.criteria
                    .legal_basis
                    .partial_cmp(&lhs.criteria.legal_basis)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| {
                rhs.criteria
                    .effect_type
                    .partial_cmp(&lhs.criteria.effect_type)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| {
                rhs.criteria.cost.partial_cmp(&lhs.criteria.cost).unwrap_or(Ordering::Equal)
            })
            .then_with(|| lhs.candidate.id.cmp(&rhs.candidate.id))
    }
}

fn score_candidate<'a>(
    candidate: &'a CareCandidate,
    weights: &ScoreWeights,
    limits: &HardLimits,
) -> ScoredCandidate<'a> {
    let tags = &candidate.tags;
    let criteria = CriterionScores {
        cost: ordinal_score(tags.cost),
        difficulty: ordinal_score(tags.difficulty),
        psychological_ease: inverted_ordinal_score(tags.psychological_ease),
        effect_type: effect_type_score(tags.effect_type.as_deref()),
        legal_basis: legal_basis_score(tags.legal_basis),
        lead_time: inverse_linear_score(
            tags.lead_time_days,
            LEAD_TIME_GOOD_MAX_DAYS,
            LEAD_TIME_HARD_MAX_DAYS,
        ),
        upkeep: inverse_linear_score(
            tags.monthly_upkeep_hours,
            UPKEEP_GOOD_MAX_HOURS,
            UPKEEP_HARD_MAX_HOURS,
        ),
        stakeholders: inverse_linear_score(
            tags.stakeholder_count,
            STAKEHOLDER_GOOD_MAX,
            STAKEHOLDER_HARD_MAX,
        ),
        expertise: ordinal_score(tags.expertise_required),
    };

    let weighted_sum = criteria.cost * weights.cost
        + criteria.difficulty * weights.difficulty
        + criteria.psychological_ease * weights.psychological_ease
        + criteria.effect_type * weights.effect_type
        + criteria.legal_basis * weights.legal_basis
        + criteria.lead_time * weights.lead_time
        + criteria.upkeep * weights.upkeep
        + criteria.stakeholders * weights.stakeholders
        + criteria.expertise * weights.expertise;

    let violations = limit_violations(tags, limits);
    let (bonus_total, bonuses) = rule_bonuses(tags);

    let mut score = weighted_sum + bonus_total;
    if !violations.is_empty() {
        score -= HARD_LIMIT_PENALTY;
    }
    let score = score.clamp(0.0, 1.0);

    ScoredCandidate { candidate, score, criteria, weighted_sum, limit_violations: violations, bonuses }
}

fn ranked_care(index: usize, scored: ScoredCandidate<'_>, weights: ScoreWeights) -> RankedCare {
    RankedCare {
        rank: index + 1,
        id: scored.candidate.id.clone(),
        label: scored.candidate.label.clone(),
        title: scored.candidate.title.clone(),
        score: scored.score,
        badges: badges(&scored.candidate.tags),
        reason: reason(&scored.candidate.tags),
        breakdown: Some(ScoreBreakdown {
            criteria: scored.criteria,
            weights,
            weighted_sum: scored.weighted_sum,
            limit_violations: scored.limit_violations,
            bonuses: scored.bonuses,
        }),
    }
}

/// Score and rank care candidates under a preference.
///
/// Output length always equals input length: candidates violating a hard
/// limit are penalized, never dropped. Ranking is descending by score with
/// a deterministic tie-break cascade ([`rank_tie_breakers`]).
///
/// # Errors
/// Returns [`EngineError::Validation`] when a weight override or numeric
/// hard limit is negative or non-finite, or when the resolved weights sum
/// to zero.
pub fn rank_cares(
    candidates: &[CareCandidate],
    preference: &Preference,
) -> Result<Vec<RankedCare>, EngineError> {
    let weights = resolve_weights(&preference.weights)?;
    validate_limits(&preference.hard_limits)?;

    let mut scored: Vec<ScoredCandidate<'_>> = candidates
        .iter()
        .map(|candidate| score_candidate(candidate, &weights, &preference.hard_limits))
        .collect();
    scored.sort_by(ScoredCandidate::cmp);

    Ok(scored
        .into_iter()
        .enumerate()
        .map(|(index, candidate)| ranked_care(index, candidate, weights))
        .collect())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcernRecommendation {
    pub concern: Concern,
    pub ranked: Vec<RankedCare>,
}

// Bundle-position labels: A, B, C, ... then the 1-based position past Z.
fn option_label(index: usize) -> String {
    u8::try_from(index).ok().filter(|index| *index < 26).map_or_else(
        || (index + 1).to_string(),
        |index| char::from(b'A' + index).to_string(),
    )
}

/// One-shot pipeline: filter concerns, assemble domain-scoped views, and
/// rank each concern's care options under the preference. Candidate labels
/// follow bundle position (`A`, `B`, `C`, ...).
///
/// # Errors
/// Returns [`EngineError::Validation`] when the preference is malformed;
/// see [`rank_cares`].
pub fn recommend(
    store: &RecordStore,
    indices: &ConcernIndices,
    query: &ConcernQuery,
    preference: &Preference,
) -> Result<Vec<ConcernRecommendation>, EngineError> {
    let matched = filter_concerns(store, indices, query);
    let views = assemble_views(store, &matched, &query.domain);

    views
        .into_iter()
        .map(|view| {
            let candidates: Vec<CareCandidate> = view
                .cards
                .iter()
                .enumerate()
                .map(|(index, card)| CareCandidate {
                    id: card.care.id.to_string(),
                    label: option_label(index),
                    title: card.care.title.clone(),
                    tags: card.care.tags.clone(),
                })
                .collect();
            let ranked = rank_cares(&candidates, preference)?;
            Ok(ConcernRecommendation { concern: view.concern, ranked })
        })
        .collect()
}
