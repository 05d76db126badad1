//! Head selection strategies.
//!
//! Every function here is pure over a candidate list already filtered to
//! active heads of the requested model type, in registration order. The only
//! state a strategy touches is the round-robin cursor, passed in as
//! `next_turn` so it only advances when a rotation actually happens.

use std::cmp::Ordering;

use fleet_common::{parse_size, HeadRecord, RoutingCriteria, RoutingPolicy, Strategy};

/// `strategy_config` key overriding the capacity threshold.
pub const CAPACITY_THRESHOLD_KEY: &str = "capacity_threshold";
/// `strategy_config` key overriding the predictive growth factor.
pub const GROWTH_FACTOR_KEY: &str = "growth_factor";

const DEFAULT_CAPACITY_THRESHOLD: f64 = 0.8;
const DEFAULT_GROWTH_FACTOR: f64 = 1.1;

/// Numeric knobs read from the policy's `strategy_config`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyTuning {
    /// Maximum load/capacity ratio for a head to count as having headroom.
    pub capacity_threshold: f64,
    /// Multiplier applied to the mean load when projecting future load.
    pub growth_factor: f64,
}

impl Default for StrategyTuning {
    fn default() -> Self {
        Self {
            capacity_threshold: DEFAULT_CAPACITY_THRESHOLD,
            growth_factor: DEFAULT_GROWTH_FACTOR,
        }
    }
}

impl StrategyTuning {
    pub fn from_policy(policy: &RoutingPolicy) -> Self {
        let read = |key: &str, default: f64| {
            policy
                .strategy_config
                .get(key)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(default)
        };
        Self {
            capacity_threshold: read(CAPACITY_THRESHOLD_KEY, DEFAULT_CAPACITY_THRESHOLD),
            growth_factor: read(GROWTH_FACTOR_KEY, DEFAULT_GROWTH_FACTOR),
        }
    }
}

/// A chosen head and a human-readable explanation.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a> {
    pub head: &'a HeadRecord,
    pub reason: String,
    /// False for round-robin picks, which must keep rotating.
    pub cacheable: bool,
}

impl<'a> Selection<'a> {
    fn new(head: &'a HeadRecord, reason: impl Into<String>) -> Self {
        Self {
            head,
            reason: reason.into(),
            cacheable: true,
        }
    }

    fn rotation(head: &'a HeadRecord, reason: impl Into<String>) -> Self {
        Self {
            cacheable: false,
            ..Self::new(head, reason)
        }
    }
}

/// Everything a strategy may consult besides the candidates.
pub struct SelectionContext<'c> {
    pub criteria: &'c RoutingCriteria,
    pub policy: &'c RoutingPolicy,
    pub tuning: StrategyTuning,
}

/// Run `strategy` over `candidates`.
pub fn select<'a>(
    strategy: Strategy,
    candidates: &'a [HeadRecord],
    ctx: &SelectionContext<'_>,
    next_turn: &mut dyn FnMut() -> usize,
) -> Option<Selection<'a>> {
    match strategy {
        Strategy::RoundRobin => round_robin(candidates, next_turn)
            .map(|h| Selection::rotation(h, "round robin rotation")),
        Strategy::LeastLoaded => least_loaded(candidates)
            .map(|h| Selection::new(h, format!("lowest current load ({})", h.current_load))),
        Strategy::GeoPreferred => geo_preferred(candidates, ctx.criteria, next_turn),
        Strategy::ModelSpecific => model_specific(candidates, ctx.criteria, &ctx.tuning)
            .map(|(h, score)| Selection::new(h, format!("best model match (score {})", score))),
        Strategy::Hybrid => hybrid(candidates, ctx.criteria),
        Strategy::Predictive => predictive(candidates, &ctx.tuning).map(|(h, projected)| {
            Selection::new(h, format!("lowest projected load ({:.1})", projected))
        }),
        Strategy::Adaptive => adaptive(candidates, ctx, next_turn),
    }
}

pub fn round_robin<'a>(
    candidates: &'a [HeadRecord],
    next_turn: &mut dyn FnMut() -> usize,
) -> Option<&'a HeadRecord> {
    if candidates.is_empty() {
        return None;
    }
    candidates.get(next_turn() % candidates.len())
}

/// Minimum `current_load`, ties broken by smallest head id.
pub fn least_loaded(candidates: &[HeadRecord]) -> Option<&HeadRecord> {
    candidates.iter().min_by(|a, b| {
        a.current_load
            .cmp(&b.current_load)
            .then_with(|| a.head_id.cmp(&b.head_id))
    })
}

/// First candidate (in registration order) located in `region`.
pub fn geo_match<'a>(candidates: &'a [HeadRecord], region: &str) -> Option<&'a HeadRecord> {
    if region.is_empty() {
        return None;
    }
    candidates.iter().find(|h| h.region == region)
}

fn geo_preferred<'a>(
    candidates: &'a [HeadRecord],
    criteria: &RoutingCriteria,
    next_turn: &mut dyn FnMut() -> usize,
) -> Option<Selection<'a>> {
    if let Some(head) = geo_match(candidates, &criteria.region_preference) {
        return Some(Selection::new(
            head,
            format!("matched preferred region {}", criteria.region_preference),
        ));
    }
    round_robin(candidates, next_turn)
        .map(|h| Selection::rotation(h, "no head in preferred region, round robin fallback"))
}

fn hybrid<'a>(candidates: &'a [HeadRecord], criteria: &RoutingCriteria) -> Option<Selection<'a>> {
    if let Some(head) = geo_match(candidates, &criteria.region_preference) {
        return Some(Selection::new(
            head,
            format!("matched preferred region {}", criteria.region_preference),
        ));
    }
    least_loaded(candidates).map(|h| {
        Selection::new(
            h,
            format!("no regional match, lowest current load ({})", h.current_load),
        )
    })
}

/// How well a head fits the model requirements in the criteria metadata.
pub fn model_score(head: &HeadRecord, criteria: &RoutingCriteria, tuning: &StrategyTuning) -> u32 {
    let mut score = 0;

    if let Some(wanted) = criteria.model_version() {
        if head.version == wanted {
            score += 3;
        } else if head.version.starts_with(wanted) {
            score += 2;
        }
    }

    if let Some(wanted) = criteria.model_size().and_then(parse_size) {
        if head.max_model_size().map(|max| max >= wanted).unwrap_or(false) {
            score += 2;
        }
    }

    if let Some(capability) = criteria.capability() {
        if head.has_capability(capability) {
            score += 2;
        }
    }

    if head.has_headroom(tuning.capacity_threshold) {
        score += 1;
    }

    score
}

/// Highest model score, ties broken by smallest head id.
pub fn model_specific<'a>(
    candidates: &'a [HeadRecord],
    criteria: &RoutingCriteria,
    tuning: &StrategyTuning,
) -> Option<(&'a HeadRecord, u32)> {
    candidates
        .iter()
        .map(|h| (h, model_score(h, criteria, tuning)))
        .max_by(|(a, sa), (b, sb)| sa.cmp(sb).then_with(|| b.head_id.cmp(&a.head_id)))
}

/// Projected load: the larger of the grown history mean and the current load.
pub fn projected_load(head: &HeadRecord, growth_factor: f64) -> f64 {
    let current = head.current_load as f64;
    match head.average_load() {
        Some(mean) => (mean * growth_factor).max(current),
        None => current,
    }
}

/// Lowest projected load, ties broken by smallest head id.
pub fn predictive<'a>(
    candidates: &'a [HeadRecord],
    tuning: &StrategyTuning,
) -> Option<(&'a HeadRecord, f64)> {
    candidates
        .iter()
        .map(|h| (h, projected_load(h, tuning.growth_factor)))
        .min_by(|(a, pa), (b, pb)| {
            pa.partial_cmp(pb)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.head_id.cmp(&b.head_id))
        })
}

fn adaptive<'a>(
    candidates: &'a [HeadRecord],
    ctx: &SelectionContext<'_>,
    next_turn: &mut dyn FnMut() -> usize,
) -> Option<Selection<'a>> {
    let threshold = ctx.tuning.capacity_threshold;

    if ctx.policy.enable_model_specific {
        if let Some((head, score)) = model_specific(candidates, ctx.criteria, &ctx.tuning) {
            if head.has_headroom(threshold) {
                return Some(Selection::new(
                    head,
                    format!("adaptive: model match with headroom (score {})", score),
                ));
            }
        }
    }

    if ctx.policy.enable_geo_routing {
        if let Some(head) = geo_match(candidates, &ctx.criteria.region_preference) {
            if head.has_headroom(threshold) {
                return Some(Selection::new(
                    head,
                    format!(
                        "adaptive: preferred region {} with headroom",
                        ctx.criteria.region_preference
                    ),
                ));
            }
        }
    }

    if ctx.policy.enable_load_balancing {
        predictive(candidates, &ctx.tuning).map(|(h, projected)| {
            Selection::new(
                h,
                format!("adaptive: lowest projected load ({:.1})", projected),
            )
        })
    } else {
        round_robin(candidates, next_turn)
            .map(|h| Selection::rotation(h, "adaptive: round robin rotation"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};

    use chrono::Utc;
    use fleet_common::HeadStatus;
    use rstest::rstest;

    fn head(id: &str, region: &str, load: u32) -> HeadRecord {
        let now = Utc::now();
        HeadRecord {
            head_id: id.to_string(),
            endpoint: format!("http://{}:8080", id),
            status: HeadStatus::Active,
            current_load: load,
            load_history: VecDeque::new(),
            region: region.to_string(),
            model_type: "llama-3".to_string(),
            version: "1.0".to_string(),
            metadata: HashMap::new(),
            last_heartbeat: now,
            registered_at: now,
            sequence: 0,
            revision: 0,
        }
    }

    fn with_meta(mut h: HeadRecord, key: &str, value: &str) -> HeadRecord {
        h.metadata.insert(key.to_string(), value.to_string());
        h
    }

    fn with_history(mut h: HeadRecord, samples: &[u32]) -> HeadRecord {
        h.load_history = samples.iter().copied().collect();
        h
    }

    fn pick(
        strategy: Strategy,
        candidates: &[HeadRecord],
        criteria: &RoutingCriteria,
        policy: &RoutingPolicy,
    ) -> Option<String> {
        let ctx = SelectionContext {
            criteria,
            policy,
            tuning: StrategyTuning::from_policy(policy),
        };
        let mut turn = 0;
        let mut next_turn = || {
            let t = turn;
            turn += 1;
            t
        };
        select(strategy, candidates, &ctx, &mut next_turn).map(|s| s.head.head_id.clone())
    }

    #[test]
    fn test_tuning_from_policy() {
        let mut policy = RoutingPolicy::default();
        assert_eq!(StrategyTuning::from_policy(&policy), StrategyTuning::default());

        policy
            .strategy_config
            .insert(CAPACITY_THRESHOLD_KEY.to_string(), "0.5".to_string());
        policy
            .strategy_config
            .insert(GROWTH_FACTOR_KEY.to_string(), "-2".to_string());
        let tuning = StrategyTuning::from_policy(&policy);
        assert_eq!(tuning.capacity_threshold, 0.5);
        assert_eq!(tuning.growth_factor, 1.1);
    }

    #[test]
    fn test_round_robin_rotates() {
        let candidates = vec![head("a", "", 0), head("b", "", 0), head("c", "", 0)];
        let mut cursor = 0;
        let mut next_turn = || {
            let t = cursor;
            cursor += 1;
            t
        };
        let picked: Vec<_> = (0..4)
            .map(|_| round_robin(&candidates, &mut next_turn).unwrap().head_id.clone())
            .collect();
        assert_eq!(picked, vec!["a", "b", "c", "a"]);
        assert!(round_robin(&[], &mut next_turn).is_none());
    }

    #[rstest]
    #[case::lowest_wins(&[("h1", 50), ("h2", 10), ("h3", 30)], "h2")]
    #[case::tie_smallest_id(&[("h2", 10), ("h1", 10)], "h1")]
    #[case::single(&[("only", 99)], "only")]
    fn test_least_loaded(#[case] loads: &[(&str, u32)], #[case] expected: &str) {
        let candidates: Vec<_> = loads.iter().map(|(id, l)| head(id, "", *l)).collect();
        assert_eq!(least_loaded(&candidates).unwrap().head_id, expected);
    }

    #[rstest]
    #[case::match_first_in_region("eu", "b")]
    #[case::no_match_falls_back("ap", "a")]
    #[case::empty_preference_falls_back("", "a")]
    fn test_geo_preferred(#[case] region: &str, #[case] expected: &str) {
        let candidates = vec![head("a", "us", 0), head("b", "eu", 0), head("c", "eu", 0)];
        let criteria = RoutingCriteria::new("llama-3").with_region(region);
        let policy = RoutingPolicy::default();
        assert_eq!(
            pick(Strategy::GeoPreferred, &candidates, &criteria, &policy).as_deref(),
            Some(expected)
        );
    }

    #[rstest]
    #[case::region_match("eu", "b")]
    #[case::least_loaded_fallback("ap", "c")]
    fn test_hybrid(#[case] region: &str, #[case] expected: &str) {
        let candidates = vec![head("a", "us", 40), head("b", "eu", 90), head("c", "us", 5)];
        let criteria = RoutingCriteria::new("llama-3").with_region(region);
        let policy = RoutingPolicy::default();
        assert_eq!(
            pick(Strategy::Hybrid, &candidates, &criteria, &policy).as_deref(),
            Some(expected)
        );
    }

    #[test]
    fn test_model_score_components() {
        let tuning = StrategyTuning::default();
        let h = with_meta(
            with_meta(
                with_meta(head("h1", "", 10), "max_model_size", "70b"),
                "capabilities",
                "chat,vision",
            ),
            "capacity",
            "100",
        );

        let exact = RoutingCriteria::new("llama-3")
            .with_metadata("model_version", "1.0")
            .with_metadata("model_size", "13b")
            .with_metadata("capability", "vision");
        assert_eq!(model_score(&h, &exact, &tuning), 3 + 2 + 2 + 1);

        let prefix = RoutingCriteria::new("llama-3").with_metadata("model_version", "1");
        assert_eq!(model_score(&h, &prefix, &tuning), 2 + 1);

        let too_big = RoutingCriteria::new("llama-3").with_metadata("model_size", "405b");
        assert_eq!(model_score(&h, &too_big, &tuning), 1);

        let mut busy = h.clone();
        busy.current_load = 95;
        assert_eq!(model_score(&busy, &RoutingCriteria::new("llama-3"), &tuning), 0);
    }

    #[test]
    fn test_model_specific_prefers_best_match() {
        let mut newer = head("b", "", 0);
        newer.version = "2.0".to_string();
        let candidates = vec![head("a", "", 0), newer];
        let criteria = RoutingCriteria::new("llama-3").with_metadata("model_version", "2.0");
        let policy = RoutingPolicy::default();
        assert_eq!(
            pick(Strategy::ModelSpecific, &candidates, &criteria, &policy).as_deref(),
            Some("b")
        );

        let no_hints = RoutingCriteria::new("llama-3");
        let tied = vec![head("z", "", 0), head("m", "", 0)];
        assert_eq!(
            pick(Strategy::ModelSpecific, &tied, &no_hints, &policy).as_deref(),
            Some("m")
        );
    }

    #[rstest]
    #[case::empty_history(&[], 40, 40.0)]
    #[case::growth_wins(&[50, 50], 10, 55.0)]
    #[case::current_wins(&[10, 10], 80, 80.0)]
    fn test_projected_load(#[case] history: &[u32], #[case] current: u32, #[case] expected: f64) {
        let h = with_history(head("h", "", current), history);
        assert!((projected_load(&h, 1.1) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_predictive_uses_history() {
        // b has a low current load but a heavy recent history.
        let candidates = vec![
            with_history(head("a", "", 30), &[30, 30, 30]),
            with_history(head("b", "", 10), &[90, 80, 10]),
        ];
        let criteria = RoutingCriteria::new("llama-3");
        let policy = RoutingPolicy::default();
        assert_eq!(
            pick(Strategy::Predictive, &candidates, &criteria, &policy).as_deref(),
            Some("a")
        );
    }

    #[test]
    fn test_adaptive_model_match_needs_headroom() {
        let mut matching = with_meta(head("a", "us", 90), "capacity", "100");
        matching.version = "2.0".to_string();
        let other = with_meta(head("b", "eu", 10), "capacity", "100");
        let candidates = vec![matching, other];

        let criteria = RoutingCriteria::new("llama-3")
            .with_region("us")
            .with_metadata("model_version", "2.0");
        let policy = RoutingPolicy::default();

        // a scores highest but is over 80% of capacity; the geo match is also a,
        // so the predictive fallback picks b.
        assert_eq!(
            pick(Strategy::Adaptive, &candidates, &criteria, &policy).as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_adaptive_geo_when_model_routing_disabled() {
        let candidates = vec![head("a", "us", 0), head("b", "eu", 50)];
        let criteria = RoutingCriteria::new("llama-3").with_region("eu");
        let policy = RoutingPolicy {
            enable_model_specific: false,
            ..Default::default()
        };
        assert_eq!(
            pick(Strategy::Adaptive, &candidates, &criteria, &policy).as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_adaptive_round_robin_when_everything_disabled() {
        let candidates = vec![head("a", "us", 90), head("b", "eu", 0)];
        let criteria = RoutingCriteria::new("llama-3").with_region("eu");
        let policy = RoutingPolicy {
            enable_model_specific: false,
            enable_geo_routing: false,
            enable_load_balancing: false,
            ..Default::default()
        };
        // First rotation turn is 0.
        assert_eq!(
            pick(Strategy::Adaptive, &candidates, &criteria, &policy).as_deref(),
            Some("a")
        );
    }

    #[rstest]
    #[case::round_robin(Strategy::RoundRobin, "ap", false)]
    #[case::geo_fallback(Strategy::GeoPreferred, "ap", false)]
    #[case::geo_match(Strategy::GeoPreferred, "eu", true)]
    #[case::least_loaded(Strategy::LeastLoaded, "ap", true)]
    fn test_rotation_picks_are_not_cacheable(
        #[case] strategy: Strategy,
        #[case] region: &str,
        #[case] cacheable: bool,
    ) {
        let candidates = vec![head("a", "eu", 0), head("b", "eu", 0)];
        let criteria = RoutingCriteria::new("llama-3").with_region(region);
        let policy = RoutingPolicy::default();
        let ctx = SelectionContext {
            criteria: &criteria,
            policy: &policy,
            tuning: StrategyTuning::default(),
        };
        let mut next_turn = || 0usize;
        let selection = select(strategy, &candidates, &ctx, &mut next_turn).unwrap();
        assert_eq!(selection.cacheable, cacheable);
    }

    #[test]
    fn test_adaptive_rotation_is_not_cacheable() {
        let candidates = vec![head("a", "us", 0), head("b", "eu", 0)];
        let criteria = RoutingCriteria::new("llama-3");
        let policy = RoutingPolicy {
            enable_model_specific: false,
            enable_geo_routing: false,
            enable_load_balancing: false,
            ..Default::default()
        };
        let ctx = SelectionContext {
            criteria: &criteria,
            policy: &policy,
            tuning: StrategyTuning::default(),
        };
        let mut next_turn = || 1usize;
        let selection = select(Strategy::Adaptive, &candidates, &ctx, &mut next_turn).unwrap();
        assert_eq!(selection.head.head_id, "b");
        assert!(!selection.cacheable);
    }

    #[test]
    fn test_custom_capacity_threshold() {
        let h = with_meta(head("a", "", 60), "capacity", "100");
        let mut policy = RoutingPolicy::default();
        assert!(h.has_headroom(StrategyTuning::from_policy(&policy).capacity_threshold));

        policy
            .strategy_config
            .insert(CAPACITY_THRESHOLD_KEY.to_string(), "0.5".to_string());
        assert!(!h.has_headroom(StrategyTuning::from_policy(&policy).capacity_threshold));
    }
}
