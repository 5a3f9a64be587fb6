//! Direction-aware preload planning
//!
//! Splits the pages around the current one into priority tiers: the pages
//! on screen, the next page(s) in the reading direction, the page just
//! behind, and a wider normal ring weighted toward the reading direction.

use crate::queue::Priority;
use crate::PageIndex;

/// Priority of pages currently on screen
pub const PRIORITY_IMMEDIATE: Priority = 100;
/// Priority of the next page(s) in the reading direction
pub const PRIORITY_NEXT_HIGH: Priority = 90;
/// Priority of the page just behind the current one
pub const PRIORITY_PREV_HIGH: Priority = 80;
/// Priority of the first normal-tier page
pub const PRIORITY_NORMAL_START: Priority = 70;
/// Normal-tier priorities never drop below this
pub const PRIORITY_NORMAL_FLOOR: Priority = 50;
const PRIORITY_NORMAL_STEP: Priority = 5;

/// Default number of pages in the preload ring
pub const DEFAULT_PRELOAD_SIZE: usize = 10;
/// Default share of the ring placed ahead of the reader
pub const DEFAULT_FORWARD_RATIO: f64 = 0.7;

/// Reading direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    /// +1 for forward, -1 for backward
    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    /// Neighbouring page in this direction, if within `0..total`
    fn step(self, index: PageIndex, total: usize) -> Option<PageIndex> {
        match self {
            Direction::Forward => index.checked_add(1).filter(|next| *next < total),
            Direction::Backward => index.checked_sub(1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

/// Planning knobs, usually taken from the pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreloadOptions {
    pub preload_size: usize,
    /// Share of `preload_size` placed ahead of the reader, 0.0 to 1.0
    pub forward_ratio: f64,
    pub double_page: bool,
    pub direction: Direction,
}

impl Default for PreloadOptions {
    fn default() -> Self {
        Self {
            preload_size: DEFAULT_PRELOAD_SIZE,
            forward_ratio: DEFAULT_FORWARD_RATIO,
            double_page: false,
            direction: Direction::Forward,
        }
    }
}

impl PreloadOptions {
    /// Pages budgeted ahead of and behind the reader
    fn split(&self) -> (usize, usize) {
        let ratio = if self.forward_ratio.is_nan() {
            DEFAULT_FORWARD_RATIO
        } else {
            self.forward_ratio.clamp(0.0, 1.0)
        };
        // Trim float noise so 10 * 0.3 yields 3, not 4.
        let ahead = ((self.preload_size as f64 * ratio) - 1e-9).ceil().max(0.0) as usize;
        let ahead = ahead.min(self.preload_size);
        (ahead, self.preload_size - ahead)
    }
}

/// Pages to load around the current one, by tier.
///
/// Tiers are pairwise disjoint and every index lies in `0..total`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreloadPlan {
    pub immediate: Vec<PageIndex>,
    pub next_high: Vec<PageIndex>,
    pub prev_high: Vec<PageIndex>,
    pub normal: Vec<PageIndex>,
    pub direction: Direction,
}

impl PreloadPlan {
    pub fn len(&self) -> usize {
        self.immediate.len() + self.next_high.len() + self.prev_high.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every planned page, highest tier first
    pub fn pages(&self) -> impl Iterator<Item = PageIndex> + '_ {
        self.immediate
            .iter()
            .chain(&self.next_high)
            .chain(&self.prev_high)
            .chain(&self.normal)
            .copied()
    }

    pub fn contains(&self, index: PageIndex) -> bool {
        self.pages().any(|page| page == index)
    }
}

/// Tier a preload task came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreloadTier {
    Immediate,
    NextHigh,
    PrevHigh,
    Normal,
}

/// A planned page with its queue priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadTask {
    pub index: PageIndex,
    pub priority: Priority,
    pub tier: PreloadTier,
}

/// Compute the preload plan for `current` in a document of `total` pages.
///
/// Pure; an out-of-range `current` yields an empty plan. The high tiers are
/// planned even when `preload_size` is zero.
pub fn calculate_preload_plan(
    current: PageIndex,
    total: usize,
    options: &PreloadOptions,
) -> PreloadPlan {
    let direction = options.direction;
    let mut plan = PreloadPlan {
        direction,
        ..PreloadPlan::default()
    };
    if current >= total {
        return plan;
    }

    plan.immediate.push(current);
    if options.double_page && current + 1 < total {
        plan.immediate.push(current + 1);
    }
    let low = current;
    let high = plan.immediate[plan.immediate.len() - 1];
    let (ahead_edge, behind_edge) = match direction {
        Direction::Forward => (high, low),
        Direction::Backward => (low, high),
    };

    let next_count = if options.double_page { 2 } else { 1 };
    let mut cursor = ahead_edge;
    while plan.next_high.len() < next_count {
        match direction.step(cursor, total) {
            Some(next) => {
                plan.next_high.push(next);
                cursor = next;
            }
            None => break,
        }
    }

    if let Some(previous) = direction.reversed().step(behind_edge, total) {
        plan.prev_high.push(previous);
    }

    let (ahead_budget, behind_budget) = options.split();

    let mut remaining = ahead_budget.saturating_sub(plan.next_high.len());
    let mut cursor = plan.next_high.last().copied().unwrap_or(ahead_edge);
    while remaining > 0 {
        let Some(next) = direction.step(cursor, total) else {
            break;
        };
        plan.normal.push(next);
        cursor = next;
        remaining -= 1;
    }

    let mut remaining = behind_budget.saturating_sub(plan.prev_high.len());
    let mut cursor = plan.prev_high.last().copied().unwrap_or(behind_edge);
    while remaining > 0 {
        let Some(previous) = direction.reversed().step(cursor, total) else {
            break;
        };
        plan.normal.push(previous);
        cursor = previous;
        remaining -= 1;
    }

    plan
}

/// Flatten a plan into queue tasks with tiered priorities.
///
/// Normal-tier priorities start at 70 and fall by 5 per page, floored at 50.
pub fn plan_to_queue(plan: &PreloadPlan) -> Vec<PreloadTask> {
    let tiers = [
        (&plan.immediate, PRIORITY_IMMEDIATE, PreloadTier::Immediate),
        (&plan.next_high, PRIORITY_NEXT_HIGH, PreloadTier::NextHigh),
        (&plan.prev_high, PRIORITY_PREV_HIGH, PreloadTier::PrevHigh),
    ];
    let mut tasks: Vec<PreloadTask> = tiers
        .into_iter()
        .flat_map(|(pages, priority, tier)| {
            pages.iter().map(move |&index| PreloadTask {
                index,
                priority,
                tier,
            })
        })
        .collect();

    tasks.extend(plan.normal.iter().enumerate().map(|(offset, &index)| {
        let drop = PRIORITY_NORMAL_STEP.saturating_mul(offset as Priority);
        PreloadTask {
            index,
            priority: PRIORITY_NORMAL_START
                .saturating_sub(drop)
                .max(PRIORITY_NORMAL_FLOOR),
            tier: PreloadTier::Normal,
        }
    }));
    tasks
}

/// Tracks the reading direction across page changes.
///
/// Revisiting the same page keeps the previous direction.
#[derive(Debug, Clone, Default)]
pub struct PreloadStrategy {
    last_page: Option<PageIndex>,
    direction: Direction,
}

impl PreloadStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a page change and return the resulting direction
    pub fn track_page_direction(&mut self, page: PageIndex) -> Direction {
        if let Some(last) = self.last_page {
            if page > last {
                self.direction = Direction::Forward;
            } else if page < last {
                self.direction = Direction::Backward;
            }
        }
        self.last_page = Some(page);
        self.direction
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn last_page(&self) -> Option<PageIndex> {
        self.last_page
    }

    /// Forget history, e.g. when a new document is opened
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn options(preload_size: usize, double_page: bool, direction: Direction) -> PreloadOptions {
        PreloadOptions {
            preload_size,
            forward_ratio: 0.7,
            double_page,
            direction,
        }
    }

    #[test]
    fn test_single_page_forward_plan() {
        let plan = calculate_preload_plan(5, 20, &options(10, false, Direction::Forward));
        assert_eq!(plan.immediate, vec![5]);
        assert_eq!(plan.next_high, vec![6]);
        assert_eq!(plan.prev_high, vec![4]);
        assert_eq!(plan.normal, vec![7, 8, 9, 10, 11, 12, 3, 2]);
    }

    #[test]
    fn test_backward_plan_mirrors_forward() {
        let plan = calculate_preload_plan(10, 20, &options(10, false, Direction::Backward));
        assert_eq!(plan.immediate, vec![10]);
        assert_eq!(plan.next_high, vec![9]);
        assert_eq!(plan.prev_high, vec![11]);
        assert_eq!(plan.normal, vec![8, 7, 6, 5, 4, 3, 12, 13]);
    }

    #[test]
    fn test_double_page_plan() {
        let plan = calculate_preload_plan(4, 20, &options(10, true, Direction::Forward));
        assert_eq!(plan.immediate, vec![4, 5]);
        assert_eq!(plan.next_high, vec![6, 7]);
        assert_eq!(plan.prev_high, vec![3]);
        assert_eq!(plan.normal, vec![8, 9, 10, 11, 12, 2, 1]);
    }

    #[test]
    fn test_double_page_on_last_page() {
        let plan = calculate_preload_plan(19, 20, &options(10, true, Direction::Forward));
        assert_eq!(plan.immediate, vec![19]);
        assert!(plan.next_high.is_empty());
        assert_eq!(plan.prev_high, vec![18]);
        // No spill: the forward share is lost at the end of the document.
        assert_eq!(plan.normal, vec![17, 16]);
    }

    #[test]
    fn test_first_page_has_no_prev_high() {
        let plan = calculate_preload_plan(0, 5, &options(10, false, Direction::Forward));
        assert!(plan.prev_high.is_empty());
        assert_eq!(plan.next_high, vec![1]);
        assert_eq!(plan.normal, vec![2, 3, 4]);
    }

    #[test]
    fn test_zero_preload_size_keeps_high_tiers() {
        let plan = calculate_preload_plan(5, 20, &options(0, false, Direction::Forward));
        assert_eq!(plan.immediate, vec![5]);
        assert_eq!(plan.next_high, vec![6]);
        assert_eq!(plan.prev_high, vec![4]);
        assert!(plan.normal.is_empty());
    }

    #[test]
    fn test_out_of_range_current_is_empty() {
        assert!(calculate_preload_plan(5, 5, &PreloadOptions::default()).is_empty());
        assert!(calculate_preload_plan(0, 0, &PreloadOptions::default()).is_empty());
    }

    #[test]
    fn test_ratio_split_is_exact_for_round_numbers() {
        let mut opts = options(10, false, Direction::Forward);
        opts.forward_ratio = 0.3;
        assert_eq!(opts.split(), (3, 7));
        opts.forward_ratio = 1.0;
        assert_eq!(opts.split(), (10, 0));
        opts.forward_ratio = 0.0;
        assert_eq!(opts.split(), (0, 10));
        opts.forward_ratio = 0.55;
        assert_eq!(opts.split(), (6, 4));
        opts.forward_ratio = 7.0;
        assert_eq!(opts.split(), (10, 0));
    }

    #[test]
    fn test_plan_invariants_hold_for_random_inputs() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..2_000 {
            let total = rng.gen_range(0..60);
            let current = rng.gen_range(0..total.max(1) + 2);
            let opts = PreloadOptions {
                preload_size: rng.gen_range(0..30),
                forward_ratio: rng.gen_range(0.0..=1.0),
                double_page: rng.gen_bool(0.5),
                direction: if rng.gen_bool(0.5) {
                    Direction::Forward
                } else {
                    Direction::Backward
                },
            };
            let plan = calculate_preload_plan(current, total, &opts);

            let mut seen = HashSet::new();
            for page in plan.pages() {
                assert!(page < total, "page {page} outside 0..{total}");
                assert!(seen.insert(page), "page {page} planned twice: {plan:?}");
            }
            if current < total {
                assert_eq!(plan.immediate[0], current);
                assert!(plan.normal.len() <= opts.preload_size);
            } else {
                assert!(plan.is_empty());
            }
        }
    }

    #[test]
    fn test_plan_to_queue_priorities() {
        let plan = calculate_preload_plan(5, 20, &options(10, false, Direction::Forward));
        let tasks = plan_to_queue(&plan);
        let priorities: Vec<(PageIndex, Priority)> =
            tasks.iter().map(|task| (task.index, task.priority)).collect();

        assert_eq!(
            priorities,
            vec![
                (5, 100),
                (6, 90),
                (4, 80),
                (7, 70),
                (8, 65),
                (9, 60),
                (10, 55),
                (11, 50),
                (12, 50),
                (3, 50),
                (2, 50),
            ]
        );
        assert_eq!(tasks[0].tier, PreloadTier::Immediate);
        assert_eq!(tasks[3].tier, PreloadTier::Normal);
    }

    #[test]
    fn test_direction_tracking_is_sticky() {
        let mut strategy = PreloadStrategy::new();
        assert_eq!(strategy.track_page_direction(5), Direction::Forward);
        assert_eq!(strategy.track_page_direction(3), Direction::Backward);
        assert_eq!(strategy.track_page_direction(3), Direction::Backward);
        assert_eq!(strategy.track_page_direction(4), Direction::Forward);
        assert_eq!(strategy.last_page(), Some(4));

        strategy.reset();
        assert_eq!(strategy.direction(), Direction::Forward);
        assert_eq!(strategy.last_page(), None);
    }

    #[test]
    fn test_direction_helpers() {
        assert_eq!(Direction::Forward.sign(), 1);
        assert_eq!(Direction::Backward.sign(), -1);
        assert_eq!(Direction::Backward.reversed(), Direction::Forward);
        assert_eq!(Direction::Backward.step(0, 10), None);
        assert_eq!(Direction::Forward.step(9, 10), None);
        assert_eq!(Direction::Forward.as_str(), "forward");
    }
}
