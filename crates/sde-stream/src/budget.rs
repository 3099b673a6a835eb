//! Context window budgeting
//!
//! Fits a set of prioritized context windows into a token budget in three
//! escalating stages, each run only while the total is still above the
//! budget minus its safety buffer:
//!
//! 1. **Removal**: drop unprotected windows, lowest priority first, largest
//!    first within a priority.
//! 2. **Smart truncation**: shrink the largest windows, each by at most
//!    `max_truncation_ratio` of its own size and `excess_share` of the excess,
//!    keeping the part of the content that matters for its source type.
//! 3. **Compression**: scale every non-critical window by one global ratio,
//!    never below `min_window_tokens`.
//!
//! System and task windows are critical: never removed, truncated or
//! compressed. If the total still exceeds the budget afterwards the call
//! fails; it never returns an over-budget set.

use crate::config::BudgetConfig;
use crate::error::BudgetError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use sde_buffer::estimate_tokens;
use serde::{Deserialize, Serialize};

const HEAD_TAIL_MARKER: &str = "\n[... truncated ...]\n";
const MIDDLE_MARKER: &str = "\n[... middle truncated ...]\n";
const BODY_MARKER: &str = "\n[... file truncated ...]";

/// Where a context window came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    System,
    Task,
    User,
    Assistant,
    FileContext,
    Context,
}

impl SourceType {
    /// Never removed, truncated or compressed
    #[inline]
    #[must_use]
    pub fn is_critical(self) -> bool {
        matches!(self, Self::System | Self::Task)
    }
}

/// Prioritized unit of prompt or background text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub id: String,
    pub content: String,
    pub token_count: usize,
    /// Higher is more essential
    pub priority: i32,
    pub source: SourceType,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
}

impl ContextWindow {
    /// Create window, estimating its token count
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        source: SourceType,
        priority: i32,
        content: impl Into<String>,
        chars_per_token: usize,
    ) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            token_count: estimate_tokens(&content, chars_per_token),
            content,
            priority,
            source,
            timestamp: Utc::now(),
            metadata: IndexMap::new(),
        }
    }

    /// Attach one metadata entry (e.g. a relevance score)
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[inline]
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.source.is_critical()
    }
}

/// Stage that changed the window set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStage {
    Removal,
    SmartTruncation,
    Compression,
}

/// Budgeted window set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetOutcome {
    /// Surviving windows, in input order
    pub windows: Vec<ContextWindow>,
    pub original_tokens: usize,
    pub total_tokens: usize,
    /// Ids of removed windows
    pub removed: Vec<String>,
    /// Ids of truncated or compressed windows
    pub truncated: Vec<String>,
    /// Stages that ran
    pub stages: Vec<BudgetStage>,
}

impl BudgetOutcome {
    /// Whether any stage changed the input
    #[inline]
    #[must_use]
    pub fn was_optimized(&self) -> bool {
        !self.stages.is_empty()
    }
}

/// Three-stage context budgeter
#[derive(Debug, Clone, Default)]
pub struct ContextBudgeter {
    config: BudgetConfig,
}

fn total(windows: &[ContextWindow]) -> usize {
    windows.iter().map(|w| w.token_count).sum()
}

impl ContextBudgeter {
    #[inline]
    #[must_use]
    pub fn new(config: BudgetConfig) -> Self {
        Self { config }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Token total the stages aim for
    #[must_use]
    pub fn target(&self, max_tokens: usize) -> usize {
        let buffer = self.config.safety_buffer.clamp(0.0, 1.0);
        (max_tokens as f64 * (1.0 - buffer)).floor() as usize
    }

    /// Fit `windows` into `max_tokens`
    ///
    /// # Errors
    /// `ContextWindowExceeded` if the windows still exceed `max_tokens` after
    /// every stage; `InvalidBudget` for a zero budget
    pub fn optimize(
        &self,
        windows: Vec<ContextWindow>,
        max_tokens: usize,
    ) -> Result<BudgetOutcome, BudgetError> {
        if max_tokens == 0 {
            return Err(BudgetError::InvalidBudget(max_tokens));
        }
        let target = self.target(max_tokens);
        let original_tokens = total(&windows);
        let mut outcome = BudgetOutcome {
            windows,
            original_tokens,
            total_tokens: original_tokens,
            removed: Vec::new(),
            truncated: Vec::new(),
            stages: Vec::new(),
        };

        if outcome.total_tokens > target {
            self.remove(&mut outcome, target);
        }
        if outcome.total_tokens > target {
            self.smart_truncate(&mut outcome, target);
        }
        if outcome.total_tokens > target {
            self.compress(&mut outcome, target);
        }

        if outcome.total_tokens > max_tokens {
            tracing::warn!(
                required = outcome.total_tokens,
                budget = max_tokens,
                "context window exceeded"
            );
            return Err(BudgetError::ContextWindowExceeded {
                required: outcome.total_tokens,
                budget: max_tokens,
            });
        }
        if outcome.was_optimized() {
            tracing::info!(
                original = original_tokens,
                optimized = outcome.total_tokens,
                removed = outcome.removed.len(),
                truncated = outcome.truncated.len(),
                "context optimized"
            );
        }
        Ok(outcome)
    }

    fn remove(&self, outcome: &mut BudgetOutcome, target: usize) {
        // indices, not ids: ids are caller supplied and may repeat
        let mut candidates: Vec<usize> = (0..outcome.windows.len())
            .filter(|&i| {
                let w = &outcome.windows[i];
                !w.is_critical() && w.priority < self.config.protected_priority
            })
            .collect();
        candidates.sort_by(|&a, &b| {
            let (wa, wb) = (&outcome.windows[a], &outcome.windows[b]);
            wa.priority
                .cmp(&wb.priority)
                .then_with(|| wb.token_count.cmp(&wa.token_count))
        });

        let mut doomed = Vec::new();
        for i in candidates {
            if outcome.total_tokens <= target {
                break;
            }
            outcome.total_tokens -= outcome.windows[i].token_count;
            doomed.push(i);
        }
        if doomed.is_empty() {
            return;
        }

        outcome.removed = doomed.iter().map(|&i| outcome.windows[i].id.clone()).collect();
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        for i in doomed {
            outcome.windows.remove(i);
        }
        outcome.stages.push(BudgetStage::Removal);
        tracing::debug!(removed = outcome.removed.len(), total = outcome.total_tokens, "removal stage");
    }

    fn smart_truncate(&self, outcome: &mut BudgetOutcome, target: usize) {
        let excess = outcome.total_tokens - target;
        let share_cap = (excess as f64 * self.config.excess_share).ceil() as usize;
        let mut order: Vec<usize> = (0..outcome.windows.len())
            .filter(|&i| {
                let w = &outcome.windows[i];
                !w.is_critical() && w.token_count > self.config.min_window_tokens
            })
            .collect();
        order.sort_by(|&a, &b| outcome.windows[b].token_count.cmp(&outcome.windows[a].token_count));

        let mut changed = false;
        for i in order {
            if outcome.total_tokens <= target {
                break;
            }
            let tokens = outcome.windows[i].token_count;
            let own_cap = (tokens as f64 * self.config.max_truncation_ratio).floor() as usize;
            let cut = own_cap.min(share_cap);
            let goal = tokens.saturating_sub(cut).max(self.config.min_window_tokens);
            if goal < tokens && self.shrink(outcome, i, goal) {
                changed = true;
            }
        }
        if changed {
            outcome.stages.push(BudgetStage::SmartTruncation);
            tracing::debug!(total = outcome.total_tokens, "smart truncation stage");
        }
    }

    fn compress(&self, outcome: &mut BudgetOutcome, target: usize) {
        let critical: usize = outcome
            .windows
            .iter()
            .filter(|w| w.is_critical())
            .map(|w| w.token_count)
            .sum();
        let flexible = outcome.total_tokens - critical;
        if flexible == 0 {
            return;
        }
        let ratio = target.saturating_sub(critical) as f64 / flexible as f64;

        let mut changed = false;
        for i in 0..outcome.windows.len() {
            let w = &outcome.windows[i];
            if w.is_critical() {
                continue;
            }
            let goal = ((w.token_count as f64 * ratio).floor() as usize).max(self.config.min_window_tokens);
            if goal < w.token_count && self.shrink(outcome, i, goal) {
                changed = true;
            }
        }
        if changed {
            outcome.stages.push(BudgetStage::Compression);
            tracing::debug!(ratio, total = outcome.total_tokens, "compression stage");
        }
    }

    /// Truncate window `i` to at most `goal` tokens; false if nothing changed
    fn shrink(&self, outcome: &mut BudgetOutcome, i: usize, goal: usize) -> bool {
        let window = &mut outcome.windows[i];
        let cpt = self.config.chars_per_token.max(1);
        let content = truncate_for_source(&window.content, window.source, goal * cpt);
        let tokens = estimate_tokens(&content, cpt).min(window.token_count);
        if tokens >= window.token_count && content == window.content {
            return false;
        }
        outcome.total_tokens = outcome.total_tokens - window.token_count + tokens;
        window.content = content;
        window.token_count = tokens;
        if !outcome.truncated.contains(&window.id) {
            outcome.truncated.push(window.id.clone());
        }
        true
    }
}

fn head(chars: &[char], n: usize) -> String {
    chars[..n.min(chars.len())].iter().collect()
}

fn tail(chars: &[char], n: usize) -> String {
    chars[chars.len() - n.min(chars.len())..].iter().collect()
}

fn head_and_tail(chars: &[char], budget: usize, marker: &str) -> String {
    let marker_len = marker.chars().count();
    if budget <= marker_len + 2 {
        return head(chars, budget);
    }
    let room = budget - marker_len;
    let head_len = room.div_ceil(2);
    format!("{}{marker}{}", head(chars, head_len), tail(chars, room - head_len))
}

fn is_header_line(line: &str) -> bool {
    let t = line.trim_start();
    t.is_empty()
        || [
            "import ", "from ", "use ", "#include", "package ", "//", "#", "/*", "*", "\"use ", "'use ",
            "extern crate", "mod ", "require(",
        ]
        .iter()
        .any(|p| t.starts_with(p))
}

fn file_context(content: &str, chars: &[char], budget: usize) -> String {
    let header_chars: usize = content
        .split_inclusive('\n')
        .take_while(|line| is_header_line(line))
        .map(|line| line.chars().count())
        .sum();
    let marker_len = BODY_MARKER.chars().count();
    if header_chars + marker_len >= budget {
        return head(chars, budget);
    }
    let body_room = budget - marker_len;
    format!("{}{BODY_MARKER}", head(chars, body_room))
}

/// Cut `content` to at most `budget` characters, keeping what matters for `source`
#[must_use]
pub fn truncate_for_source(content: &str, source: SourceType, budget: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= budget {
        return content.to_string();
    }
    match source {
        SourceType::System => head_and_tail(&chars, budget, HEAD_TAIL_MARKER),
        SourceType::User | SourceType::Task => head(&chars, budget),
        SourceType::FileContext => file_context(content, &chars, budget),
        SourceType::Assistant | SourceType::Context => head_and_tail(&chars, budget, MIDDLE_MARKER),
    }
}
