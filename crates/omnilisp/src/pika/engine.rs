//! A generic packrat PEG engine (spec §4.P "Pika").
//!
//! This module knows nothing about Lisp syntax; [`crate::pika::grammar`]
//! builds the concrete OmniLisp grammar on top of it. Kept generic so the
//! fixpoint/memoization machinery — the actually hard part of this
//! component — is testable in isolation from string-interpolation and
//! dot-access desugaring concerns.

use ahash::AHashMap;

/// One PEG rule body. `Ref` names another rule in the same [`Grammar`],
/// resolved at evaluation time so mutually- and self-recursive rules
/// (including left-recursive ones) are expressible.
#[derive(Debug, Clone)]
pub enum RuleExpr {
    Terminal(&'static str),
    CharRange(char, char),
    AnyChar,
    Seq(Vec<RuleExpr>),
    /// Prioritized alternation: first success wins, no backtracking into
    /// a later alternative once one has matched (spec §4.P).
    Alt(Vec<RuleExpr>),
    Star(Box<RuleExpr>),
    Plus(Box<RuleExpr>),
    Opt(Box<RuleExpr>),
    PosLookahead(Box<RuleExpr>),
    NegLookahead(Box<RuleExpr>),
    Ref(&'static str),
}

/// A named grammar rule. `has_action` mirrors spec §4.P's two output
/// modes: in AST mode, a rule with an action invokes it; one without
/// returns its matched substring as a symbol.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: &'static str,
    pub expr: RuleExpr,
    pub has_action: bool,
}

#[derive(Debug, Default, Clone)]
pub struct Grammar {
    pub rules: Vec<Rule>,
    index: AHashMap<&'static str, usize>,
}

impl Grammar {
    pub fn add(&mut self, name: &'static str, expr: RuleExpr, has_action: bool) {
        let idx = self.rules.len();
        self.rules.push(Rule { name, expr, has_action });
        self.index.insert(name, idx);
    }

    #[must_use]
    pub fn rule(&self, name: &str) -> &Rule {
        &self.rules[self.index[name]]
    }
}

/// Output mode per spec §4.P: STRING returns the matched substring;
/// AST invokes semantic actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    String,
    Ast,
}

/// One packrat memo entry for `(rule, position)`: either not yet
/// attempted, a failure, or a success ending at `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoEntry {
    Unseeded,
    Fail,
    Success { end: usize },
}

/// The packrat memo table, indexed `[rule_index][position]`.
#[derive(Debug, Clone)]
pub struct MemoTable {
    rows: Vec<Vec<MemoEntry>>,
}

impl MemoTable {
    fn new(n_rules: usize, n_positions: usize) -> Self {
        Self {
            rows: vec![vec![MemoEntry::Unseeded; n_positions]; n_rules],
        }
    }

    #[must_use]
    pub fn get(&self, rule_idx: usize, pos: usize) -> MemoEntry {
        self.rows[rule_idx][pos]
    }

    fn set(&mut self, rule_idx: usize, pos: usize, entry: MemoEntry) {
        self.rows[rule_idx][pos] = entry;
    }
}

/// Recursion-depth cap while evaluating a single rule expression at a
/// single position (spec §4.P: "depth overflow (recursion cap 256)").
pub const MAX_EXPR_DEPTH: u32 = 256;

struct Evaluator<'g> {
    grammar: &'g Grammar,
    input: &'g [u8],
    memo: MemoTable,
}

impl<'g> Evaluator<'g> {
    /// Evaluates `expr` at `pos`, returning the end position on success.
    /// `depth` guards against runaway recursion in pathological grammars;
    /// it is distinct from the packrat `pos` sweep itself.
    fn eval_expr(&mut self, expr: &RuleExpr, pos: usize, depth: u32) -> Option<usize> {
        if depth > MAX_EXPR_DEPTH {
            return None;
        }
        match expr {
            RuleExpr::Terminal(s) => {
                let bytes = s.as_bytes();
                if pos + bytes.len() <= self.input.len() && &self.input[pos..pos + bytes.len()] == bytes {
                    Some(pos + bytes.len())
                } else {
                    None
                }
            }
            RuleExpr::CharRange(lo, hi) => {
                let ch = self.char_at(pos)?;
                if ch >= *lo && ch <= *hi { Some(pos + ch.len_utf8()) } else { None }
            }
            RuleExpr::AnyChar => {
                let ch = self.char_at(pos)?;
                Some(pos + ch.len_utf8())
            }
            RuleExpr::Seq(parts) => {
                let mut cur = pos;
                for p in parts {
                    cur = self.eval_expr(p, cur, depth + 1)?;
                }
                Some(cur)
            }
            RuleExpr::Alt(alts) => {
                for a in alts {
                    if let Some(end) = self.eval_expr(a, pos, depth + 1) {
                        return Some(end);
                    }
                }
                None
            }
            RuleExpr::Star(inner) => {
                let mut cur = pos;
                while let Some(end) = self.eval_expr(inner, cur, depth + 1) {
                    if end == cur {
                        break; // prevent infinite loop on a zero-width match
                    }
                    cur = end;
                }
                Some(cur)
            }
            RuleExpr::Plus(inner) => {
                let first = self.eval_expr(inner, pos, depth + 1)?;
                let mut cur = first;
                while let Some(end) = self.eval_expr(inner, cur, depth + 1) {
                    if end == cur {
                        break;
                    }
                    cur = end;
                }
                Some(cur)
            }
            RuleExpr::Opt(inner) => Some(self.eval_expr(inner, pos, depth + 1).unwrap_or(pos)),
            RuleExpr::PosLookahead(inner) => self.eval_expr(inner, pos, depth + 1).map(|_| pos),
            RuleExpr::NegLookahead(inner) => {
                if self.eval_expr(inner, pos, depth + 1).is_some() {
                    None
                } else {
                    Some(pos)
                }
            }
            RuleExpr::Ref(name) => self.eval_rule(name, pos),
        }
    }

    fn eval_rule(&mut self, name: &str, pos: usize) -> Option<usize> {
        let rule_idx = self.grammar.rules.iter().position(|r| r.name == name)?;
        match self.memo.get(rule_idx, pos) {
            MemoEntry::Success { end } => return Some(end),
            MemoEntry::Fail => return None,
            MemoEntry::Unseeded => {}
        }
        // Left recursion is seeded with failure, then grown: re-evaluating
        // the rule body at `pos` with the (still-failing) memo in place
        // lets any recursive call back to this rule bottom out immediately,
        // and the loop below grows the match as long as the end position
        // strictly increases (spec §4.P).
        self.memo.set(rule_idx, pos, MemoEntry::Fail);
        let expr = self.grammar.rules[rule_idx].expr.clone();
        let mut best: Option<usize> = None;
        loop {
            let attempt = self.eval_expr(&expr, pos, 0);
            match attempt {
                Some(end) if best.is_none_or(|b| end > b) => {
                    best = Some(end);
                    self.memo.set(rule_idx, pos, MemoEntry::Success { end });
                }
                _ => break,
            }
        }
        if best.is_none() {
            self.memo.set(rule_idx, pos, MemoEntry::Fail);
        }
        best
    }

    fn char_at(&self, pos: usize) -> Option<char> {
        std::str::from_utf8(&self.input[pos..]).ok()?.chars().next()
    }
}

/// Runs the right-to-left fixpoint sweep described in spec §4.P: for
/// every position from `n` down to `0`, re-evaluate every rule until the
/// memo table stops changing, bounded by `2 * rules.len()` iterations.
/// Returns the final memo table plus the character-length of the input
/// (used to index it), so callers can ask "did `rule` match at `pos`,
/// and if so where did it end."
#[must_use]
pub fn run_fixpoint(grammar: &Grammar, input: &str) -> (MemoTable, usize) {
    let bytes = input.as_bytes();
    let n = bytes.len();
    let mut ev = Evaluator {
        grammar,
        input: bytes,
        memo: MemoTable::new(grammar.rules.len(), n + 1),
    };
    let bound = 2 * grammar.rules.len().max(1);
    for pos in (0..=n).rev() {
        let mut iterations = 0;
        loop {
            let before: Vec<MemoEntry> = (0..grammar.rules.len()).map(|r| ev.memo.get(r, pos)).collect();
            for rule_idx in 0..grammar.rules.len() {
                // Clear prior Unseeded/Fail so re-evaluation can pick up rules
                // that depend on later positions settling first.
                let name = ev.grammar.rules[rule_idx].name;
                ev.memo.set(rule_idx, pos, MemoEntry::Unseeded);
                let result = ev.eval_rule(name, pos);
                ev.memo.set(
                    rule_idx,
                    pos,
                    result.map_or(MemoEntry::Fail, |end| MemoEntry::Success { end }),
                );
            }
            let after: Vec<MemoEntry> = (0..grammar.rules.len()).map(|r| ev.memo.get(r, pos)).collect();
            iterations += 1;
            if before == after || iterations >= bound {
                break;
            }
        }
    }
    (ev.memo, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digit_grammar() -> Grammar {
        let mut g = Grammar::default();
        g.add("digit", RuleExpr::CharRange('0', '9'), false);
        g.add("digits", RuleExpr::Plus(Box::new(RuleExpr::Ref("digit"))), false);
        g
    }

    #[test]
    fn plus_requires_at_least_one() {
        let g = digit_grammar();
        let (memo, _n) = run_fixpoint(&g, "abc");
        let idx = g.rules.iter().position(|r| r.name == "digits").unwrap();
        assert_eq!(memo.get(idx, 0), MemoEntry::Fail);
    }

    #[test]
    fn plus_matches_maximal_run() {
        let g = digit_grammar();
        let (memo, _n) = run_fixpoint(&g, "123abc");
        let idx = g.rules.iter().position(|r| r.name == "digits").unwrap();
        assert_eq!(memo.get(idx, 0), MemoEntry::Success { end: 3 });
    }

    #[test]
    fn left_recursive_rule_grows_to_longest_match() {
        // expr := expr '+' digit | digit
        let mut g = Grammar::default();
        g.add("digit", RuleExpr::CharRange('0', '9'), false);
        g.add(
            "expr",
            RuleExpr::Alt(vec![
                RuleExpr::Seq(vec![RuleExpr::Ref("expr"), RuleExpr::Terminal("+"), RuleExpr::Ref("digit")]),
                RuleExpr::Ref("digit"),
            ]),
            false,
        );
        let (memo, _n) = run_fixpoint(&g, "1+2+3");
        let idx = g.rules.iter().position(|r| r.name == "expr").unwrap();
        assert_eq!(memo.get(idx, 0), MemoEntry::Success { end: 5 });
    }

    #[test]
    fn prioritized_choice_never_backtracks_into_later_alt() {
        // a rule that would match "ab" via the first alt, even though the
        // second alt could match a longer string starting the same way.
        let mut g = Grammar::default();
        g.add(
            "r",
            RuleExpr::Alt(vec![RuleExpr::Terminal("ab"), RuleExpr::Terminal("abc")]),
            false,
        );
        let (memo, _n) = run_fixpoint(&g, "abc");
        let idx = g.rules.iter().position(|r| r.name == "r").unwrap();
        assert_eq!(memo.get(idx, 0), MemoEntry::Success { end: 2 });
    }
}
