//! Priority-ordered status rules
//!
//! Rules are checked in ascending priority; the first satisfied rule that is
//! not suppressed by the previously reported status decides. An optional guard
//! formula must hold before any rule is considered (typically the PLC's
//! always-on bit, so a half-initialised bit vector never yields a status).

use crate::error::{EvaluationError, Result};
use crate::formula::Formula;
use crate::symbols::SymbolTable;
use tracing::trace;

/// One `(priority, predicate, status)` entry
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRule<S> {
    pub priority: u32,
    pub formula: Formula,
    pub status: S,
    /// Rule is skipped while the previous status is one of these
    pub suppressed_after: Vec<S>,
}

impl<S> StatusRule<S> {
    pub fn new(priority: u32, formula: Formula, status: S) -> Self {
        Self {
            priority,
            formula,
            status,
            suppressed_after: Vec::new(),
        }
    }

    pub fn suppressed_after(mut self, statuses: impl IntoIterator<Item = S>) -> Self {
        self.suppressed_after.extend(statuses);
        self
    }
}

/// Rule set sorted by priority
#[derive(Debug, Clone, PartialEq)]
pub struct StatusFormula<S> {
    guard: Option<Formula>,
    rules: Vec<StatusRule<S>>,
}

impl<S: Clone + PartialEq> StatusFormula<S> {
    /// Equal priorities keep their declaration order
    pub fn new(mut rules: Vec<StatusRule<S>>) -> Self {
        rules.sort_by_key(|rule| rule.priority);
        Self { guard: None, rules }
    }

    pub fn with_guard(mut self, guard: Formula) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn guard(&self) -> Option<&Formula> {
        self.guard.as_ref()
    }

    pub fn rules(&self) -> &[StatusRule<S>] {
        &self.rules
    }

    pub fn required_bits(&self) -> usize {
        self.rules
            .iter()
            .map(|rule| rule.formula.required_bits())
            .chain(self.guard.iter().map(Formula::required_bits))
            .max()
            .unwrap_or(0)
    }

    /// `Ok(None)` when the guard fails or no rule matches
    pub fn evaluate(&self, bits: &[bool], previous: Option<&S>) -> Result<Option<S>> {
        if let Some(guard) = &self.guard {
            if !guard.evaluate(bits)? {
                trace!("Status guard '{}' not satisfied", guard);
                return Ok(None);
            }
        }

        for rule in &self.rules {
            if !rule.formula.evaluate(bits)? {
                continue;
            }
            if previous.is_some_and(|prev| rule.suppressed_after.contains(prev)) {
                trace!(
                    "Rule {} '{}' matched but is suppressed after the previous status",
                    rule.priority,
                    rule.formula
                );
                continue;
            }
            return Ok(Some(rule.status.clone()));
        }

        Ok(None)
    }
}

/// Symbol table and rule set, validated against each other
#[derive(Debug, Clone)]
pub struct StatusEvaluator<S> {
    table: SymbolTable,
    formula: StatusFormula<S>,
}

impl<S: Clone + PartialEq> StatusEvaluator<S> {
    /// Fails when a rule references a symbol beyond the declared addresses
    pub fn new(table: SymbolTable, formula: StatusFormula<S>) -> Result<Self> {
        let rules = formula.rules.iter().map(|rule| &rule.formula);
        for f in rules.chain(formula.guard.iter()) {
            if f.required_bits() > table.len() {
                return Err(EvaluationError::MissingBit {
                    formula: f.source().to_string(),
                    symbol: crate::symbols::symbol_for_index(f.required_bits() - 1),
                    available: table.len(),
                });
            }
        }
        Ok(Self { table, formula })
    }

    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    pub fn formula(&self) -> &StatusFormula<S> {
        &self.formula
    }

    /// `bits` must hold one value per declared address, in declaration order
    pub fn evaluate(&self, bits: &[bool], previous: Option<S>) -> Result<Option<S>> {
        if bits.len() != self.table.len() {
            return Err(EvaluationError::BitCountMismatch {
                expected: self.table.len(),
                actual: bits.len(),
            });
        }
        self.formula.evaluate(bits, previous.as_ref())
    }
}
