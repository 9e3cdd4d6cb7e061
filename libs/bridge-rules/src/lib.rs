//! Machine status evaluation
//!
//! Maps a fixed-order vector of PLC bits to a machine status:
//!
//! - [`SymbolTable`]: declared address order to positional symbols (`a`, `b`, ..., `z`, `aa`, ...)
//! - [`Formula`]: restricted boolean formula over those symbols
//! - [`StatusFormula`]: priority-ordered `(priority, predicate, status)` rules, first match wins
//! - [`StatusEvaluator`]: symbol table plus rule set, checked against each other at load time
//!
//! ## Example
//!
//! ```
//! use bridge_rules::{Formula, StatusEvaluator, StatusFormula, StatusRule, SymbolTable};
//!
//! let table = SymbolTable::new(["M0", "Y4", "M3"]).unwrap();
//! let rules = StatusFormula::new(vec![
//!     StatusRule::new(0, Formula::parse(&table.expand("{M0}.{Y4}.(/{M3})").unwrap()).unwrap(), "run"),
//!     StatusRule::new(1, Formula::parse("c").unwrap(), "alarm"),
//! ]);
//! let evaluator = StatusEvaluator::new(table, rules).unwrap();
//!
//! assert_eq!(evaluator.evaluate(&[true, true, false], None).unwrap(), Some("run"));
//! assert_eq!(evaluator.evaluate(&[false, true, true], None).unwrap(), Some("alarm"));
//! ```

pub mod error;
pub mod formula;
pub mod status;
pub mod symbols;

pub use error::{EvaluationError, Result};
pub use formula::Formula;
pub use status::{StatusEvaluator, StatusFormula, StatusRule};
pub use symbols::{index_for_symbol, symbol_for_index, SymbolTable, MAX_SYMBOLS};
