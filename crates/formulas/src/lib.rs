//! # sheetstore formulas
//!
//! Formula parsing and evaluation.
//! Includes the function registry for standard functions (SUM, IF, CONCAT, etc.)
//! and an [`Evaluator`] that resolves cell references through a [`CellSource`],
//! memoizing every cell it computes.

use sheetstore_primitives::{CellAddress, CellRange, ErrorValue, Value};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

pub mod functions;
pub mod parser;

pub use parser::parse_formula;

/// Nested evaluation steps (expression nodes and referenced cells) allowed
/// before giving up.
pub const MAX_EVAL_DEPTH: usize = 512;
/// Longest formula text accepted, in characters.
pub const MAX_FORMULA_LEN: usize = 8192;
/// Parentheses, function calls and signs one formula may nest.
pub const MAX_FORMULA_NESTING: usize = 64;
/// Deepest expression tree one formula may parse into.
pub const MAX_EXPR_DEPTH: usize = 256;
/// Largest range a single reference may materialize.
pub const MAX_RANGE_CELLS: u64 = 250_000;

/// Formula expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaExpr {
    /// Literal value
    Literal(Value),
    /// Cell reference, optionally sheet-qualified (e.g. `Sheet1!A1`)
    CellRef {
        sheet: Option<String>,
        addr: CellAddress,
    },
    /// Range reference, optionally sheet-qualified (e.g. `Sheet1!A1:B2`)
    RangeRef {
        sheet: Option<String>,
        range: CellRange,
    },
    /// Function call
    FunctionCall { name: String, args: Vec<FormulaExpr> },
    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<FormulaExpr>,
        right: Box<FormulaExpr>,
    },
    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        expr: Box<FormulaExpr>,
    },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Concat,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Percent,
}

/// Formula errors.
///
/// These describe formulas that cannot be evaluated at all. A formula that
/// evaluates to an Excel error such as `#DIV/0!` is a successful evaluation
/// producing [`Value::Error`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormulaError {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Invalid argument count for {0}: expected {1}, got {2}")]
    InvalidArgCount(String, String, usize),
    #[error("Circular reference detected at {0}")]
    CircularReference(String),
    #[error("Unknown sheet: {0}")]
    UnknownSheet(String),
    #[error("Evaluation nesting exceeds {MAX_EVAL_DEPTH} levels")]
    DepthExceeded,
    #[error("Range {0} is too large to evaluate")]
    RangeTooLarge(String),
}

/// Raw content of a stored cell as seen by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent<'a> {
    /// A literal value.
    Value(Value),
    /// A formula expression, with or without the leading `=`.
    Formula(&'a str),
}

/// Where the evaluator looks up referenced cells.
///
/// Sheet names are matched case-insensitively by implementors.
pub trait CellSource {
    fn has_sheet(&self, sheet: &str) -> bool;
    /// Content of a cell, `None` when the cell is blank.
    fn cell(&self, sheet: &str, addr: CellAddress) -> Option<CellContent<'_>>;
}

pub type FunctionImpl = fn(&[Value]) -> Value;

/// Function definition
pub struct FunctionDefinition {
    pub min_args: usize,
    pub max_args: Option<usize>,
    /// When false, the first error argument is returned without calling `eval`.
    pub accepts_errors: bool,
    pub eval: FunctionImpl,
}

impl FunctionDefinition {
    /// Fixed number of arguments
    pub fn fixed(args: usize, eval: FunctionImpl) -> Self {
        Self::range(args, args, eval)
    }

    /// Variable number of arguments
    pub fn variadic(min: usize, eval: FunctionImpl) -> Self {
        Self {
            min_args: min,
            max_args: None,
            accepts_errors: false,
            eval,
        }
    }

    /// Range of arguments
    pub fn range(min: usize, max: usize, eval: FunctionImpl) -> Self {
        Self {
            min_args: min,
            max_args: Some(max),
            accepts_errors: false,
            eval,
        }
    }

    /// Hand error arguments to the function instead of short-circuiting.
    pub fn with_errors(mut self) -> Self {
        self.accepts_errors = true;
        self
    }

    fn validate_arg_count(&self, provided: usize) -> Result<(), String> {
        let too_many = self.max_args.is_some_and(|max| provided > max);
        if provided < self.min_args || too_many {
            return Err(self.expected_args_label());
        }
        Ok(())
    }

    fn expected_args_label(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => format!("{}", self.min_args),
            Some(max) => format!("{}..{}", self.min_args, max),
            None => format!("{}+", self.min_args),
        }
    }
}

/// Registry of available functions
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionDefinition>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };
        registry.register_standard_functions();
        registry
    }
}

impl FunctionRegistry {
    /// Shared registry holding the standard functions.
    pub fn standard() -> &'static FunctionRegistry {
        static STANDARD: OnceLock<FunctionRegistry> = OnceLock::new();
        STANDARD.get_or_init(FunctionRegistry::default)
    }

    fn register_standard_functions(&mut self) {
        use functions as f;

        // Math
        self.register("SUM", FunctionDefinition::variadic(1, f::sum));
        self.register("AVERAGE", FunctionDefinition::variadic(1, f::average));
        self.register("COUNT", FunctionDefinition::variadic(1, f::count).with_errors());
        self.register("COUNTA", FunctionDefinition::variadic(1, f::counta).with_errors());
        self.register("MIN", FunctionDefinition::variadic(1, f::min));
        self.register("MAX", FunctionDefinition::variadic(1, f::max));
        self.register("PRODUCT", FunctionDefinition::variadic(1, f::product));
        self.register("ABS", FunctionDefinition::fixed(1, f::abs));
        self.register("ROUND", FunctionDefinition::range(1, 2, f::round));
        self.register("ROUNDUP", FunctionDefinition::range(1, 2, f::roundup));
        self.register("ROUNDDOWN", FunctionDefinition::range(1, 2, f::rounddown));
        self.register("INT", FunctionDefinition::fixed(1, f::int));
        self.register("MOD", FunctionDefinition::fixed(2, f::modulo));
        self.register("POWER", FunctionDefinition::fixed(2, f::power));
        self.register("SQRT", FunctionDefinition::fixed(1, f::sqrt));

        // Logical
        self.register("AND", FunctionDefinition::variadic(1, f::and));
        self.register("OR", FunctionDefinition::variadic(1, f::or));
        self.register("NOT", FunctionDefinition::fixed(1, f::not));

        // Text
        self.register("CONCAT", FunctionDefinition::variadic(1, f::concat));
        self.register("CONCATENATE", FunctionDefinition::variadic(1, f::concat));
        self.register("LEN", FunctionDefinition::fixed(1, f::len));
        self.register("UPPER", FunctionDefinition::fixed(1, f::upper));
        self.register("LOWER", FunctionDefinition::fixed(1, f::lower));
        self.register("TRIM", FunctionDefinition::fixed(1, f::trim));
        self.register("LEFT", FunctionDefinition::range(1, 2, f::left));
        self.register("RIGHT", FunctionDefinition::range(1, 2, f::right));
        self.register("MID", FunctionDefinition::fixed(3, f::mid));

        // Information
        self.register("ISBLANK", FunctionDefinition::fixed(1, f::isblank).with_errors());
        self.register("ISNUMBER", FunctionDefinition::fixed(1, f::isnumber).with_errors());
        self.register("ISTEXT", FunctionDefinition::fixed(1, f::istext).with_errors());
        self.register("ISERROR", FunctionDefinition::fixed(1, f::iserror).with_errors());

        // Date
        self.register("DATE", FunctionDefinition::fixed(3, f::date));
        self.register("TODAY", FunctionDefinition::fixed(0, f::today));
    }

    fn register(&mut self, name: &str, def: FunctionDefinition) {
        self.functions.insert(name.to_uppercase(), def);
    }

    /// Check if a function exists
    pub fn has_function(&self, name: &str) -> bool {
        is_lazy_function(name) || self.functions.contains_key(&name.to_uppercase())
    }

    /// Get a function definition by name
    pub fn get(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.get(&name.to_uppercase())
    }
}

/// Functions whose arguments are evaluated on demand by the evaluator itself.
fn is_lazy_function(name: &str) -> bool {
    matches!(name.to_uppercase().as_str(), "IF" | "IFERROR")
}

type CacheKey = (String, CellAddress);

/// Evaluates formulas against a [`CellSource`].
///
/// Every formula cell computed through one evaluator is cached, so a batch
/// of reads sharing an evaluator computes each cell at most once. Reference
/// cycles are reported as [`FormulaError::CircularReference`].
pub struct Evaluator<'a, S: CellSource + ?Sized> {
    source: &'a S,
    functions: &'a FunctionRegistry,
    cache: RefCell<HashMap<CacheKey, Result<Value, FormulaError>>>,
    in_progress: RefCell<HashSet<CacheKey>>,
    depth: Cell<usize>,
}

impl<'a, S: CellSource + ?Sized> Evaluator<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self::with_registry(source, FunctionRegistry::standard())
    }

    pub fn with_registry(source: &'a S, functions: &'a FunctionRegistry) -> Self {
        Self {
            source,
            functions,
            cache: RefCell::new(HashMap::new()),
            in_progress: RefCell::new(HashSet::new()),
            depth: Cell::new(0),
        }
    }

    /// Number of formula cells evaluated so far.
    pub fn cached_cells(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Evaluate formula text as if it were entered on `sheet`.
    pub fn evaluate(&self, sheet: &str, formula: &str) -> Result<Value, FormulaError> {
        let expr = parse_formula(formula)?;
        let value = self.eval_expr(&expr, sheet)?;
        Ok(finish(value))
    }

    /// Value of a stored cell: literals as stored, formulas evaluated.
    ///
    /// Blank cells yield [`Value::Empty`]. A formula whose result is blank
    /// yields `0`, as in Excel.
    pub fn evaluate_cell(&self, sheet: &str, addr: CellAddress) -> Result<Value, FormulaError> {
        if !self.source.has_sheet(sheet) {
            return Err(FormulaError::UnknownSheet(sheet.to_string()));
        }
        match self.source.cell(sheet, addr) {
            None => Ok(Value::Empty),
            Some(CellContent::Value(value)) => Ok(value),
            Some(CellContent::Formula(text)) => self.evaluate_formula_cell(sheet, addr, text),
        }
    }

    fn evaluate_formula_cell(
        &self,
        sheet: &str,
        addr: CellAddress,
        text: &str,
    ) -> Result<Value, FormulaError> {
        let key = (sheet.to_lowercase(), addr);
        if let Some(cached) = self.cache.borrow().get(&key) {
            return cached.clone();
        }
        if !self.in_progress.borrow_mut().insert(key.clone()) {
            return Err(FormulaError::CircularReference(format!("{sheet}!{addr}")));
        }
        let result = self.nested(|| {
            parse_formula(text)
                .and_then(|expr| self.eval_expr(&expr, sheet))
                .map(finish)
        });
        self.in_progress.borrow_mut().remove(&key);
        self.cache.borrow_mut().insert(key, result.clone());
        result
    }

    /// Run `step` one level deeper, failing once the depth budget is spent.
    fn nested<T>(
        &self,
        step: impl FnOnce() -> Result<T, FormulaError>,
    ) -> Result<T, FormulaError> {
        let depth = self.depth.get();
        if depth >= MAX_EVAL_DEPTH {
            return Err(FormulaError::DepthExceeded);
        }
        self.depth.set(depth + 1);
        let result = step();
        self.depth.set(depth);
        result
    }

    fn eval_expr(&self, expr: &FormulaExpr, sheet: &str) -> Result<Value, FormulaError> {
        self.nested(|| self.eval_node(expr, sheet))
    }

    fn eval_node(&self, expr: &FormulaExpr, sheet: &str) -> Result<Value, FormulaError> {
        match expr {
            FormulaExpr::Literal(value) => Ok(value.clone()),
            FormulaExpr::CellRef { sheet: target, addr } => {
                self.evaluate_cell(target.as_deref().unwrap_or(sheet), *addr)
            }
            FormulaExpr::RangeRef {
                sheet: target,
                range,
            } => self.eval_range(target.as_deref().unwrap_or(sheet), range),
            FormulaExpr::UnaryOp { op, expr } => {
                let value = self.eval_expr(expr, sheet)?;
                Ok(eval_unary(*op, &value))
            }
            FormulaExpr::BinaryOp { op, left, right } => {
                let left_val = self.eval_expr(left, sheet)?;
                if let Value::Error(err) = left_val {
                    return Ok(Value::Error(err));
                }
                let right_val = self.eval_expr(right, sheet)?;
                if let Value::Error(err) = right_val {
                    return Ok(Value::Error(err));
                }
                Ok(eval_binary(*op, &left_val, &right_val))
            }
            FormulaExpr::FunctionCall { name, args } => self.eval_call(name, args, sheet),
        }
    }

    fn eval_range(&self, sheet: &str, range: &CellRange) -> Result<Value, FormulaError> {
        if range.size() > MAX_RANGE_CELLS {
            return Err(FormulaError::RangeTooLarge(range.to_string()));
        }
        if !self.source.has_sheet(sheet) {
            return Err(FormulaError::UnknownSheet(sheet.to_string()));
        }
        let mut rows = Vec::new();
        for row in range.start.row..=range.end.row {
            let mut values = Vec::new();
            for col in range.start.col..=range.end.col {
                values.push(self.evaluate_cell(sheet, CellAddress::new(row, col))?);
            }
            rows.push(values);
        }
        Ok(Value::Array(rows))
    }

    fn eval_call(
        &self,
        name: &str,
        args: &[FormulaExpr],
        sheet: &str,
    ) -> Result<Value, FormulaError> {
        match name {
            "IF" => {
                check_arg_count(name, args.len(), 2, 3)?;
                let condition = self.eval_expr(&args[0], sheet)?;
                let branch = match functions::to_bool(&condition) {
                    Err(err) => return Ok(Value::Error(err)),
                    Ok(true) => args.get(1),
                    Ok(false) => args.get(2),
                };
                return match branch {
                    Some(expr) => self.eval_expr(expr, sheet),
                    None => Ok(Value::Bool(false)),
                };
            }
            "IFERROR" => {
                check_arg_count(name, args.len(), 2, 2)?;
                let value = self.eval_expr(&args[0], sheet)?;
                return if value.is_error() {
                    self.eval_expr(&args[1], sheet)
                } else {
                    Ok(value)
                };
            }
            _ => {}
        }

        let def = self
            .functions
            .get(name)
            .ok_or_else(|| FormulaError::UnknownFunction(name.to_string()))?;
        def.validate_arg_count(args.len()).map_err(|expected| {
            FormulaError::InvalidArgCount(name.to_string(), expected, args.len())
        })?;

        let mut evaled_args = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval_expr(arg, sheet)?;
            if let (Value::Error(err), false) = (&value, def.accepts_errors) {
                return Ok(Value::Error(*err));
            }
            evaled_args.push(value);
        }
        Ok((def.eval)(&evaled_args))
    }
}

fn check_arg_count(name: &str, provided: usize, min: usize, max: usize) -> Result<(), FormulaError> {
    if (min..=max).contains(&provided) {
        return Ok(());
    }
    let expected = if min == max {
        min.to_string()
    } else {
        format!("{min}..{max}")
    };
    Err(FormulaError::InvalidArgCount(
        name.to_string(),
        expected,
        provided,
    ))
}

/// Reduce a formula result to what a cell can hold.
fn finish(value: Value) -> Value {
    match value {
        Value::Empty => Value::Number(0.0),
        // No spilling: a bare range in a single cell is a #VALUE! error.
        Value::Array(_) => Value::Error(ErrorValue::Value),
        other => other,
    }
}

fn eval_unary(op: UnaryOperator, value: &Value) -> Value {
    let n = match functions::to_number(value) {
        Ok(n) => n,
        Err(err) => return Value::Error(err),
    };
    match op {
        UnaryOperator::Negate => Value::Number(-n),
        UnaryOperator::Percent => Value::Number(n / 100.0),
    }
}

fn eval_binary(op: BinaryOperator, left: &Value, right: &Value) -> Value {
    use BinaryOperator as B;
    match op {
        B::Concat => match (functions::to_text(left), functions::to_text(right)) {
            (Ok(a), Ok(b)) => Value::String(a + &b),
            (Err(err), _) | (_, Err(err)) => Value::Error(err),
        },
        B::Equal | B::NotEqual | B::LessThan | B::LessThanOrEqual | B::GreaterThan
        | B::GreaterThanOrEqual => {
            let Some(ordering) = functions::compare(left, right) else {
                return Value::Error(ErrorValue::Value);
            };
            let result = match op {
                B::Equal => ordering.is_eq(),
                B::NotEqual => ordering.is_ne(),
                B::LessThan => ordering.is_lt(),
                B::LessThanOrEqual => ordering.is_le(),
                B::GreaterThan => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Value::Bool(result)
        }
        B::Add | B::Subtract | B::Multiply | B::Divide | B::Power => {
            let (a, b) = match (functions::to_number(left), functions::to_number(right)) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(err), _) | (_, Err(err)) => return Value::Error(err),
            };
            let result = match op {
                B::Add => a + b,
                B::Subtract => a - b,
                B::Multiply => a * b,
                B::Divide if b == 0.0 => return Value::Error(ErrorValue::Div0),
                B::Divide => a / b,
                _ if a == 0.0 && b < 0.0 => return Value::Error(ErrorValue::Div0),
                _ => a.powf(b),
            };
            functions::number_or_num_error(result)
        }
    }
}
