// Expression Engine Module
// `${{ }}` expressions used by matrix workflows: interpolation, conditions,
// continue-on-error and action inputs

pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

pub use evaluator::{EvalError, Evaluator, ExpressionContext, ExpressionEngine, StatusContext};
pub use functions::BuiltinFunctions;
pub use lexer::{contains_expression, extract_segments, LexError, Lexer, Segment, Token};
pub use parser::{BinaryOp, Expr, ExprParser, ParseExprError};
pub use value::ValueExt;
