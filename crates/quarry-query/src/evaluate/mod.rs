//! Client-side evaluation: the evaluability oracle, the interpreter used to
//! compute extracted subtrees, and parameter extraction.

mod extractor;
mod folding;
mod interpreter;
mod oracle;
mod parameters;

pub use extractor::{ParameterExtractor, CONTEXT_ACCESSOR_PREFIX, PARAMETER_PREFIX};
pub use folding::ConstantFolder;
pub use interpreter::{ClientFunctions, ClientMember, ClientMethod, Interpreter};
pub use oracle::{EvaluabilityOracle, ExclusionPolicy, ExclusionPredicate};
pub use parameters::{ParameterBinding, ParameterValueStore, ParameterValues};
