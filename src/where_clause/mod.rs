// ABOUTME: WHERE-clause safety layer: validation gate plus parameterization
// ABOUTME: User filters only ever reach the database as placeholder SQL with bindings

pub mod parameterizer;
pub mod scanner;
pub mod validator;

pub use parameterizer::{
    parameterize, parse, Connective, Operator, ParameterizedClause, WhereClause, WhereCondition,
    WhereValue,
};
pub use validator::{is_valid, validate};
