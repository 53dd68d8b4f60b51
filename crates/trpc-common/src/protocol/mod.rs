pub mod envelope;
pub mod error;


pub use envelope::{ErrorObject, Params, Request, Response, Token, VERSION};
pub use error::{
    Fault, Result, TrpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
