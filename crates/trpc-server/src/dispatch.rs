//! Typed method dispatch.
//!
//! A handler is any `Fn` whose arguments implement [`DeserializeOwned`] and
//! whose return value implements [`Serialize`]. Binding one captures its
//! arity and one positional decoder per argument; invoking it checks the
//! arity, decodes each argument in order, calls the function and encodes the
//! result. Application failures come back as a [`Fault`], never as an unwind.
//!
//! # Example
//!
//! ```
//! use trpc_server::dispatch::CallProxy;
//! use serde_json::json;
//!
//! let proxy = CallProxy::new(|a: i64, b: i64| a + b);
//! assert_eq!(proxy.arity(), 2);
//! assert_eq!(proxy.call(vec![json!(1), json!(2)]), Ok(json!(3)));
//! assert!(proxy.call(vec![json!(1)]).is_err());
//! ```

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use trpc_common::{Fault, Params};

/// A function that can be bound as an infallible method.
///
/// `Args` is the argument tuple and only serves to tell the implementations
/// for different arities apart.
pub trait Handler<Args>: Send + Sync + 'static {
    /// Number of positional arguments
    const ARITY: usize;

    /// Decodes `params`, invokes the function and encodes its return value.
    ///
    /// `params` must already hold exactly [`Handler::ARITY`] values.
    fn invoke(&self, params: Params) -> Result<Value, Fault>;
}

/// A function returning `Result<R, E>` that can be bound as a method.
///
/// `Err(e)` becomes an internal error carrying `e.to_string()`.
pub trait FallibleHandler<Args>: Send + Sync + 'static {
    const ARITY: usize;

    fn invoke(&self, params: Params) -> Result<Value, Fault>;
}

type Invoke = Box<dyn Fn(Params) -> Result<Value, Fault> + Send + Sync>;

/// A bound handler: its declared arity plus the type-erased invocation.
pub struct CallProxy {
    arity: usize,
    invoke: Invoke,
}

impl CallProxy {
    pub fn new<H, Args>(handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        CallProxy {
            arity: H::ARITY,
            invoke: Box::new(move |params| handler.invoke(params)),
        }
    }

    pub fn fallible<H, Args>(handler: H) -> Self
    where
        H: FallibleHandler<Args>,
        Args: 'static,
    {
        CallProxy {
            arity: H::ARITY,
            invoke: Box::new(move |params| handler.invoke(params)),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Invokes the handler with `params`.
    ///
    /// # Errors
    ///
    /// - [`Fault::InvalidParams`] if `params.len()` differs from the arity;
    ///   the handler is not invoked
    /// - [`Fault::ParseError`] if an argument cannot be coerced to its type
    /// - [`Fault::Internal`] if a fallible handler fails or the result cannot
    ///   be encoded
    ///
    /// Panics raised by the handler are not caught here.
    pub fn call(&self, params: Params) -> Result<Value, Fault> {
        if params.len() != self.arity {
            return Err(Fault::InvalidParams {
                expected: self.arity,
                received: params.len(),
            });
        }
        (self.invoke)(params)
    }
}

impl fmt::Debug for CallProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallProxy").field("arity", &self.arity).finish_non_exhaustive()
    }
}

fn decode<T: DeserializeOwned>(param: Option<(usize, Value)>) -> Result<T, Fault> {
    let (index, value) =
        param.ok_or_else(|| Fault::InvalidRequest("missing positional argument".to_string()))?;
    serde_json::from_value(value)
        .map_err(|e| Fault::ParseError(format!("argument {}: {}", index, e)))
}

fn encode<R: Serialize>(ret: R) -> Result<Value, Fault> {
    serde_json::to_value(ret).map_err(|e| Fault::Internal(format!("failed to encode result: {}", e)))
}

macro_rules! impl_handler {
    ($arity:expr; $($arg:ident),*) => {
        impl<Func, Ret, $($arg,)*> Handler<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Ret + Send + Sync + 'static,
            Ret: Serialize,
            $($arg: DeserializeOwned,)*
        {
            const ARITY: usize = $arity;

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(&self, params: Params) -> Result<Value, Fault> {
                let mut params = params.into_iter().enumerate();
                $(let $arg: $arg = decode(params.next())?;)*
                encode((self)($($arg),*))
            }
        }

        impl<Func, Ret, E, $($arg,)*> FallibleHandler<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Result<Ret, E> + Send + Sync + 'static,
            Ret: Serialize,
            E: fmt::Display,
            $($arg: DeserializeOwned,)*
        {
            const ARITY: usize = $arity;

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn invoke(&self, params: Params) -> Result<Value, Fault> {
                let mut params = params.into_iter().enumerate();
                $(let $arg: $arg = decode(params.next())?;)*
                match (self)($($arg),*) {
                    Ok(ret) => encode(ret),
                    Err(e) => Err(Fault::Internal(e.to_string())),
                }
            }
        }
    };
}

impl_handler!(0;);
impl_handler!(1; A1);
impl_handler!(2; A1, A2);
impl_handler!(3; A1, A2, A3);
impl_handler!(4; A1, A2, A3, A4);
impl_handler!(5; A1, A2, A3, A4, A5);
impl_handler!(6; A1, A2, A3, A4, A5, A6);
impl_handler!(7; A1, A2, A3, A4, A5, A6, A7);
impl_handler!(8; A1, A2, A3, A4, A5, A6, A7, A8);
