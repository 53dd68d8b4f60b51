use serde::Serialize;
use trpc_common::{Params, Result};

/// Conversion of call arguments into positional request params.
///
/// Implemented for `()` and tuples of up to eight serializable values, so
/// `client.call::<i64, _>("add", (1, 2))` sends `"params": [1, 2]`.
/// A prebuilt `Vec<Value>` is passed through untouched.
pub trait IntoParams {
    fn into_params(self) -> Result<Params>;
}

impl IntoParams for Params {
    fn into_params(self) -> Result<Params> {
        Ok(self)
    }
}

macro_rules! impl_into_params {
    ($($arg:ident),*) => {
        impl<$($arg: Serialize),*> IntoParams for ($($arg,)*) {
            #[allow(non_snake_case)]
            fn into_params(self) -> Result<Params> {
                let ($($arg,)*) = self;
                Ok(vec![$(serde_json::to_value($arg)?),*])
            }
        }
    };
}

impl_into_params!();
impl_into_params!(A1);
impl_into_params!(A1, A2);
impl_into_params!(A1, A2, A3);
impl_into_params!(A1, A2, A3, A4);
impl_into_params!(A1, A2, A3, A4, A5);
impl_into_params!(A1, A2, A3, A4, A5, A6);
impl_into_params!(A1, A2, A3, A4, A5, A6, A7);
impl_into_params!(A1, A2, A3, A4, A5, A6, A7, A8);
