pub mod api;
pub mod auth;
pub mod binding;
pub mod bridge;
pub mod config;
pub mod err;
pub mod guard;
pub mod models;
pub mod revocation;
pub mod state;
pub mod store;
pub mod token;
pub mod vault;

use axum::Json;
use serde::Serialize;

use crate::err::{Error, Fine, Maybe, Nothing};

pub use api::app;

pub type RefStr = &'static str;
pub type Payload<T> = axum::response::Result<Json<Maybe<T>>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Json(Fine(value)))
}

/// Reports a business failure in the body while keeping a `200` status.
pub fn breaks<V>(err: Error) -> Payload<V>
where
    V: Serialize,
{
    Ok(Json(Nothing(err)))
}
