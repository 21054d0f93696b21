mod client;
mod envelope;
mod model;
mod provider;

pub use client::{TodoClient, TodoClientConfig};
pub use envelope::{Envelope, EnvelopeError};
pub use model::{Group, Item, ItemStatus, RemoteItem, UnknownStatus};
pub use provider::{ApiErrorClass, Provider, ProviderError};
pub use reqwest::StatusCode;
